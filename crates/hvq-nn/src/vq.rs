// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Codebook quantizer and the embedding/commitment loss.
//!
//! [`Vq::forward`] snaps every spatial position of a `(batch, channels, h, w)`
//! feature map to its nearest codebook row. Two views of the result come back:
//! `embedded` routes gradient into the codebook, while `passthrough` carries
//! the same values but routes gradient straight to the input, skipping the
//! discrete lookup.

use crate::error::{ensure_positive, VqError, VqResult};
use crate::loss::{Loss, MeanSquaredError};
use crate::module::{Parameter, Parameterized};
use hvq_config::rng_from_optional;
use hvq_tensor::ops::{index_select_rows, nearest_rows};
use hvq_tensor::{PureResult, Tensor, TensorError};
use ndarray::{Array3, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use std::cell::RefCell;
use tracing::{debug, warn};

/// Forward calls an entry may go unused before it counts as dead.
pub const DEFAULT_DEAD_RATE: usize = 100;

/// Dead-entry bookkeeping and seeding for a quantizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VqOptions {
    pub dead_rate: usize,
    /// Explicit seed for codebook initialisation and revival sampling.
    pub seed: Option<u64>,
}

impl Default for VqOptions {
    fn default() -> Self {
        Self {
            dead_rate: DEFAULT_DEAD_RATE,
            seed: None,
        }
    }
}

/// Result of quantizing one feature map.
#[derive(Clone, Debug)]
pub struct QuantizedOutput {
    /// Codebook rows laid out like the input; differentiable w.r.t. the codebook.
    pub embedded: Tensor,
    /// Equal to `embedded` in value; differentiable w.r.t. the input only.
    pub passthrough: Tensor,
    /// Chosen entry per `(batch, h, w)` position.
    pub indices: Array3<usize>,
}

/// Splits a feature map shape, reporting anything but rank 4 as a shape error.
pub(crate) fn feature_dims(
    component: &'static str,
    x: &Tensor,
) -> VqResult<(usize, usize, usize, usize)> {
    match x.shape().as_slice() {
        &[n, c, h, w] => Ok((n, c, h, w)),
        other => Err(VqError::ShapeMismatch {
            component,
            expected: "(batch, channels, height, width)".into(),
            got: format!("{other:?}"),
        }),
    }
}

pub struct Vq {
    codebook: Parameter,
    num_channels: usize,
    num_latents: usize,
    dead_rate: usize,
    training: bool,
    usage: RefCell<Vec<usize>>,
    last_batch: RefCell<Option<Tensor>>,
    rng: StdRng,
}

impl core::fmt::Debug for Vq {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Vq(name={},channels={},latents={},dead_rate={},training={})",
            self.codebook.name(),
            self.num_channels,
            self.num_latents,
            self.dead_rate,
            self.training
        )
    }
}

impl Vq {
    /// Allocates a `(num_latents, num_channels)` codebook drawn from a
    /// standard normal distribution.
    pub fn new(
        name: impl Into<String>,
        num_channels: usize,
        num_latents: usize,
        options: VqOptions,
    ) -> VqResult<Self> {
        ensure_positive(num_channels, "num_channels")?;
        ensure_positive(num_latents, "num_latents")?;
        ensure_positive(options.dead_rate, "dead_rate")?;
        let name = name.into();
        let mut rng = rng_from_optional(options.seed, &name);
        let codebook = Tensor::randn(&[num_latents, num_channels], &mut rng);
        Ok(Self {
            codebook: Parameter::new(format!("{name}::codebook"), codebook),
            num_channels,
            num_latents,
            dead_rate: options.dead_rate,
            training: true,
            usage: RefCell::new(vec![options.dead_rate; num_latents]),
            last_batch: RefCell::new(None),
            rng,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_latents(&self) -> usize {
        self.num_latents
    }

    pub fn dead_rate(&self) -> usize {
        self.dead_rate
    }

    /// The `(num_latents, num_channels)` codebook tensor.
    pub fn codebook(&self) -> &Tensor {
        self.codebook.value()
    }

    /// Enables or disables usage tracking in [`Vq::forward`].
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn usage_counts(&self) -> Vec<usize> {
        self.usage.borrow().clone()
    }

    /// Entries whose usage counter reached zero.
    pub fn dead_entries(&self) -> Vec<usize> {
        self.usage
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(entry, _)| entry)
            .collect()
    }

    /// Flattens `(n, c, h, w)` into `(n * h * w, c)` rows, channels last.
    fn flatten(&self, x: &Tensor) -> VqResult<(Tensor, (usize, usize, usize))> {
        let (n, c, h, w) = feature_dims("quantizer input", x)?;
        if c != self.num_channels {
            return Err(VqError::ShapeMismatch {
                component: "quantizer input channels",
                expected: self.num_channels.to_string(),
                got: c.to_string(),
            });
        }
        let rows = x.permute(&[0, 2, 3, 1])?.reshape(&[n * h * w, c])?;
        Ok((rows, (n, h, w)))
    }

    fn gather(&self, indices: &[usize], (n, h, w): (usize, usize, usize)) -> PureResult<Tensor> {
        index_select_rows(self.codebook.value(), indices)?
            .reshape(&[n, h, w, self.num_channels])?
            .permute(&[0, 3, 1, 2])
    }

    fn quantize_rows(&self, x: &Tensor) -> VqResult<(QuantizedOutput, Tensor)> {
        let (rows, dims) = self.flatten(x)?;
        let picked = nearest_rows(&rows, self.codebook.value())?;
        let embedded = self.gather(&picked, dims)?;
        let passthrough = x.add(&embedded.sub(x)?.detach())?;
        let indices = Array3::from_shape_vec(dims, picked).map_err(|_| TensorError::DataLength {
            expected: dims.0 * dims.1 * dims.2,
            got: rows.shape()[0],
        })?;
        Ok((
            QuantizedOutput {
                embedded,
                passthrough,
                indices,
            },
            rows,
        ))
    }

    /// Quantizes without touching usage counters or the remembered batch.
    pub fn quantize(&self, x: &Tensor) -> VqResult<QuantizedOutput> {
        Ok(self.quantize_rows(x)?.0)
    }

    /// Quantizes `x` and, in training mode, records which entries were used.
    pub fn forward(&self, x: &Tensor) -> VqResult<QuantizedOutput> {
        let (output, rows) = self.quantize_rows(x)?;
        if self.training {
            self.record_usage(output.indices.iter().copied());
            *self.last_batch.borrow_mut() = Some(rows.detach());
        }
        Ok(output)
    }

    fn record_usage(&self, picked: impl Iterator<Item = usize>) {
        let mut hit = vec![false; self.num_latents];
        for entry in picked {
            hit[entry] = true;
        }
        let mut usage = self.usage.borrow_mut();
        for (count, used) in usage.iter_mut().zip(hit) {
            *count = if used {
                self.dead_rate
            } else {
                count.saturating_sub(1)
            };
        }
    }

    /// Maps a `(batch, h, w)` index grid to `(batch, channels, h, w)` codebook
    /// vectors.
    pub fn embed(&self, indices: &Array3<usize>) -> VqResult<Tensor> {
        let picked: Vec<usize> = indices.iter().copied().collect();
        Ok(self.gather(&picked, indices.dim())?)
    }

    /// Overwrites every dead entry with a randomly chosen input vector.
    ///
    /// `inputs` is a feature map like the ones passed to [`Vq::forward`]; when
    /// absent, the batch remembered by the last training-mode forward call is
    /// used. Returns the number of entries revived.
    pub fn revive_dead_entries(&mut self, inputs: Option<&Tensor>) -> VqResult<usize> {
        let dead = self.dead_entries();
        if dead.is_empty() {
            return Ok(0);
        }
        let source = match inputs {
            Some(x) => Some(self.flatten(x)?.0.detach()),
            None => self.last_batch.borrow().clone(),
        };
        let rows = source.map(|rows| rows.to_vec()).unwrap_or_default();
        let channels = self.num_channels;
        let available = rows.len() / channels;
        if available == 0 {
            warn!(
                codebook = self.codebook.name(),
                dead = dead.len(),
                "no input vectors available to revive dead codebook entries"
            );
            return Ok(0);
        }

        let rng = &mut self.rng;
        self.codebook.value().update_data(|table| {
            for &entry in &dead {
                let pick = rng.gen_range(0..available);
                let src = &rows[pick * channels..(pick + 1) * channels];
                for (dst, value) in table.index_axis_mut(Axis(0), entry).iter_mut().zip(src) {
                    *dst = *value;
                }
            }
        });
        let mut usage = self.usage.borrow_mut();
        for &entry in &dead {
            usage[entry] = self.dead_rate;
        }
        debug!(
            codebook = self.codebook.name(),
            revived = dead.len(),
            "revived dead codebook entries"
        );
        Ok(dead.len())
    }
}

impl Parameterized for Vq {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.codebook)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.codebook)
    }
}

pub(crate) fn validate_commitment(commitment: f32) -> VqResult<f32> {
    if !(commitment.is_finite() && commitment >= 0.0) {
        return Err(VqError::config(format!(
            "commitment must be finite and non-negative, got {commitment}"
        )));
    }
    Ok(commitment)
}

/// The two halves of the quantization loss.
#[derive(Clone, Debug)]
pub struct VqLoss {
    /// `mse(embedded, stop_grad(encoded))`: trains the codebook.
    pub embedding: Tensor,
    /// `commitment * mse(encoded, stop_grad(embedded))`: trains the encoder.
    pub commitment: Tensor,
    /// `embedding + commitment`.
    pub total: Tensor,
}

impl VqLoss {
    pub fn compute(encoded: &Tensor, embedded: &Tensor, commitment: f32) -> VqResult<Self> {
        let commitment = validate_commitment(commitment)?;
        let criterion = MeanSquaredError::new();
        let embedding = criterion.forward(embedded, &encoded.detach())?;
        let commit = criterion
            .forward(encoded, &embedded.detach())?
            .scale(commitment)?;
        let total = embedding.add(&commit)?;
        Ok(Self {
            embedding,
            commitment: commit,
            total,
        })
    }
}

/// Embedding loss plus `commitment` times the commitment loss.
pub fn vq_loss(encoded: &Tensor, embedded: &Tensor, commitment: f32) -> VqResult<Tensor> {
    Ok(VqLoss::compute(encoded, embedded, commitment)?.total)
}
