// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The multi-level orchestrator.
//!
//! Encoders are stored bottom (finest) to top (coarsest); decoders are stored
//! top to bottom. During a forward pass the decoder at position `i` receives
//! the `i + 1` coarsest quantized maps, coarsest first, and is scored against
//! the continuous encoding one level below the finest of them (the raw input
//! for the last decoder).

use super::{Decoder, Encoder};
use crate::error::{VqError, VqResult};
use crate::loss::{Loss, MeanSquaredError};
use crate::module::{Parameter, Parameterized};
use crate::vq::{validate_commitment, QuantizedOutput, VqLoss};
use hvq_tensor::{PureResult, Tensor};
use ndarray::Array3;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

pub const DEFAULT_COMMITMENT: f32 = 0.25;

/// Everything one forward pass produces. `loss` and `final_mse` stay on the
/// autograd tape.
#[derive(Clone, Debug)]
pub struct VqVaeLosses {
    /// Sum of every quantization loss and every reconstruction MSE.
    pub loss: Tensor,
    /// Reconstruction MSE of the last (bottom) decoder.
    pub final_mse: Tensor,
    /// Quantization loss per level, bottom to top.
    pub vq_losses: Vec<Tensor>,
    /// Reconstruction MSE per decoder position, top to bottom.
    pub mse_losses: Vec<Tensor>,
    /// Decoder outputs, top to bottom.
    pub reconstructions: Vec<Tensor>,
    /// Quantizer outputs, bottom to top.
    pub quantized: Vec<QuantizedOutput>,
}

impl VqVaeLosses {
    /// Plain `f32` view: `loss`, `final_mse`, `vq_loss/<level>` and
    /// `mse/<position>`.
    pub fn scalars(&self) -> VqResult<BTreeMap<String, f32>> {
        let mut out = BTreeMap::new();
        out.insert("loss".to_string(), self.loss.item()?);
        out.insert("final_mse".to_string(), self.final_mse.item()?);
        for (level, value) in self.vq_losses.iter().enumerate() {
            out.insert(format!("vq_loss/{level}"), value.item()?);
        }
        for (position, value) in self.mse_losses.iter().enumerate() {
            out.insert(format!("mse/{position}"), value.item()?);
        }
        Ok(out)
    }
}

pub struct VqVae {
    encoders: Vec<Box<dyn Encoder>>,
    decoders: Vec<Box<dyn Decoder>>,
    commitment: f32,
}

impl core::fmt::Debug for VqVae {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "VqVae(levels={}, commitment={})",
            self.encoders.len(),
            self.commitment
        )
    }
}

impl VqVae {
    /// Builds a hierarchy from bottom-to-top encoders and top-to-bottom
    /// decoders.
    ///
    /// Fails with [`VqError::Configuration`] when the hierarchy is empty, the
    /// counts differ, a decoder with a fixed input count sits at a position
    /// that feeds it a different count, or two parameters share a name.
    pub fn new(encoders: Vec<Box<dyn Encoder>>, decoders: Vec<Box<dyn Decoder>>) -> VqResult<Self> {
        if encoders.is_empty() {
            return Err(VqError::config("a hierarchy needs at least one level"));
        }
        if encoders.len() != decoders.len() {
            return Err(VqError::config(format!(
                "{} encoders but {} decoders",
                encoders.len(),
                decoders.len()
            )));
        }
        for (position, decoder) in decoders.iter().enumerate() {
            if let Some(expected) = decoder.num_inputs() {
                if expected != position + 1 {
                    return Err(VqError::config(format!(
                        "decoder {position} takes {expected} input(s) but receives {}",
                        position + 1
                    )));
                }
            }
        }
        let model = Self {
            encoders,
            decoders,
            commitment: DEFAULT_COMMITMENT,
        };
        model.check_unique_names()?;
        Ok(model)
    }

    fn check_unique_names(&self) -> VqResult<()> {
        let mut seen = HashSet::new();
        let mut duplicate = None;
        self.visit_parameters(&mut |param| {
            if !seen.insert(param.name().to_string()) && duplicate.is_none() {
                duplicate = Some(param.name().to_string());
            }
            Ok(())
        })?;
        match duplicate {
            Some(name) => Err(VqError::config(format!(
                "parameter {name} is registered twice"
            ))),
            None => Ok(()),
        }
    }

    /// Replaces the commitment weight used when `forward` gets `None`.
    pub fn with_commitment(mut self, commitment: f32) -> VqResult<Self> {
        self.commitment = validate_commitment(commitment)?;
        Ok(self)
    }

    /// Commitment weight applied when `forward` gets `None`.
    pub fn commitment(&self) -> f32 {
        self.commitment
    }

    pub fn num_levels(&self) -> usize {
        self.encoders.len()
    }

    /// Encoders, bottom to top.
    pub fn encoders(&self) -> &[Box<dyn Encoder>] {
        &self.encoders
    }

    /// Decoders, top to bottom.
    pub fn decoders(&self) -> &[Box<dyn Decoder>] {
        &self.decoders
    }

    /// Toggles usage tracking on every quantizer.
    pub fn set_training(&mut self, training: bool) {
        for encoder in &mut self.encoders {
            encoder.quantizer_mut().set_training(training);
        }
    }

    /// Computes the training losses for a batch. `commitment` defaults to
    /// [`VqVae::commitment`], which is [`DEFAULT_COMMITMENT`] unless set.
    pub fn forward(&self, input: &Tensor, commitment: Option<f32>) -> VqResult<VqVaeLosses> {
        self.run(input, commitment, true)
    }

    fn run(
        &self,
        input: &Tensor,
        commitment: Option<f32>,
        record_usage: bool,
    ) -> VqResult<VqVaeLosses> {
        let commitment = validate_commitment(commitment.unwrap_or(self.commitment))?;
        let levels = self.num_levels();

        let mut all_encoded = Vec::with_capacity(levels + 1);
        all_encoded.push(input.clone());
        let mut all_vq_outs = Vec::with_capacity(levels);
        let mut quantized = Vec::with_capacity(levels);
        let mut vq_losses = Vec::with_capacity(levels);
        for encoder in &self.encoders {
            let encoded = encoder.encode(&all_encoded[all_encoded.len() - 1])?;
            let output = if record_usage {
                encoder.quantizer().forward(&encoded)?
            } else {
                encoder.quantizer().quantize(&encoded)?
            };
            vq_losses.push(VqLoss::compute(&encoded, &output.embedded, commitment)?.total);
            all_vq_outs.push(output.passthrough.clone());
            all_encoded.push(encoded);
            quantized.push(output);
        }

        let coarsest_first: Vec<Tensor> = all_vq_outs.iter().rev().cloned().collect();
        let targets: Vec<&Tensor> = all_encoded.iter().rev().collect();
        let criterion = MeanSquaredError::new();
        let mut mse_losses = Vec::with_capacity(levels);
        let mut reconstructions = Vec::with_capacity(levels);
        for (position, decoder) in self.decoders.iter().enumerate() {
            let reconstruction = decoder.forward(&coarsest_first[..position + 1])?;
            let target = targets[position + 1];
            if reconstruction.shape() != target.shape() {
                return Err(VqError::ShapeMismatch {
                    component: "decoder reconstruction",
                    expected: format!("{:?}", target.shape()),
                    got: format!("{:?}", reconstruction.shape()),
                });
            }
            mse_losses.push(criterion.forward(&reconstruction, target)?);
            reconstructions.push(reconstruction);
        }

        let mut loss = Tensor::scalar(0.0);
        for term in vq_losses.iter().chain(mse_losses.iter()) {
            loss = loss.add(term)?;
        }
        let final_mse = mse_losses
            .last()
            .cloned()
            .ok_or_else(|| VqError::config("a hierarchy needs at least one level"))?;
        debug!(
            levels,
            loss = loss.item()?,
            final_mse = final_mse.item()?,
            "vq-vae forward"
        );
        Ok(VqVaeLosses {
            loss,
            final_mse,
            vq_losses,
            mse_losses,
            reconstructions,
            quantized,
        })
    }

    /// One reconstruction of `input` per level, coarsest first.
    ///
    /// Reconstruction `k` keeps the real codes of the top `k + 1` levels and
    /// replaces every lower level's code with the quantized prediction of the
    /// decoder that reconstructs it. The last entry uses only real codes.
    /// Usage counters are left untouched.
    pub fn full_reconstructions(&self, input: &Tensor) -> VqResult<Vec<Tensor>> {
        let terms = self.run(input, None, false)?;
        let levels = self.num_levels();
        let bottom = &self.decoders[levels - 1];

        let mut predicted = Vec::with_capacity(levels - 1);
        for (position, reconstruction) in terms.reconstructions[..levels - 1].iter().enumerate() {
            let level = levels - 2 - position;
            let snapped = self.encoders[level].quantizer().quantize(reconstruction)?;
            predicted.push(snapped.passthrough);
        }
        let real: Vec<Tensor> = terms
            .quantized
            .iter()
            .rev()
            .map(|output| output.embedded.clone())
            .collect();

        let mut results = Vec::with_capacity(levels);
        for kept in 0..levels - 1 {
            let mut inputs: Vec<Tensor> = real[..kept + 1].to_vec();
            inputs.extend(predicted[kept..].iter().cloned());
            results.push(bottom.forward(&inputs)?);
        }
        results.push(terms.reconstructions[levels - 1].clone());
        Ok(results)
    }

    /// Compresses `input` into one index grid per level, bottom to top.
    pub fn encode_indices(&self, input: &Tensor) -> VqResult<Vec<Array3<usize>>> {
        let mut current = input.clone();
        let mut codes = Vec::with_capacity(self.num_levels());
        for encoder in &self.encoders {
            let encoded = encoder.encode(&current)?;
            codes.push(encoder.quantizer().quantize(&encoded)?.indices);
            current = encoded;
        }
        Ok(codes)
    }

    /// Reconstructs an input from bottom-to-top index grids through the
    /// bottom decoder.
    pub fn decode_indices(&self, codes: &[Array3<usize>]) -> VqResult<Tensor> {
        let levels = self.num_levels();
        if codes.len() != levels {
            return Err(VqError::ShapeMismatch {
                component: "index grids",
                expected: format!("{levels} level(s)"),
                got: format!("{} level(s)", codes.len()),
            });
        }
        let inputs = codes
            .iter()
            .zip(&self.encoders)
            .rev()
            .map(|(grid, encoder)| encoder.quantizer().embed(grid))
            .collect::<VqResult<Vec<_>>>()?;
        self.decoders[levels - 1].forward(&inputs)
    }

    /// Revives dead codebook entries in every quantizer from its last batch.
    pub fn revive_dead_entries(&mut self) -> VqResult<usize> {
        let mut total = 0;
        for encoder in &mut self.encoders {
            total += encoder.quantizer_mut().revive_dead_entries(None)?;
        }
        if total > 0 {
            info!(revived = total, "revived dead codebook entries");
        }
        Ok(total)
    }
}

impl Parameterized for VqVae {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for encoder in &self.encoders {
            encoder.visit_parameters(visitor)?;
        }
        for decoder in &self.decoders {
            decoder.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for encoder in &mut self.encoders {
            encoder.visit_parameters_mut(visitor)?;
        }
        for decoder in &mut self.decoders {
            decoder.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{HalfDecoder, HalfEncoder, HalfQuarterDecoder, QuarterEncoder};
    use crate::vq::VqOptions;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn options(seed: u64) -> VqOptions {
        VqOptions {
            seed: Some(seed),
            ..VqOptions::default()
        }
    }

    fn two_level() -> VqVae {
        VqVae::new(
            vec![
                Box::new(QuarterEncoder::new("enc0", 2, 3, 6, options(1)).unwrap()),
                Box::new(HalfEncoder::new("enc1", 3, 3, 6, options(2)).unwrap()),
            ],
            vec![
                Box::new(HalfDecoder::new("dec0", 3, 3, Some(3)).unwrap()),
                Box::new(HalfQuarterDecoder::new("dec1", 3, 2, Some(4)).unwrap()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn empty_and_unbalanced_hierarchies_are_rejected() {
        assert!(matches!(
            VqVae::new(Vec::new(), Vec::new()),
            Err(VqError::Configuration(_))
        ));
        let err = VqVae::new(
            vec![Box::new(HalfEncoder::new("enc", 2, 2, 4, options(1)).unwrap())],
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, VqError::Configuration(_)));
    }

    #[test]
    fn decoder_arity_must_match_its_position() {
        let err = VqVae::new(
            vec![Box::new(HalfEncoder::new("enc", 2, 2, 4, options(1)).unwrap())],
            vec![Box::new(HalfQuarterDecoder::new("dec", 2, 2, Some(2)).unwrap())],
        )
        .unwrap_err();
        assert!(matches!(err, VqError::Configuration(_)));
    }

    #[test]
    fn duplicate_parameter_names_are_rejected() {
        let err = VqVae::new(
            vec![
                Box::new(HalfEncoder::new("same", 2, 2, 4, options(1)).unwrap()),
                Box::new(HalfEncoder::new("same", 2, 2, 4, options(2)).unwrap()),
            ],
            vec![
                Box::new(HalfDecoder::new("dec0", 2, 2, Some(3)).unwrap()),
                Box::new(HalfQuarterDecoder::new("dec1", 2, 2, Some(4)).unwrap()),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, VqError::Configuration(_)));
    }

    #[test]
    fn forward_reports_every_term() {
        let model = two_level();
        let mut rng = StdRng::seed_from_u64(10);
        let x = Tensor::randn(&[1, 2, 16, 16], &mut rng);
        let losses = model.forward(&x, None).unwrap();
        assert_eq!(losses.vq_losses.len(), 2);
        assert_eq!(losses.mse_losses.len(), 2);
        assert_eq!(losses.reconstructions[0].shape(), vec![1, 3, 4, 4]);
        assert_eq!(losses.reconstructions[1].shape(), x.shape());
        assert_eq!(losses.quantized[1].indices.dim(), (1, 2, 2));

        let scalars = losses.scalars().unwrap();
        let parts: f32 = ["vq_loss/0", "vq_loss/1", "mse/0", "mse/1"]
            .iter()
            .map(|key| scalars[*key])
            .sum();
        assert!((scalars["loss"] - parts).abs() < 1e-4 * (1.0 + parts.abs()));
        assert_eq!(scalars["final_mse"], scalars["mse/1"]);
    }

    #[test]
    fn negative_commitment_is_rejected() {
        let model = two_level();
        let x = Tensor::zeros(&[1, 2, 8, 8]);
        assert!(matches!(
            model.forward(&x, Some(-1.0)),
            Err(VqError::Configuration(_))
        ));
    }

    #[test]
    fn full_reconstructions_cover_every_level() {
        let model = two_level();
        let mut rng = StdRng::seed_from_u64(11);
        let x = Tensor::randn(&[2, 2, 8, 8], &mut rng);
        let before = model.encoders()[0].quantizer().usage_counts();
        let recons = model.full_reconstructions(&x).unwrap();
        assert_eq!(recons.len(), 2);
        for recon in &recons {
            assert_eq!(recon.shape(), x.shape());
        }
        assert_eq!(model.encoders()[0].quantizer().usage_counts(), before);
    }

    #[test]
    fn indices_round_trip_through_the_bottom_decoder() {
        let model = two_level();
        let mut rng = StdRng::seed_from_u64(12);
        let x = Tensor::randn(&[1, 2, 8, 8], &mut rng);
        let codes = model.encode_indices(&x).unwrap();
        assert_eq!(codes[0].dim(), (1, 2, 2));
        assert_eq!(codes[1].dim(), (1, 1, 1));

        let decoded = model.decode_indices(&codes).unwrap();
        let reference = model.full_reconstructions(&x).unwrap();
        assert_eq!(decoded.shape(), x.shape());
        for (a, b) in decoded.to_vec().iter().zip(reference[1].to_vec()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
        assert!(matches!(
            model.decode_indices(&codes[..1]),
            Err(VqError::ShapeMismatch { .. })
        ));
    }
}
