// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{ensure_positive, VqError, VqResult};
use crate::layers::{Conv2d, Residual};
use crate::module::{Module, Parameter, Parameterized};
use crate::vq::{QuantizedOutput, Vq, VqOptions};
use hvq_config::rng_from_optional;
use hvq_tensor::ops::pad2d;
use hvq_tensor::{PureResult, Tensor};

/// Right and bottom get the extra row/column so a kernel-4 stride-2 conv
/// halves even sizes exactly.
const UNEVEN_PAD: (usize, usize, usize, usize) = (1, 2, 1, 2);

/// Shrinks a feature map and quantizes the result with an owned [`Vq`].
pub trait Encoder: Parameterized {
    fn quantizer(&self) -> &Vq;

    fn quantizer_mut(&mut self) -> &mut Vq;

    /// Continuous encoding with `quantizer().num_channels()` channels.
    fn encode(&self, _input: &Tensor) -> VqResult<Tensor> {
        Err(VqError::NotImplemented("Encoder::encode"))
    }

    /// `quantizer().forward(encode(input))`.
    fn forward(&self, input: &Tensor) -> VqResult<QuantizedOutput> {
        let encoded = self.encode(input)?;
        self.quantizer().forward(&encoded)
    }
}

/// Seeds layer weights apart from the codebook when an explicit seed is given.
fn layer_rng(options: &VqOptions, name: &str) -> rand::rngs::StdRng {
    rng_from_optional(options.seed.map(|seed| seed.wrapping_add(1)), name)
}

/// Downsamples height and width by 4 with two strided convolutions followed
/// by two residual blocks.
#[derive(Debug)]
pub struct QuarterEncoder {
    conv1: Conv2d,
    conv2: Conv2d,
    residual1: Residual,
    residual2: Residual,
    vq: Vq,
}

impl QuarterEncoder {
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        num_latents: usize,
        options: VqOptions,
    ) -> VqResult<Self> {
        ensure_positive(in_channels, "in_channels")?;
        let name = name.into();
        let vq = Vq::new(format!("{name}::vq"), out_channels, num_latents, options)?;
        let mut rng = layer_rng(&options, &name);
        Ok(Self {
            conv1: Conv2d::new(
                format!("{name}::conv1"),
                in_channels,
                out_channels,
                (4, 4),
                (2, 2),
                (0, 0),
                &mut rng,
            )?,
            conv2: Conv2d::new(
                format!("{name}::conv2"),
                out_channels,
                out_channels,
                (4, 4),
                (2, 2),
                (0, 0),
                &mut rng,
            )?,
            residual1: Residual::new(format!("{name}::residual1"), out_channels, &mut rng)?,
            residual2: Residual::new(format!("{name}::residual2"), out_channels, &mut rng)?,
            vq,
        })
    }
}

impl Parameterized for QuarterEncoder {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv1.visit_parameters(visitor)?;
        self.conv2.visit_parameters(visitor)?;
        self.residual1.visit_parameters(visitor)?;
        self.residual2.visit_parameters(visitor)?;
        self.vq.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv1.visit_parameters_mut(visitor)?;
        self.conv2.visit_parameters_mut(visitor)?;
        self.residual1.visit_parameters_mut(visitor)?;
        self.residual2.visit_parameters_mut(visitor)?;
        self.vq.visit_parameters_mut(visitor)
    }
}

impl Encoder for QuarterEncoder {
    fn quantizer(&self) -> &Vq {
        &self.vq
    }

    fn quantizer_mut(&mut self) -> &mut Vq {
        &mut self.vq
    }

    fn encode(&self, input: &Tensor) -> VqResult<Tensor> {
        let x = self.conv1.forward(&pad2d(input, UNEVEN_PAD)?)?.relu()?;
        let x = self.conv2.forward(&pad2d(&x, UNEVEN_PAD)?)?;
        let x = self.residual1.forward(&x)?;
        Ok(self.residual2.forward(&x)?)
    }
}

/// Downsamples height and width by 2 with one strided convolution followed
/// by two residual blocks.
#[derive(Debug)]
pub struct HalfEncoder {
    conv: Conv2d,
    residual1: Residual,
    residual2: Residual,
    vq: Vq,
}

impl HalfEncoder {
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        num_latents: usize,
        options: VqOptions,
    ) -> VqResult<Self> {
        ensure_positive(in_channels, "in_channels")?;
        let name = name.into();
        let vq = Vq::new(format!("{name}::vq"), out_channels, num_latents, options)?;
        let mut rng = layer_rng(&options, &name);
        Ok(Self {
            conv: Conv2d::new(
                format!("{name}::conv"),
                in_channels,
                out_channels,
                (4, 4),
                (2, 2),
                (0, 0),
                &mut rng,
            )?,
            residual1: Residual::new(format!("{name}::residual1"), out_channels, &mut rng)?,
            residual2: Residual::new(format!("{name}::residual2"), out_channels, &mut rng)?,
            vq,
        })
    }
}

impl Parameterized for HalfEncoder {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv.visit_parameters(visitor)?;
        self.residual1.visit_parameters(visitor)?;
        self.residual2.visit_parameters(visitor)?;
        self.vq.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv.visit_parameters_mut(visitor)?;
        self.residual1.visit_parameters_mut(visitor)?;
        self.residual2.visit_parameters_mut(visitor)?;
        self.vq.visit_parameters_mut(visitor)
    }
}

impl Encoder for HalfEncoder {
    fn quantizer(&self) -> &Vq {
        &self.vq
    }

    fn quantizer_mut(&mut self) -> &mut Vq {
        &mut self.vq
    }

    fn encode(&self, input: &Tensor) -> VqResult<Tensor> {
        let x = self.conv.forward(&pad2d(input, UNEVEN_PAD)?)?;
        let x = self.residual1.forward(&x)?;
        Ok(self.residual2.forward(&x)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(seed: u64) -> VqOptions {
        VqOptions {
            seed: Some(seed),
            ..VqOptions::default()
        }
    }

    struct Unfinished {
        vq: Vq,
    }

    impl Parameterized for Unfinished {
        fn visit_parameters(
            &self,
            visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
        ) -> PureResult<()> {
            self.vq.visit_parameters(visitor)
        }

        fn visit_parameters_mut(
            &mut self,
            visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
        ) -> PureResult<()> {
            self.vq.visit_parameters_mut(visitor)
        }
    }

    impl Encoder for Unfinished {
        fn quantizer(&self) -> &Vq {
            &self.vq
        }

        fn quantizer_mut(&mut self) -> &mut Vq {
            &mut self.vq
        }
    }

    #[test]
    fn default_encode_is_not_implemented() {
        let encoder = Unfinished {
            vq: Vq::new("vq", 2, 2, options(0)).unwrap(),
        };
        let x = Tensor::zeros(&[1, 2, 2, 2]);
        assert_eq!(
            encoder.encode(&x).unwrap_err(),
            VqError::NotImplemented("Encoder::encode")
        );
        assert!(matches!(
            encoder.forward(&x),
            Err(VqError::NotImplemented(_))
        ));
    }

    #[test]
    fn quarter_encoder_divides_by_four() {
        let encoder = QuarterEncoder::new("enc", 3, 4, 8, options(1)).unwrap();
        let x = Tensor::ones(&[2, 3, 8, 12]);
        let encoded = encoder.encode(&x).unwrap();
        assert_eq!(encoded.shape(), vec![2, 4, 2, 3]);
        let out = encoder.forward(&x).unwrap();
        assert_eq!(out.indices.dim(), (2, 2, 3));
        assert!(out.indices.iter().all(|&i| i < 8));
    }

    #[test]
    fn half_encoder_divides_by_two() {
        let encoder = HalfEncoder::new("enc", 4, 4, 8, options(2)).unwrap();
        let encoded = encoder.encode(&Tensor::ones(&[1, 4, 6, 4])).unwrap();
        assert_eq!(encoded.shape(), vec![1, 4, 3, 2]);
    }

    #[test]
    fn parameters_include_the_codebook() {
        let encoder = HalfEncoder::new("top", 2, 3, 5, options(3)).unwrap();
        let state = encoder.state_dict().unwrap();
        assert_eq!(state["top::vq::codebook"].shape(), vec![5, 3]);
        assert_eq!(state["top::conv::weight"].shape(), vec![3, 2, 4, 4]);
        assert!(state.contains_key("top::residual2::conv1x1::bias"));
    }

    #[test]
    fn zero_sizes_are_configuration_errors() {
        assert!(matches!(
            QuarterEncoder::new("enc", 0, 4, 8, options(4)),
            Err(VqError::Configuration(_))
        ));
        assert!(matches!(
            HalfEncoder::new("enc", 3, 4, 0, options(4)),
            Err(VqError::Configuration(_))
        ));
    }
}
