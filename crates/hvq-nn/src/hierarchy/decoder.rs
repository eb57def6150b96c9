// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{ensure_positive, VqError, VqResult};
use crate::layers::{Conv2d, ConvTranspose2d, Residual};
use crate::module::{Module, Parameter, Parameterized};
use hvq_config::rng_from_optional;
use hvq_tensor::ops::concat_channels;
use hvq_tensor::{PureResult, Tensor};

/// Reconstructs a feature map from quantized maps of one or more levels.
pub trait Decoder: Parameterized {
    /// How many inputs [`Decoder::forward`] expects, if fixed.
    fn num_inputs(&self) -> Option<usize> {
        None
    }

    /// Decodes `inputs`, ordered coarsest level first.
    fn forward(&self, _inputs: &[Tensor]) -> VqResult<Tensor> {
        Err(VqError::NotImplemented("Decoder::forward"))
    }
}

fn expect_inputs(component: &'static str, inputs: &[Tensor], expected: usize) -> VqResult<()> {
    if inputs.len() != expected {
        return Err(VqError::ShapeMismatch {
            component,
            expected: format!("{expected} input(s)"),
            got: format!("{} input(s)", inputs.len()),
        });
    }
    Ok(())
}

/// Upsamples by 4: two residual blocks, then two stride-2 transposed convs.
#[derive(Debug)]
pub struct QuarterDecoder {
    residual1: Residual,
    residual2: Residual,
    conv1: ConvTranspose2d,
    conv2: ConvTranspose2d,
}

impl QuarterDecoder {
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        seed: Option<u64>,
    ) -> VqResult<Self> {
        ensure_positive(in_channels, "in_channels")?;
        ensure_positive(out_channels, "out_channels")?;
        let name = name.into();
        let mut rng = rng_from_optional(seed, &name);
        Ok(Self {
            residual1: Residual::new(format!("{name}::residual1"), in_channels, &mut rng)?,
            residual2: Residual::new(format!("{name}::residual2"), in_channels, &mut rng)?,
            conv1: ConvTranspose2d::doubling(
                format!("{name}::conv1"),
                in_channels,
                in_channels,
                &mut rng,
            )?,
            conv2: ConvTranspose2d::doubling(
                format!("{name}::conv2"),
                in_channels,
                out_channels,
                &mut rng,
            )?,
        })
    }
}

impl Parameterized for QuarterDecoder {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.residual1.visit_parameters(visitor)?;
        self.residual2.visit_parameters(visitor)?;
        self.conv1.visit_parameters(visitor)?;
        self.conv2.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.residual1.visit_parameters_mut(visitor)?;
        self.residual2.visit_parameters_mut(visitor)?;
        self.conv1.visit_parameters_mut(visitor)?;
        self.conv2.visit_parameters_mut(visitor)
    }
}

impl Decoder for QuarterDecoder {
    fn num_inputs(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: &[Tensor]) -> VqResult<Tensor> {
        expect_inputs("QuarterDecoder inputs", inputs, 1)?;
        let x = self.residual1.forward(&inputs[0])?;
        let x = self.residual2.forward(&x)?.relu()?;
        let x = self.conv1.forward(&x)?.relu()?;
        Ok(self.conv2.forward(&x)?)
    }
}

/// Upsamples by 2: two residual blocks, then one stride-2 transposed conv.
#[derive(Debug)]
pub struct HalfDecoder {
    residual1: Residual,
    residual2: Residual,
    conv: ConvTranspose2d,
}

impl HalfDecoder {
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        seed: Option<u64>,
    ) -> VqResult<Self> {
        ensure_positive(in_channels, "in_channels")?;
        ensure_positive(out_channels, "out_channels")?;
        let name = name.into();
        let mut rng = rng_from_optional(seed, &name);
        Ok(Self {
            residual1: Residual::new(format!("{name}::residual1"), in_channels, &mut rng)?,
            residual2: Residual::new(format!("{name}::residual2"), in_channels, &mut rng)?,
            conv: ConvTranspose2d::doubling(
                format!("{name}::conv"),
                in_channels,
                out_channels,
                &mut rng,
            )?,
        })
    }
}

impl Parameterized for HalfDecoder {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.residual1.visit_parameters(visitor)?;
        self.residual2.visit_parameters(visitor)?;
        self.conv.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.residual1.visit_parameters_mut(visitor)?;
        self.residual2.visit_parameters_mut(visitor)?;
        self.conv.visit_parameters_mut(visitor)
    }
}

impl Decoder for HalfDecoder {
    fn num_inputs(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: &[Tensor]) -> VqResult<Tensor> {
        expect_inputs("HalfDecoder inputs", inputs, 1)?;
        let x = self.residual1.forward(&inputs[0])?;
        let x = self.residual2.forward(&x)?.relu()?;
        Ok(self.conv.forward(&x)?)
    }
}

/// Two-level decoder. The coarse input is upsampled by 2 to meet the fine
/// input, the two are mixed along channels, and the result is upsampled by 4.
/// Both inputs must have `in_channels` channels.
#[derive(Debug)]
pub struct HalfQuarterDecoder {
    residual1: Residual,
    residual2: Residual,
    conv1: ConvTranspose2d,
    conv2: Conv2d,
    residual3: Residual,
    residual4: Residual,
    conv3: ConvTranspose2d,
    conv4: ConvTranspose2d,
}

impl HalfQuarterDecoder {
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        seed: Option<u64>,
    ) -> VqResult<Self> {
        ensure_positive(in_channels, "in_channels")?;
        ensure_positive(out_channels, "out_channels")?;
        let name = name.into();
        let mut rng = rng_from_optional(seed, &name);
        Ok(Self {
            residual1: Residual::new(format!("{name}::residual1"), in_channels, &mut rng)?,
            residual2: Residual::new(format!("{name}::residual2"), in_channels, &mut rng)?,
            conv1: ConvTranspose2d::doubling(
                format!("{name}::conv1"),
                in_channels,
                in_channels,
                &mut rng,
            )?,
            conv2: Conv2d::new(
                format!("{name}::conv2"),
                in_channels * 2,
                in_channels,
                (3, 3),
                (1, 1),
                (1, 1),
                &mut rng,
            )?,
            residual3: Residual::new(format!("{name}::residual3"), in_channels, &mut rng)?,
            residual4: Residual::new(format!("{name}::residual4"), in_channels, &mut rng)?,
            conv3: ConvTranspose2d::doubling(
                format!("{name}::conv3"),
                in_channels,
                in_channels,
                &mut rng,
            )?,
            conv4: ConvTranspose2d::doubling(
                format!("{name}::conv4"),
                in_channels,
                out_channels,
                &mut rng,
            )?,
        })
    }
}

impl Parameterized for HalfQuarterDecoder {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.residual1.visit_parameters(visitor)?;
        self.residual2.visit_parameters(visitor)?;
        self.conv1.visit_parameters(visitor)?;
        self.conv2.visit_parameters(visitor)?;
        self.residual3.visit_parameters(visitor)?;
        self.residual4.visit_parameters(visitor)?;
        self.conv3.visit_parameters(visitor)?;
        self.conv4.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.residual1.visit_parameters_mut(visitor)?;
        self.residual2.visit_parameters_mut(visitor)?;
        self.conv1.visit_parameters_mut(visitor)?;
        self.conv2.visit_parameters_mut(visitor)?;
        self.residual3.visit_parameters_mut(visitor)?;
        self.residual4.visit_parameters_mut(visitor)?;
        self.conv3.visit_parameters_mut(visitor)?;
        self.conv4.visit_parameters_mut(visitor)
    }
}

impl Decoder for HalfQuarterDecoder {
    fn num_inputs(&self) -> Option<usize> {
        Some(2)
    }

    fn forward(&self, inputs: &[Tensor]) -> VqResult<Tensor> {
        expect_inputs("HalfQuarterDecoder inputs", inputs, 2)?;
        let x = self.residual1.forward(&inputs[0])?;
        let x = self.residual2.forward(&x)?.relu()?;
        let x = self.conv1.forward(&x)?.relu()?;
        if x.shape() != inputs[1].shape() {
            return Err(VqError::ShapeMismatch {
                component: "HalfQuarterDecoder fine input",
                expected: format!("{:?}", x.shape()),
                got: format!("{:?}", inputs[1].shape()),
            });
        }
        let x = concat_channels(&[x, inputs[1].clone()])?;
        let x = self.conv2.forward(&x)?;
        let x = self.residual3.forward(&x)?;
        let x = self.residual4.forward(&x)?.relu()?;
        let x = self.conv3.forward(&x)?.relu()?;
        Ok(self.conv4.forward(&x)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unfinished;

    impl Parameterized for Unfinished {
        fn visit_parameters(
            &self,
            _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
        ) -> PureResult<()> {
            Ok(())
        }

        fn visit_parameters_mut(
            &mut self,
            _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
        ) -> PureResult<()> {
            Ok(())
        }
    }

    impl Decoder for Unfinished {}

    #[test]
    fn default_forward_is_not_implemented() {
        let err = Unfinished.forward(&[Tensor::zeros(&[1, 1, 1, 1])]).unwrap_err();
        assert_eq!(err, VqError::NotImplemented("Decoder::forward"));
        assert_eq!(Unfinished.num_inputs(), None);
    }

    #[test]
    fn quarter_decoder_multiplies_by_four() {
        let decoder = QuarterDecoder::new("dec", 4, 3, Some(1)).unwrap();
        let y = decoder.forward(&[Tensor::ones(&[2, 4, 2, 3])]).unwrap();
        assert_eq!(y.shape(), vec![2, 3, 8, 12]);
    }

    #[test]
    fn half_decoder_multiplies_by_two() {
        let decoder = HalfDecoder::new("dec", 4, 5, Some(2)).unwrap();
        let y = decoder.forward(&[Tensor::ones(&[1, 4, 3, 2])]).unwrap();
        assert_eq!(y.shape(), vec![1, 5, 6, 4]);
    }

    #[test]
    fn half_quarter_decoder_mixes_two_levels() {
        let decoder = HalfQuarterDecoder::new("dec", 2, 3, Some(3)).unwrap();
        let coarse = Tensor::ones(&[1, 2, 1, 2]);
        let fine = Tensor::ones(&[1, 2, 2, 4]);
        let y = decoder.forward(&[coarse.clone(), fine]).unwrap();
        assert_eq!(y.shape(), vec![1, 3, 8, 16]);

        let misplaced = Tensor::ones(&[1, 2, 3, 3]);
        assert!(matches!(
            decoder.forward(&[coarse, misplaced]),
            Err(VqError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn wrong_input_count_is_a_shape_error() {
        let decoder = HalfDecoder::new("dec", 2, 2, Some(4)).unwrap();
        let x = Tensor::ones(&[1, 2, 2, 2]);
        let err = decoder.forward(&[x.clone(), x]).unwrap_err();
        assert!(matches!(err, VqError::ShapeMismatch { .. }));
        assert!(matches!(
            decoder.forward(&[]),
            Err(VqError::ShapeMismatch { .. })
        ));
    }
}
