// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter, Parameterized};
use hvq_tensor::ops::{conv2d, conv_transpose2d};
use hvq_tensor::{Conv2dGeometry, PureResult, Tensor, TensorError};
use rand::Rng;

fn validate_positive(value: usize, label: &'static str) -> PureResult<()> {
    if value == 0 {
        return Err(TensorError::InvalidValue { label });
    }
    Ok(())
}

/// Uniform `±1/sqrt(fan_in)` initialisation shared by both conv flavours.
fn init_weight<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> PureResult<Tensor> {
    let bound = 1.0 / (fan_in as f32).sqrt();
    Tensor::uniform(shape, bound, rng)
}

/// 2D convolution over NCHW feature maps.
pub struct Conv2d {
    weight: Parameter,
    bias: Parameter,
    in_channels: usize,
    out_channels: usize,
    kernel: (usize, usize),
    geometry: Conv2dGeometry,
}

impl core::fmt::Debug for Conv2d {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Conv2d({}->{},kernel={:?},stride={:?},padding={:?})",
            self.in_channels,
            self.out_channels,
            self.kernel,
            self.geometry.stride,
            self.geometry.padding
        )
    }
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        rng: &mut R,
    ) -> PureResult<Self> {
        validate_positive(in_channels, "in_channels")?;
        validate_positive(out_channels, "out_channels")?;
        validate_positive(kernel.0, "kernel_h")?;
        validate_positive(kernel.1, "kernel_w")?;
        let geometry = Conv2dGeometry::new(stride, padding)?;
        let name = name.into();
        let fan_in = in_channels * kernel.0 * kernel.1;
        let weight = init_weight(&[out_channels, in_channels, kernel.0, kernel.1], fan_in, rng)?;
        let bias = init_weight(&[out_channels], fan_in, rng)?;
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            bias: Parameter::new(format!("{name}::bias"), bias),
            in_channels,
            out_channels,
            kernel,
            geometry,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }
}

impl Parameterized for Conv2d {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        conv2d(
            input,
            self.weight.value(),
            self.bias.value(),
            self.geometry,
        )
    }
}

/// Transposed 2D convolution; weights are laid out `(in, out, kh, kw)`.
pub struct ConvTranspose2d {
    weight: Parameter,
    bias: Parameter,
    in_channels: usize,
    out_channels: usize,
    kernel: (usize, usize),
    geometry: Conv2dGeometry,
}

impl core::fmt::Debug for ConvTranspose2d {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "ConvTranspose2d({}->{},kernel={:?},stride={:?},padding={:?})",
            self.in_channels,
            self.out_channels,
            self.kernel,
            self.geometry.stride,
            self.geometry.padding
        )
    }
}

impl ConvTranspose2d {
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        rng: &mut R,
    ) -> PureResult<Self> {
        validate_positive(in_channels, "in_channels")?;
        validate_positive(out_channels, "out_channels")?;
        validate_positive(kernel.0, "kernel_h")?;
        validate_positive(kernel.1, "kernel_w")?;
        let geometry = Conv2dGeometry::new(stride, padding)?;
        let name = name.into();
        let fan_in = out_channels * kernel.0 * kernel.1;
        let weight = init_weight(&[in_channels, out_channels, kernel.0, kernel.1], fan_in, rng)?;
        let bias = init_weight(&[out_channels], fan_in, rng)?;
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            bias: Parameter::new(format!("{name}::bias"), bias),
            in_channels,
            out_channels,
            kernel,
            geometry,
        })
    }

    /// The usual ×2 upsampler: kernel 4, stride 2, padding 1.
    pub fn doubling<R: Rng + ?Sized>(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        rng: &mut R,
    ) -> PureResult<Self> {
        Self::new(name, in_channels, out_channels, (4, 4), (2, 2), (1, 1), rng)
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl Parameterized for ConvTranspose2d {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)
    }
}

impl Module for ConvTranspose2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        conv_transpose2d(
            input,
            self.weight.value(),
            self.bias.value(),
            self.geometry,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn conv_registers_named_parameters() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv2d::new("stem", 3, 8, (3, 3), (1, 1), (1, 1), &mut rng).unwrap();
        let state = conv.state_dict().unwrap();
        assert_eq!(state["stem::weight"].shape(), vec![8, 3, 3, 3]);
        assert_eq!(state["stem::bias"].shape(), vec![8]);
        let bound = 1.0 / 27f32.sqrt();
        assert!(state["stem::weight"].to_vec().iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn same_padding_keeps_resolution() {
        let mut rng = StdRng::seed_from_u64(1);
        let conv = Conv2d::new("same", 2, 4, (3, 3), (1, 1), (1, 1), &mut rng).unwrap();
        let y = conv.forward(&Tensor::ones(&[1, 2, 5, 7])).unwrap();
        assert_eq!(y.shape(), vec![1, 4, 5, 7]);
    }

    #[test]
    fn doubling_transpose_upsamples() {
        let mut rng = StdRng::seed_from_u64(2);
        let up = ConvTranspose2d::doubling("up", 4, 2, &mut rng).unwrap();
        let y = up.forward(&Tensor::ones(&[2, 4, 3, 3])).unwrap();
        assert_eq!(y.shape(), vec![2, 2, 6, 6]);
    }

    #[test]
    fn zero_channels_are_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(Conv2d::new("bad", 0, 4, (3, 3), (1, 1), (1, 1), &mut rng).is_err());
        assert!(ConvTranspose2d::new("bad", 4, 4, (4, 4), (0, 2), (1, 1), &mut rng).is_err());
    }
}
