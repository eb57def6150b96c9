// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{Conv2d, Relu, Sequential};
use crate::module::{Module, Parameter, Parameterized};
use hvq_tensor::{PureResult, Tensor};
use rand::Rng;

/// `x + conv1x1(relu(conv3x3(relu(x))))` with a constant channel count.
#[derive(Debug)]
pub struct Residual {
    branch: Sequential,
    channels: usize,
}

impl Residual {
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        channels: usize,
        rng: &mut R,
    ) -> PureResult<Self> {
        let name = name.into();
        let branch = Sequential::new()
            .with(Relu::new())
            .with(Conv2d::new(
                format!("{name}::conv3x3"),
                channels,
                channels,
                (3, 3),
                (1, 1),
                (1, 1),
                rng,
            )?)
            .with(Relu::new())
            .with(Conv2d::new(
                format!("{name}::conv1x1"),
                channels,
                channels,
                (1, 1),
                (1, 1),
                (0, 0),
                rng,
            )?);
        Ok(Self { branch, channels })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl Parameterized for Residual {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.branch.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.branch.visit_parameters_mut(visitor)
    }
}

impl Module for Residual {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        input.add(&self.branch.forward(input)?)
    }
}
