// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod mean_squared_error;

pub use mean_squared_error::MeanSquaredError;

use hvq_tensor::{PureResult, Tensor};

/// Differentiable objective. The returned scalar stays on the autograd tape,
/// so gradients come from calling `backward` on it.
pub trait Loss {
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor>;
}
