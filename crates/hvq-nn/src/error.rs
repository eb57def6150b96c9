// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use hvq_tensor::TensorError;
use thiserror::Error;

pub type VqResult<T> = Result<T, VqError>;

/// Failures raised while building or running a VQ-VAE hierarchy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VqError {
    /// Invalid construction parameters.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A tensor disagrees with what a component expects.
    #[error("shape mismatch in {component}: expected {expected}, got {got}")]
    ShapeMismatch {
        component: &'static str,
        expected: String,
        got: String,
    },
    /// An abstract contract method was called without an override.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl VqError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        VqError::Configuration(message.into())
    }
}

/// Rejects zero sizes with a [`VqError::Configuration`].
pub(crate) fn ensure_positive(value: usize, label: &str) -> VqResult<()> {
    if value == 0 {
        return Err(VqError::config(format!("{label} must be positive")));
    }
    Ok(())
}
