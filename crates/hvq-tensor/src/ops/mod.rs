// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Differentiable operations. Each op computes its forward value eagerly and
//! records a backward node only when one of its inputs is tracked.

pub mod conv;
pub mod elementwise;
pub mod index;
pub mod reduce;
pub mod shape;

pub use conv::{conv2d, conv_transpose2d, Conv2dGeometry};
pub use elementwise::{add, mul, relu, scale, square, sub};
pub use index::{index_select_rows, nearest_rows, pairwise_sq_distances};
pub use reduce::{mean, mse, sum};
pub use shape::{concat_channels, pad2d, permute, reshape};

use crate::error::{PureResult, TensorError};
use ndarray::{ArrayD, IxDyn};

/// Builds an array from row-major values, mapping shape errors.
pub(crate) fn array(shape: &[usize], data: Vec<f32>) -> PureResult<ArrayD<f32>> {
    let got = data.len();
    ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| TensorError::DataLength {
        expected: shape.iter().product(),
        got,
    })
}

/// Row-major copy of an array regardless of its memory layout.
pub(crate) fn flat(array: &ArrayD<f32>) -> Vec<f32> {
    array.iter().copied().collect()
}

pub(crate) fn ensure_same_shape(left: &[usize], right: &[usize]) -> PureResult<()> {
    if left != right {
        return Err(TensorError::shapes(left, right));
    }
    Ok(())
}
