// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pure Rust differentiable arrays.
//!
//! Tensors are dense `f32` n-d arrays backed by `ndarray`. Every op that
//! touches a tracked tensor records a [`BackwardNode`] on the output, and
//! [`Tensor::backward`] walks the recorded graph in reverse topological order,
//! accumulating gradients into every tracked tensor it reaches.
//! [`Tensor::detach`] cuts the graph: the returned tensor carries the same
//! values but never receives or forwards gradients.

pub mod autograd;
pub mod error;
pub mod ops;
pub mod tensor;

pub use autograd::{run_backward, BackwardNode, GradFn};
pub use error::{PureResult, TensorError};
pub use ops::conv::Conv2dGeometry;
pub use tensor::Tensor;
