// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

/// Result alias used throughout the tensor crate.
pub type PureResult<T> = Result<T, TensorError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    /// Data provided to a constructor does not match the requested shape.
    #[error("data length mismatch: expected {expected}, got {got}")]
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    #[error("shape mismatch: left={left:?}, right={right:?} cannot be combined")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },
    /// An operator expected a tensor of a specific rank.
    #[error("{op} expects a rank-{expected} tensor, got shape {shape:?}")]
    RankMismatch {
        op: &'static str,
        expected: usize,
        shape: Vec<usize>,
    },
    /// Backpropagation can only be seeded implicitly from a single value.
    #[error("backward() needs a single-element output, got shape {shape:?}")]
    NonScalarBackward { shape: Vec<usize> },
    /// A gather index fell outside the table.
    #[error("index {index} out of range for {len} rows")]
    IndexOutOfRange { index: usize, len: usize },
    /// Computation received an empty input which would otherwise divide by zero.
    #[error("{0} must not be empty for this computation")]
    EmptyInput(&'static str),
    /// Generic configuration violation (zero stride, bad permutation, ...).
    #[error("invalid value for {label}")]
    InvalidValue { label: &'static str },
    /// Attempted to load a parameter that was missing from a snapshot.
    #[error("parameter `{name}` is missing from the state dict")]
    MissingParameter { name: String },
    /// Wrapper around I/O failures when persisting or restoring tensors.
    #[error("i/o error: {message}")]
    IoError { message: String },
    /// Wrapper around serde failures when persisting or restoring tensors.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

impl TensorError {
    pub(crate) fn shapes(left: &[usize], right: &[usize]) -> Self {
        TensorError::ShapeMismatch {
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}
