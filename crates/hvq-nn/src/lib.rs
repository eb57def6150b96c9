// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Hierarchical VQ-VAE built on the `hvq-tensor` autograd engine.
//!
//! Encoders shrink and quantize feature maps level by level; decoders rebuild
//! each level from the codes at and above it. [`VqVae::forward`] returns the
//! combined quantization and reconstruction loss, ready for `backward`.

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod io;
pub mod layers;
pub mod loss;
pub mod module;
pub mod trainer;
pub mod vq;

pub use config::{DecoderKind, EncoderKind, LevelConfig, VqVaeConfig};
pub use error::{VqError, VqResult};
pub use hierarchy::{
    Decoder, Encoder, HalfDecoder, HalfEncoder, HalfQuarterDecoder, QuarterDecoder,
    QuarterEncoder, VqVae, VqVaeLosses, DEFAULT_COMMITMENT,
};
pub use io::{load_bincode, load_json, save_bincode, save_json};
pub use layers::{Conv2d, ConvTranspose2d, Relu, Residual, Sequential};
pub use loss::{Loss, MeanSquaredError};
pub use module::{Module, Parameter, Parameterized};
pub use trainer::{EpochStats, StepStats, VqVaeTrainer};
pub use vq::{vq_loss, QuantizedOutput, Vq, VqLoss, VqOptions, DEFAULT_DEAD_RATE};

pub use hvq_tensor::{PureResult, Tensor, TensorError};

use hvq_config::tracing::InitError;

/// Installs the global tracing subscriber. A subscriber that is already in
/// place is kept and only logged.
pub fn init_tracing() -> Result<(), InitError> {
    match hvq_config::tracing::init_tracing() {
        Err(InitError::AlreadyInitialised) => {
            tracing::warn!("tracing subscriber already initialised");
            Ok(())
        }
        other => other,
    }
}
