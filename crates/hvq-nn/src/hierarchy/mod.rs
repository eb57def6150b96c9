// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod decoder;
pub mod encoder;
pub mod vqvae;

pub use decoder::{Decoder, HalfDecoder, HalfQuarterDecoder, QuarterDecoder};
pub use encoder::{Encoder, HalfEncoder, QuarterEncoder};
pub use vqvae::{VqVae, VqVaeLosses, DEFAULT_COMMITMENT};
