// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-level runtime configuration shared by the hierarchical VQ-VAE
//! crates: deterministic seeding, tracing setup, and layered config files.

pub mod determinism;
pub mod layered;
pub mod tracing;

pub use determinism::{rng_from_label, rng_from_optional, DeterminismConfig};
pub use layered::{ConfigLayering, LayeredConfig, LayeredConfigError};
