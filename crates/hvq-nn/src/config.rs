// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Typed model description, loadable from the `model` section of a
//! [`LayeredConfig`].
//!
//! Levels are listed bottom (finest) to top. Level `i` owns the encoder that
//! maps `in_channels` to `latent_channels`, and the decoder that rebuilds the
//! level's input from its own code and every code above it.

use crate::error::{ensure_positive, VqError, VqResult};
use crate::hierarchy::{
    Decoder, Encoder, HalfDecoder, HalfEncoder, HalfQuarterDecoder, QuarterDecoder,
    QuarterEncoder, VqVae, DEFAULT_COMMITMENT,
};
use crate::vq::{validate_commitment, VqOptions, DEFAULT_DEAD_RATE};
use hvq_config::LayeredConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    Quarter,
    Half,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    Quarter,
    Half,
    HalfQuarter,
}

impl DecoderKind {
    fn num_inputs(self) -> usize {
        match self {
            DecoderKind::Quarter | DecoderKind::Half => 1,
            DecoderKind::HalfQuarter => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub encoder: EncoderKind,
    pub decoder: DecoderKind,
    pub in_channels: usize,
    pub latent_channels: usize,
    pub num_latents: usize,
    pub dead_rate: usize,
    pub seed: Option<u64>,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderKind::Quarter,
            decoder: DecoderKind::Quarter,
            in_channels: 3,
            latent_channels: 128,
            num_latents: 512,
            dead_rate: DEFAULT_DEAD_RATE,
            seed: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VqVaeConfig {
    pub commitment: f32,
    pub levels: Vec<LevelConfig>,
}

impl Default for VqVaeConfig {
    /// Two levels for RGB images: ÷4 then ÷2 on the way up, with the bottom
    /// decoder mixing both codes.
    fn default() -> Self {
        Self {
            commitment: DEFAULT_COMMITMENT,
            levels: vec![
                LevelConfig {
                    encoder: EncoderKind::Quarter,
                    decoder: DecoderKind::HalfQuarter,
                    in_channels: 3,
                    ..LevelConfig::default()
                },
                LevelConfig {
                    encoder: EncoderKind::Half,
                    decoder: DecoderKind::Half,
                    in_channels: 128,
                    ..LevelConfig::default()
                },
            ],
        }
    }
}

impl VqVaeConfig {
    /// Reads the `model` section, falling back to [`VqVaeConfig::default`]
    /// when it is absent.
    pub fn from_layered(config: &LayeredConfig) -> VqResult<Self> {
        let parsed = config
            .section::<VqVaeConfig>(&["model"])
            .map_err(|err| VqError::config(format!("invalid model section: {err}")))?;
        Ok(parsed.unwrap_or_default())
    }

    /// Checks channel chaining, decoder placement and sizes.
    pub fn validate(&self) -> VqResult<()> {
        validate_commitment(self.commitment)?;
        let levels = self.levels.len();
        if levels == 0 {
            return Err(VqError::config("a hierarchy needs at least one level"));
        }
        for (index, level) in self.levels.iter().enumerate() {
            ensure_positive(level.in_channels, "in_channels")?;
            ensure_positive(level.latent_channels, "latent_channels")?;
            ensure_positive(level.num_latents, "num_latents")?;
            ensure_positive(level.dead_rate, "dead_rate")?;
            if index > 0 && level.in_channels != self.levels[index - 1].latent_channels {
                return Err(VqError::config(format!(
                    "level {index} takes {} channels but level {} produces {}",
                    level.in_channels,
                    index - 1,
                    self.levels[index - 1].latent_channels
                )));
            }
            let fed = levels - index;
            if level.decoder.num_inputs() != fed {
                return Err(VqError::config(format!(
                    "level {index} decoder {:?} takes {} input(s) but receives {fed}",
                    level.decoder,
                    level.decoder.num_inputs()
                )));
            }
            if level.decoder == DecoderKind::HalfQuarter
                && self.levels[index + 1].latent_channels != level.latent_channels
            {
                return Err(VqError::config(format!(
                    "level {index} half_quarter decoder needs equal latent channels on both inputs"
                )));
            }
        }
        Ok(())
    }

    /// Builds the validated hierarchy. Encoders are named `encoder{level}`
    /// and decoders `decoder{position}`.
    pub fn build(&self) -> VqResult<VqVae> {
        self.validate()?;
        let levels = self.levels.len();
        let mut encoders: Vec<Box<dyn Encoder>> = Vec::with_capacity(levels);
        for (index, level) in self.levels.iter().enumerate() {
            let options = VqOptions {
                dead_rate: level.dead_rate,
                seed: level.seed,
            };
            let name = format!("encoder{index}");
            let encoder: Box<dyn Encoder> = match level.encoder {
                EncoderKind::Quarter => Box::new(QuarterEncoder::new(
                    name,
                    level.in_channels,
                    level.latent_channels,
                    level.num_latents,
                    options,
                )?),
                EncoderKind::Half => Box::new(HalfEncoder::new(
                    name,
                    level.in_channels,
                    level.latent_channels,
                    level.num_latents,
                    options,
                )?),
            };
            encoders.push(encoder);
        }

        let mut decoders: Vec<Box<dyn Decoder>> = Vec::with_capacity(levels);
        for position in 0..levels {
            let level = &self.levels[levels - 1 - position];
            let name = format!("decoder{position}");
            let seed = level.seed.map(|seed| seed.wrapping_add(2));
            let decoder: Box<dyn Decoder> = match level.decoder {
                DecoderKind::Quarter => Box::new(QuarterDecoder::new(
                    name,
                    level.latent_channels,
                    level.in_channels,
                    seed,
                )?),
                DecoderKind::Half => Box::new(HalfDecoder::new(
                    name,
                    level.latent_channels,
                    level.in_channels,
                    seed,
                )?),
                DecoderKind::HalfQuarter => Box::new(HalfQuarterDecoder::new(
                    name,
                    level.latent_channels,
                    level.in_channels,
                    seed,
                )?),
            };
            decoders.push(decoder);
        }
        debug!(levels, commitment = self.commitment, "built vq-vae hierarchy");
        VqVae::new(encoders, decoders)?.with_commitment(self.commitment)
    }
}
