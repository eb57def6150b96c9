// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Seeding for everything random in the model: codebook draws, conv weight
//! draws and the rows picked when dead codebook entries are revived.
//!
//! `HVQ_DETERMINISTIC=1` derives every labelled RNG from
//! `HVQ_DETERMINISTIC_SEED` (default 42). Otherwise unseeded components draw
//! from OS entropy.

use rand::{rngs::StdRng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

pub const ENABLE_VAR: &str = "HVQ_DETERMINISTIC";
pub const SEED_VAR: &str = "HVQ_DETERMINISTIC_SEED";
pub const DEFAULT_BASE_SEED: u64 = 42;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeterminismConfig {
    pub enabled: bool,
    pub base_seed: u64,
}

impl Default for DeterminismConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_seed: DEFAULT_BASE_SEED,
        }
    }
}

fn truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "off" | "no"
    )
}

impl DeterminismConfig {
    /// Reads the policy through `lookup`, which maps a variable name to its
    /// value. Unparsable seeds fall back to [`DEFAULT_BASE_SEED`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup(ENABLE_VAR).map(|v| truthy(&v)).unwrap_or(false);
        let base_seed = lookup(SEED_VAR)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_BASE_SEED);
        Self { enabled, base_seed }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Stable seed for a component label such as `encoder0::vq`.
    pub fn seed_for<L: Hash + ?Sized>(&self, label: &L) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.base_seed.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    }

    /// RNG for `label` under this policy.
    pub fn rng(&self, label: &str) -> StdRng {
        if self.enabled {
            StdRng::seed_from_u64(self.seed_for(label))
        } else {
            StdRng::from_entropy()
        }
    }
}

static CONFIG: OnceLock<DeterminismConfig> = OnceLock::new();

/// Process-wide policy, read from the environment on first use.
pub fn config() -> &'static DeterminismConfig {
    CONFIG.get_or_init(DeterminismConfig::from_env)
}

/// Pins the process-wide policy. Returns the policy actually in force, which
/// differs from `cfg` when [`config`] already ran.
pub fn configure(cfg: DeterminismConfig) -> &'static DeterminismConfig {
    CONFIG.get_or_init(|| cfg)
}

pub fn rng_from_label(label: &str) -> StdRng {
    config().rng(label)
}

/// An explicit seed wins over the process policy.
pub fn rng_from_optional(seed: Option<u64>, label: &str) -> StdRng {
    match seed {
        Some(value) => StdRng::seed_from_u64(value),
        None => rng_from_label(label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn draws(mut rng: StdRng) -> Vec<u32> {
        (0..4).map(|_| rng.gen()).collect()
    }

    #[test]
    fn unset_variables_disable_seeding() {
        let cfg = DeterminismConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, DeterminismConfig::default());
    }

    #[test]
    fn flag_and_seed_are_parsed() {
        let cfg = DeterminismConfig::from_lookup(lookup(&[(ENABLE_VAR, "on"), (SEED_VAR, " 1337 ")]));
        assert!(cfg.enabled);
        assert_eq!(cfg.base_seed, 1337);

        let off = DeterminismConfig::from_lookup(lookup(&[(ENABLE_VAR, "False"), (SEED_VAR, "x")]));
        assert!(!off.enabled);
        assert_eq!(off.base_seed, DEFAULT_BASE_SEED);
    }

    #[test]
    fn enabled_policy_separates_components() {
        let cfg = DeterminismConfig {
            enabled: true,
            base_seed: 7,
        };
        assert_eq!(draws(cfg.rng("encoder0::vq")), draws(cfg.rng("encoder0::vq")));
        assert_ne!(cfg.seed_for("encoder0::vq"), cfg.seed_for("encoder1::vq"));
    }

    #[test]
    fn explicit_seed_ignores_the_label() {
        assert_eq!(
            draws(rng_from_optional(Some(9), "encoder0::vq")),
            draws(rng_from_optional(Some(9), "decoder1"))
        );
    }
}
