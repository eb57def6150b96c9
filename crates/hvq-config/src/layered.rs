// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration files merged in order: base, then site, then run.
#[derive(Clone, Debug, Default)]
pub struct ConfigLayering {
    pub base: Option<PathBuf>,
    pub site: Option<PathBuf>,
    pub run: Option<PathBuf>,
}

impl ConfigLayering {
    /// Discovers layers from `HVQ_CONFIG_*` variables, falling back to
    /// `base.toml`, `site.toml`, and `run.json` under the config root.
    /// Missing files are skipped.
    pub fn discover() -> Self {
        let root = std::env::var("HVQ_CONFIG_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_root());

        let pick = |var: &str, file: &str| {
            std::env::var(var)
                .map(PathBuf::from)
                .ok()
                .or_else(|| Some(root.join(file)))
                .and_then(existing_path)
        };

        ConfigLayering {
            base: pick("HVQ_CONFIG_BASE", "base.toml"),
            site: pick("HVQ_CONFIG_SITE", "site.toml"),
            run: pick("HVQ_CONFIG_RUN", "run.json"),
        }
    }

    pub fn with_base<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base = Some(path.into());
        self
    }

    pub fn with_site<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.site = Some(path.into());
        self
    }

    pub fn with_run<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.run = Some(path.into());
        self
    }
}

fn existing_path(path: PathBuf) -> Option<PathBuf> {
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

fn default_root() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("hvq"),
        None => PathBuf::from("."),
    }
}

/// Result of merging the configured layers.
#[derive(Clone, Debug)]
pub struct LayeredConfig {
    layering: ConfigLayering,
    value: Value,
}

impl LayeredConfig {
    /// Loads and merges the layers. TOML for base/site, JSON for run. Later
    /// layers win key by key; tables are merged recursively.
    pub fn load(layering: ConfigLayering) -> Result<Self, LayeredConfigError> {
        let mut value = Value::Object(Default::default());
        let layers = [
            ("base", layering.base.as_deref(), Format::Toml),
            ("site", layering.site.as_deref(), Format::Toml),
            ("run", layering.run.as_deref(), Format::Json),
        ];
        for (layer, path, format) in layers {
            let Some(path) = path else { continue };
            if let Some(parsed) = format.load(path)? {
                merge(&mut value, &parsed);
                debug!(layer, path = %path.display(), "applied configuration layer");
            }
        }
        Ok(LayeredConfig { layering, value })
    }

    /// Builds a config straight from an in-memory value.
    pub fn from_value(value: Value) -> Self {
        LayeredConfig {
            layering: ConfigLayering::default(),
            value,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn layering(&self) -> &ConfigLayering {
        &self.layering
    }

    /// Deserialises the section at `path`. Returns `Ok(None)` when any key
    /// along the path is missing.
    pub fn section<T>(&self, path: &[&str]) -> Result<Option<T>, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        let mut node = &self.value;
        for key in path {
            match node {
                Value::Object(map) => match map.get(*key) {
                    Some(value) => node = value,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            }
        }
        serde_json::from_value(node.clone()).map(Some)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayeredConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse JSON {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn read(path: &Path) -> Result<Option<String>, LayeredConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|source| LayeredConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Clone, Copy)]
enum Format {
    Toml,
    Json,
}

impl Format {
    fn load(self, path: &Path) -> Result<Option<Value>, LayeredConfigError> {
        let Some(text) = read(path)? else {
            return Ok(None);
        };
        let json = |source: serde_json::Error| LayeredConfigError::Json {
            path: path.to_path_buf(),
            source,
        };
        match self {
            Format::Toml => {
                let value: toml::Value =
                    toml::from_str(&text).map_err(|source| LayeredConfigError::Toml {
                        path: path.to_path_buf(),
                        source,
                    })?;
                serde_json::to_value(value).map(Some).map_err(json)
            }
            Format::Json => serde_json::from_str(&text).map(Some).map_err(json),
        }
    }
}

fn merge(dest: &mut Value, src: &Value) {
    match (dest, src) {
        (Value::Object(dest_map), Value::Object(src_map)) => {
            for (key, value) in src_map {
                match dest_map.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        dest_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => {
            *slot = value.clone();
        }
    }
}
