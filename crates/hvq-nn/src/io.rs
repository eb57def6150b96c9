// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Parameter snapshots keyed by parameter name, in JSON or bincode.
//!
//! A snapshot stores every parameter as `(shape, row-major data)`. Loading
//! goes through [`Parameterized::load_state_dict`], so a missing name or a
//! shape change is an error rather than a silent partial restore.

use crate::module::Parameterized;
use hvq_tensor::{PureResult, Tensor, TensorError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Sorted by name so JSON checkpoints diff cleanly.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    parameters: BTreeMap<String, StoredTensor>,
}

impl Snapshot {
    fn capture(state: &HashMap<String, Tensor>) -> Self {
        let parameters = state
            .iter()
            .map(|(name, tensor)| {
                let stored = StoredTensor {
                    shape: tensor.shape(),
                    data: tensor.to_vec(),
                };
                (name.clone(), stored)
            })
            .collect();
        Self { parameters }
    }

    fn restore(self) -> PureResult<HashMap<String, Tensor>> {
        self.parameters
            .into_iter()
            .map(|(name, stored)| -> PureResult<(String, Tensor)> {
                Ok((name, Tensor::from_vec(&stored.shape, stored.data)?))
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug)]
enum Format {
    Json,
    Bincode,
}

impl Format {
    fn label(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Bincode => "bincode",
        }
    }

    fn write(self, snapshot: &Snapshot, path: &Path) -> PureResult<()> {
        let writer = BufWriter::new(File::create(path).map_err(io_error)?);
        match self {
            Format::Json => serde_json::to_writer_pretty(writer, snapshot).map_err(serde_error),
            Format::Bincode => bincode::serialize_into(writer, snapshot).map_err(serde_error),
        }
    }

    fn read(self, path: &Path) -> PureResult<Snapshot> {
        let reader = BufReader::new(File::open(path).map_err(io_error)?);
        match self {
            Format::Json => serde_json::from_reader(reader).map_err(serde_error),
            Format::Bincode => bincode::deserialize_from(reader).map_err(serde_error),
        }
    }
}

fn io_error(err: std::io::Error) -> TensorError {
    TensorError::IoError {
        message: err.to_string(),
    }
}

fn serde_error(err: impl ToString) -> TensorError {
    TensorError::SerializationError {
        message: err.to_string(),
    }
}

fn save<M: Parameterized + ?Sized>(module: &M, path: &Path, format: Format) -> PureResult<()> {
    let snapshot = Snapshot::capture(&module.state_dict()?);
    format.write(&snapshot, path)?;
    info!(
        path = %path.display(),
        format = format.label(),
        parameters = snapshot.parameters.len(),
        "saved checkpoint"
    );
    Ok(())
}

fn load<M: Parameterized + ?Sized>(module: &mut M, path: &Path, format: Format) -> PureResult<()> {
    let state = format.read(path)?.restore()?;
    module.load_state_dict(&state)?;
    info!(
        path = %path.display(),
        format = format.label(),
        parameters = state.len(),
        "loaded checkpoint"
    );
    Ok(())
}

pub fn save_state_dict_json<P: AsRef<Path>>(
    state: &HashMap<String, Tensor>,
    path: P,
) -> PureResult<()> {
    Format::Json.write(&Snapshot::capture(state), path.as_ref())
}

pub fn load_state_dict_json<P: AsRef<Path>>(path: P) -> PureResult<HashMap<String, Tensor>> {
    Format::Json.read(path.as_ref())?.restore()
}

pub fn save_state_dict_bincode<P: AsRef<Path>>(
    state: &HashMap<String, Tensor>,
    path: P,
) -> PureResult<()> {
    Format::Bincode.write(&Snapshot::capture(state), path.as_ref())
}

pub fn load_state_dict_bincode<P: AsRef<Path>>(path: P) -> PureResult<HashMap<String, Tensor>> {
    Format::Bincode.read(path.as_ref())?.restore()
}

pub fn save_json<M: Parameterized + ?Sized, P: AsRef<Path>>(module: &M, path: P) -> PureResult<()> {
    save(module, path.as_ref(), Format::Json)
}

pub fn load_json<M: Parameterized + ?Sized, P: AsRef<Path>>(
    module: &mut M,
    path: P,
) -> PureResult<()> {
    load(module, path.as_ref(), Format::Json)
}

pub fn save_bincode<M: Parameterized + ?Sized, P: AsRef<Path>>(
    module: &M,
    path: P,
) -> PureResult<()> {
    save(module, path.as_ref(), Format::Bincode)
}

pub fn load_bincode<M: Parameterized + ?Sized, P: AsRef<Path>>(
    module: &mut M,
    path: P,
) -> PureResult<()> {
    load(module, path.as_ref(), Format::Bincode)
}
