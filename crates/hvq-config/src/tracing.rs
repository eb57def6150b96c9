// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: Mutex<bool> = Mutex::new(false);
static CHROME_GUARD: OnceLock<Mutex<Option<tracing_chrome::FlushGuard>>> = OnceLock::new();

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. When
/// `HVQ_TRACE_CHROME` names a file, spans are also written there in the
/// Chrome trace-event format; call [`flush_chrome_trace`] before exit so the
/// file is complete.
///
/// Only a successful install marks tracing as initialised. If another
/// subscriber already owns the global slot, every call reports
/// [`InitError::Subscriber`].
pub fn init_tracing() -> Result<(), InitError> {
    let mut initialised = INITIALISED
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if *initialised {
        return Err(InitError::AlreadyInitialised);
    }
    let chrome_path = chrome_trace_path()?;

    let ansi = std::io::stdout().is_terminal();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi);

    match chrome_path {
        Some(path) => {
            let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
                .file(path)
                .include_args(true)
                .build();
            Registry::default()
                .with(filter)
                .with(fmt_layer)
                .with(chrome_layer)
                .try_init()
                .map_err(|err| InitError::Subscriber(err.to_string()))?;
            store_chrome_guard(guard);
        }
        None => {
            Registry::default()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|err| InitError::Subscriber(err.to_string()))?;
        }
    }

    *initialised = true;
    Ok(())
}

fn store_chrome_guard(guard: tracing_chrome::FlushGuard) {
    let cell = CHROME_GUARD.get_or_init(|| Mutex::new(None));
    let mut slot = cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(guard);
}

/// Flushes and closes the Chrome trace file, if one was installed. Returns
/// whether a trace was open.
pub fn flush_chrome_trace() -> bool {
    let Some(cell) = CHROME_GUARD.get() else {
        return false;
    };
    let mut slot = cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.take().is_some()
}

fn chrome_trace_path() -> Result<Option<PathBuf>, InitError> {
    match std::env::var("HVQ_TRACE_CHROME") {
        Ok(raw) if !raw.trim().is_empty() => Ok(Some(PathBuf::from(raw.trim()))),
        Ok(_) => Ok(None),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(InitError::Env(err)),
    }
}

/// Errors emitted when configuring the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("failed to read HVQ_TRACE_CHROME: {0}")]
    Env(std::env::VarError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn second_initialisation_is_reported() {
        init_tracing().unwrap();
        assert!(matches!(
            init_tracing(),
            Err(InitError::AlreadyInitialised)
        ));
    }

    #[test]
    fn flushing_closes_the_chrome_trace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let (_layer, guard) = tracing_chrome::ChromeLayerBuilder::<Registry>::new()
            .file(&path)
            .build();
        store_chrome_guard(guard);

        assert!(flush_chrome_trace());
        assert!(!flush_chrome_trace());
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.trim_start().starts_with('['), "{written}");
    }
}
