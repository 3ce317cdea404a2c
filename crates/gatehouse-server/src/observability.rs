// Tracing initialization with a reloadable level filter.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Installs the global subscriber at `info`.
pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing_with_level(level: &str) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Applies the configured level once the file is loaded.
///
/// Does nothing when `RUST_LOG` is set, so an operator override survives.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        if let Err(e) = handle.modify(|f| *f = EnvFilter::new(level)) {
            tracing::warn!(error = %e, level, "Failed to apply logging level");
        }
    }
}
