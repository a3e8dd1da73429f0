//! rps/src/logging.rs
//! Logging initialization.

use std::sync::Once;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::EnvFilter, fmt};

static LOG_INIT: Once = Once::new();

// Initialize logging once; RUST_LOG overrides the configured default.
pub fn init_logging(default: &str) {
    LOG_INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer());
        tracing::subscriber::set_global_default(subscriber).unwrap();
    });
}
