//! Opt-in subscriber init helper for binary consumers of this crate.
//!
//! The library itself never installs a global subscriber (a component
//! embedded in someone else's process does not get to own that decision); it
//! only emits `tracing` events. This helper is here for callers that do want
//! a ready-made setup: JSON in production, a pretty console format otherwise.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber. `json` selects the production
/// formatter; otherwise a human-readable pretty formatter is used.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}
