//! Process bootstrap helpers for embedders of the engine.

use tracing_subscriber::EnvFilter;

/// Initialise structured logging. `REVERIE_LOG` overrides the filter;
/// defaults to `info`. Safe to call more than once — later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("REVERIE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
