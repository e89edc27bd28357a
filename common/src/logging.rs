//! Logging initialization shared by every binary in the workspace.
//!
//! Library crates never call this; only `mend-cli`'s `main` does, once,
//! matching the teacher's convention of a single `tracing-subscriber`
//! installation point at the top of the process.

use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` fmt layer honoring `RUST_LOG`, defaulting
/// to `info` when unset.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
