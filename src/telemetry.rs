//! Structured logging setup.
//!
//! The runtime itself only emits `tracing` events; installing a subscriber is
//! the host application's choice. [`init`] is a convenience for binaries and
//! tests that just want formatted output honoring `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install a process-wide formatted `tracing` subscriber.
///
/// Honors `RUST_LOG`, defaulting to `agenttrail=info`. Safe to call more than
/// once; subsequent calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agenttrail=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
