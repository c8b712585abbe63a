//! Diagnostics for the generator.
//!
//! Stdout carries the pipeline document and nothing else, so all tracing
//! output goes to stderr.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn` if unset.
///
/// ```bash
/// RUST_LOG=kite_matrix=debug pipeline-generate ..
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
