//! Logging and metrics.

pub mod metrics;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "provisionctl=info,secret_provisioner=info";

/// Install the fmt subscriber; `RUST_LOG` overrides the default filter.
///
/// Logs go to stderr so `--output json` on stdout stays machine readable.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("tracing subscriber already installed: {e}");
    }
}
