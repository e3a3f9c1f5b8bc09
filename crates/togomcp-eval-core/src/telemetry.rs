//! Tracing setup for the evaluation harness.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber for a harness process.
///
/// Progress events from the runner land here, so the CLI calls this
/// before anything else. `RUST_LOG` overrides `level` when set; with
/// `json` the output is newline-delimited JSON suitable for piping
/// into log tooling alongside the exported results. Repeat calls are
/// no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
