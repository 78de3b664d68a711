//! Tracing subscriber setup for hosts embedding the miner.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a compact subscriber. `RUST_LOG` overrides the default level.
/// A second call is a no-op.
pub fn init(verbose: bool) {
    let default = if verbose {
        "skill_miner=debug"
    } else {
        "skill_miner=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .try_init();
}
