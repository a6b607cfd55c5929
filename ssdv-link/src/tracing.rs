//! Thin wrapper around `tracing` so call sites just `use crate::tracing::prelude::*;`.

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` formatter with an `EnvFilter`.
///
/// Defaults to `info`; `verbose` raises the default to `debug` so per-packet
/// and per-batch events (which are logged at `debug!`/`trace!`) show up
/// without requiring callers to know the `RUST_LOG` syntax.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
