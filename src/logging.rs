//! Diagnostic logging setup for the binary.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "downsort=debug" } else { "downsort=info" }
}

/// Installs a stderr `fmt` subscriber filtered by `RUST_LOG`.
///
/// Call once near the start of `main`. Calling it again is a no-op.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(stderr_layer.with_filter(filter))
        .try_init();
}
