//! Structured logging init for the relay binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global `tracing` subscriber. Honors `RUST_LOG` if set;
/// otherwise defaults to `info`, raised to `debug` for this workspace's
/// crates when `debug` is true.
pub fn init(debug: bool) {
    let default_filter = if debug {
        "info,minerproxy_core=debug,minerproxy_crypto=debug,minerproxy_tunnel=debug,minerproxy_client=debug,minerproxy_server=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
