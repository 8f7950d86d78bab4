use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// Maximum length, in bytes, of the user-supplied shared secret.
pub const MAX_SECRET_LEN: usize = 32;

/// Default number of tunnels the client pool maintains per listen port.
pub const DEFAULT_TUNNELS_PER_PORT: usize = 10;

/// The pool never maintains fewer tunnels than this, regardless of what is
/// requested.
pub const MIN_TUNNELS_PER_PORT: usize = 2;

/// Default disconnect-notification threshold.
pub const DEFAULT_DISCONNECT_THRESHOLD: Duration = Duration::from_secs(360);

/// How often an otherwise-idle tunnel writer emits a `PING`.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A tunnel that has received no frame of any kind for this long is dead.
pub const TUNNEL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// A session with no bytes in either direction for this long is closed.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Deadline for a freshly connected tunnel to complete its handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconnect backoff bounds for the client tunnel pool.
pub const RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(1);
pub const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Startup gives up and escalates to a fatal error after this many failed
/// connection attempts for a single tunnel slot.
pub const STARTUP_MAX_ATTEMPTS: usize = 1000;

/// Maximum chunk size read from a local/upstream TCP side before it is
/// encrypted and framed.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Grace period given to in-flight tasks on process shutdown before a hard
/// abort.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Which half of the relay this process instance is acting as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Client,
    Server,
}

/// Validated, immutable configuration for one run of the relay.
///
/// Constructed once at startup; never mutated afterwards. The secret is
/// stored in its raw, unpadded form — [`minerproxy_crypto`]-equivalent
/// callers derive the padded cipher key from it exactly once.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    /// Client: local plaintext listen addresses. Server: the single
    /// tunnel-accept address (always exactly one element).
    pub listen_addrs: Vec<SocketAddr>,
    /// Client: the server's tunnel-accept address. Server: the default
    /// upstream mining pool address.
    pub remote_addr: SocketAddr,
    /// Client-only: per-listen-port upstream pool override, positional
    /// against `listen_addrs`. Empty when no overrides were given.
    pub pool_overrides: Vec<SocketAddr>,
    pub secret: String,
    pub tunnels_per_port: usize,
    pub disconnect_threshold: Duration,
    pub debug: bool,
    pub stats_addr: Option<SocketAddr>,
}

impl Config {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: Mode,
        listen_addrs: Vec<SocketAddr>,
        remote_addr: SocketAddr,
        pool_overrides: Vec<SocketAddr>,
        secret: String,
        tunnels_per_port: usize,
        disconnect_threshold: Duration,
        debug: bool,
        stats_addr: Option<SocketAddr>,
    ) -> Result<Self, ConfigError> {
        if listen_addrs.is_empty() {
            return Err(ConfigError::NoListenAddresses);
        }
        if secret.len() > MAX_SECRET_LEN {
            return Err(ConfigError::SecretTooLong(secret.len()));
        }
        if mode == Mode::Client && !pool_overrides.is_empty() && pool_overrides.len() != listen_addrs.len() {
            return Err(ConfigError::ArityMismatch {
                listen: listen_addrs.len(),
                pool: pool_overrides.len(),
            });
        }

        Ok(Config {
            mode,
            listen_addrs,
            remote_addr,
            pool_overrides,
            secret,
            tunnels_per_port: tunnels_per_port.max(MIN_TUNNELS_PER_PORT),
            disconnect_threshold,
            debug,
            stats_addr,
        })
    }

    /// The upstream pool address to use for a given listen-port index,
    /// honoring a client-supplied override when present.
    pub fn pool_addr_for(&self, listen_index: usize) -> SocketAddr {
        self.pool_overrides
            .get(listen_index)
            .copied()
            .unwrap_or(self.remote_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn rejects_mismatched_arity() {
        let err = Config::new(
            Mode::Client,
            vec![addr("127.0.0.1:9999")],
            addr("127.0.0.1:9998"),
            vec![addr("127.0.0.1:1"), addr("127.0.0.1:2")],
            "secret".into(),
            10,
            DEFAULT_DISCONNECT_THRESHOLD,
            false,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ArityMismatch { .. }));
    }

    #[test]
    fn rejects_oversized_secret() {
        let err = Config::new(
            Mode::Server,
            vec![addr("127.0.0.1:9998")],
            addr("127.0.0.1:8000"),
            vec![],
            "x".repeat(33),
            10,
            DEFAULT_DISCONNECT_THRESHOLD,
            false,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SecretTooLong(33)));
    }

    #[test]
    fn clamps_tunnel_count_to_minimum() {
        let cfg = Config::new(
            Mode::Client,
            vec![addr("127.0.0.1:9999")],
            addr("127.0.0.1:9998"),
            vec![],
            "secret".into(),
            1,
            DEFAULT_DISCONNECT_THRESHOLD,
            false,
            None,
        )
        .unwrap();
        assert_eq!(cfg.tunnels_per_port, MIN_TUNNELS_PER_PORT);
    }

    #[test]
    fn pool_override_takes_precedence_over_default_remote() {
        let cfg = Config::new(
            Mode::Client,
            vec![addr("127.0.0.1:9999"), addr("127.0.0.1:9998")],
            addr("127.0.0.1:7000"),
            vec![addr("127.0.0.1:1"), addr("127.0.0.1:2")],
            "secret".into(),
            10,
            DEFAULT_DISCONNECT_THRESHOLD,
            false,
            None,
        )
        .unwrap();
        assert_eq!(cfg.pool_addr_for(0), addr("127.0.0.1:1"));
        assert_eq!(cfg.pool_addr_for(1), addr("127.0.0.1:2"));
    }
}
