use thiserror::Error;

/// Errors raised while validating a [`crate::Config`].
///
/// Fatal at startup: the process never enters the client/server loop with
/// an invalid config.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("listen addresses and pool overrides must pair up 1:1, got {listen} listen addresses and {pool} pool overrides")]
    ArityMismatch { listen: usize, pool: usize },

    #[error("shared secret must be at most 32 bytes, got {0}")]
    SecretTooLong(usize),

    #[error("invalid address '{0}': {1}")]
    InvalidAddress(String, String),

    #[error("no listen addresses configured")]
    NoListenAddresses,
}

/// Errors that terminate a single tunnel. Never escalate past the tunnel's
/// owning pool/listener.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("frame is corrupt: {0}")]
    CorruptFrame(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("tunnel is dead")]
    Dead,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that terminate a single session. Never escalate past the session
/// manager.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("tunnel carrying this session died")]
    TunnelDead,

    #[error("upstream pool unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("local i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session payload failed to decrypt: {0}")]
    Corrupt(String),

    #[error("session idle for longer than the configured timeout")]
    Idle,
}
