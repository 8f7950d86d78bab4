use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("no tunnels available in the pool")]
    PoolExhausted,

    #[error("tunnel handshake with server failed: {0}")]
    Handshake(String),

    #[error("tunnel error: {0}")]
    Tunnel(#[from] minerproxy_core::TunnelError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown requested before a tunnel could be established")]
    ShuttingDown,
}
