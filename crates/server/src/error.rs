use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("tunnel error: {0}")]
    Tunnel(#[from] minerproxy_core::TunnelError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
