//! The client half of the relay: a pool of tunnels to the server and a
//! plaintext TCP listener that hands each accepted connection a session
//! on the least-loaded tunnel.

mod error;
mod listener;
mod pool;

pub use error::ClientError;
pub use listener::ClientListener;
pub use pool::TunnelPool;
