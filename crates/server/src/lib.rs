//! The server half of the relay: accepts tunnels from clients, verifies
//! their handshake, and demultiplexes frames into upstream mining-pool
//! connections.

mod error;
mod listener;
mod session;
mod stats;

pub use error::ServerError;
pub use listener::ServerListener;
pub use stats::{DisconnectEvent, DisconnectSink, LoggingDisconnectSink, LoggingStatsSink, StatsSink, StatsSnapshot};
