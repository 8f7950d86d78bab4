//! miner-proxy core types
//!
//! This crate defines the wire format, session identifiers and shared
//! configuration used by both the client and server halves of the relay.

mod config;
mod error;
mod frame;
mod hello;
mod session;

pub use config::*;
pub use error::*;
pub use frame::*;
pub use hello::*;
pub use session::*;
