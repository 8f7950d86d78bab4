//! A single long-lived TCP tunnel carrying multiplexed, encrypted frames,
//! and the byte-pump that drives one session's traffic across it.

mod pump;
mod tunnel;

pub use pump::*;
pub use tunnel::*;
