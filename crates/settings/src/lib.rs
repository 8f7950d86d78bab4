//! CLI argument parsing and `Config` validation for the relay binary.

mod args;
mod machine;

pub use args::{ClientArgs, ModeArgs, RawArgs, ServerArgs};
pub use machine::machine_id;
