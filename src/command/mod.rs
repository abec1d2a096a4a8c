//! IRC commands understood by the agent.

mod parse;
mod serialize;
mod types;

pub use types::Command;
