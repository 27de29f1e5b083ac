//! CLI module for Claude Code process spawning, supervision and output extraction.

mod command;
mod extract;
mod handle;
mod supervisor;

pub use command::*;
pub use extract::*;
pub use handle::*;
pub use supervisor::*;
