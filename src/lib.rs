//! Claude Relay - Supervised, retrying bridge from HTTP to the Claude Code CLI.

pub mod cli;
pub mod config;
pub mod relay;
pub mod server;
