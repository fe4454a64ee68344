//! Command-line interface for converge.
//!
//! - [`args`] - Argument definitions using clap derive macros
//! - [`commands`] - Command implementations

pub mod args;
pub mod commands;

pub use args::{ApplyArgs, Cli, Commands};
pub use commands::{ApplyCommand, Command, CommandDispatcher, CommandResult};
