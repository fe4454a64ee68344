//! CLI command implementations.
//!
//! Each command implements the [`Command`] trait, which provides a uniform
//! interface for executing commands and reporting results. Commands are
//! dispatched via [`CommandDispatcher`].

pub mod apply;
pub mod dispatcher;

pub use apply::ApplyCommand;
pub use dispatcher::{Command, CommandDispatcher, CommandResult};
