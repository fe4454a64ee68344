//! Side effects on the host.
//!
//! Guards and actions reach the machine through the [`Executor`] trait, so
//! recipe steps can be exercised against a fake in tests:
//!
//! - [`command`] - shell commands with output capture, timeout and kill
//! - [`fetch`] - HTTP downloads into place
//! - [`files`] - file probes and edits
//!
//! File probes and edits are plain functions; only commands and downloads,
//! the operations that leave the process, go through the trait.

pub mod command;
pub mod fetch;
pub mod files;

pub use command::{execute, execute_check, CommandOutput, CommandSpec};
pub use fetch::HttpFetcher;

use crate::engine::ActionContext;
use crate::error::Result;
use std::path::Path;

/// Runs commands and downloads on behalf of steps.
pub trait Executor: Send + Sync {
    /// Run a shell command, honouring the context's deadline and cancellation.
    ///
    /// A non-zero exit is reported in the output, not as an error.
    fn run_command(&self, spec: &CommandSpec, ctx: &ActionContext) -> Result<CommandOutput>;

    /// Download `url` to `dest`, replacing it atomically.
    fn fetch(&self, url: &str, dest: &Path, ctx: &ActionContext) -> Result<()>;
}

/// Executor backed by the real shell and network.
pub struct SystemExecutor {
    fetcher: HttpFetcher,
}

impl SystemExecutor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new()?,
        })
    }
}

impl Executor for SystemExecutor {
    fn run_command(&self, spec: &CommandSpec, ctx: &ActionContext) -> Result<CommandOutput> {
        execute(spec, ctx)
    }

    fn fetch(&self, url: &str, dest: &Path, ctx: &ActionContext) -> Result<()> {
        self.fetcher.download(url, dest, ctx)
    }
}
