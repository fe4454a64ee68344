//! Apply command implementation.
//!
//! `converge apply` loads the recipe, builds the engine and runs one
//! convergence pass, printing a line per step and a summary.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::cli::args::ApplyArgs;
use crate::config::{find_recipe, load_recipe};
use crate::engine::CancellationToken;
use crate::error::Result;
use crate::executor::{Executor, SystemExecutor};
use crate::state::RunRecord;
use crate::steps::build_engine;
use crate::ui::RunReporter;

use super::dispatcher::{Command, CommandResult};

/// The apply command implementation.
pub struct ApplyCommand {
    project_root: PathBuf,
    config: Option<PathBuf>,
    args: ApplyArgs,
    reporter: RunReporter,
    executor: Option<Arc<dyn Executor>>,
}

impl ApplyCommand {
    /// Create a new apply command.
    pub fn new(
        project_root: &Path,
        config: Option<PathBuf>,
        args: ApplyArgs,
        reporter: RunReporter,
    ) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config,
            args,
            reporter,
            executor: None,
        }
    }

    /// Use a specific executor instead of the system one.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Get the command arguments.
    pub fn args(&self) -> &ApplyArgs {
        &self.args
    }

    fn executor(&self) -> Result<Arc<dyn Executor>> {
        match &self.executor {
            Some(executor) => Ok(Arc::clone(executor)),
            None => Ok(Arc::new(SystemExecutor::new()?)),
        }
    }
}

impl Command for ApplyCommand {
    fn execute(&self, out: &mut dyn Write) -> Result<CommandResult> {
        let recipe_path = find_recipe(&self.project_root, self.config.as_deref());
        debug!("Loading recipe from {}", recipe_path.display());
        let recipe = load_recipe(&recipe_path)?;

        let overrides: HashMap<String, String> = self.args.vars.iter().cloned().collect();
        let engine = build_engine(&recipe, &recipe_path, &overrides, self.executor()?)?;

        let title = recipe
            .name
            .clone()
            .unwrap_or_else(|| recipe_path.display().to_string());
        writeln!(out, "{}", self.reporter.header(&title))?;

        let token = CancellationToken::new();
        let (done, watchdog) = match self.args.time_limit {
            Some(secs) => {
                let (tx, rx) = mpsc::channel::<()>();
                let limit = Duration::from_secs(secs);
                let watched = token.clone();
                let handle = thread::spawn(move || {
                    if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(limit) {
                        info!("Time limit of {}s reached, cancelling run", secs);
                        watched.cancel(format!("time limit of {}s reached", secs));
                    }
                });
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        let started = Utc::now();
        let result = engine.run_with_progress(&token, |event| {
            if let Some(line) = self.reporter.line(&event) {
                let _ = writeln!(out, "{}", line);
            }
        });

        drop(done);
        if let Some(handle) = watchdog {
            let _ = handle.join();
        }
        let result = result?;

        writeln!(out, "{}", self.reporter.summary(&result))?;

        if let Some(path) = &self.args.report {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                self.project_root.join(path)
            };
            RunRecord::from_result(recipe.name.as_deref(), started, &result).write(&path)?;
            debug!("Wrote run report to {}", path.display());
        }

        if result.is_converged() {
            Ok(CommandResult::success())
        } else {
            Ok(CommandResult::failure(1))
        }
    }
}
