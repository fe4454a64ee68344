//! Step actions.

use crate::engine::ActionContext;
use crate::error::{ConvergeError, Result};
use crate::executor::{files, CommandSpec, Executor};
use regex::Regex;
use std::path::PathBuf;

use tracing::{debug, warn};

/// A resolved action, ready to apply.
///
/// `package` actions have already been expanded into [`Operation::Command`]
/// through the recipe's install template.
#[derive(Debug, Clone)]
pub enum Operation {
    Command(CommandSpec),
    Directory {
        path: PathBuf,
        mode: Option<u32>,
    },
    WriteFile {
        path: PathBuf,
        content: String,
        mode: Option<u32>,
    },
    DeleteFile(PathBuf),
    ReplaceLine {
        path: PathBuf,
        pattern: Regex,
        replacement: String,
    },
    Fetch {
        url: String,
        dest: PathBuf,
        sha256: Option<String>,
    },
}

impl Operation {
    /// Apply the operation.
    ///
    /// Commands and downloads go through `executor` and observe `ctx`; file
    /// edits are quick and only check `ctx` before starting.
    pub fn apply(&self, executor: &dyn Executor, ctx: &ActionContext) -> Result<()> {
        ctx.check()?;
        match self {
            Operation::Command(spec) => {
                let output = executor.run_command(spec, ctx)?;
                if !output.success {
                    let stderr = output.stderr.trim();
                    if !stderr.is_empty() {
                        warn!("{}", stderr);
                    }
                }
                output.into_result(&spec.command)?;
            }
            Operation::Directory { path, mode } => files::create_dir(path, *mode)?,
            Operation::WriteFile {
                path,
                content,
                mode,
            } => files::write_file(path, content, *mode)?,
            Operation::DeleteFile(path) => files::delete_file(path)?,
            Operation::ReplaceLine {
                path,
                pattern,
                replacement,
            } => {
                let changed = files::replace_lines(path, pattern, replacement)?;
                debug!("Replaced {} line(s) in {}", changed, path.display());
            }
            Operation::Fetch { url, dest, sha256 } => {
                executor.fetch(url, dest, ctx)?;
                if let Some(expected) = sha256 {
                    verify_checksum(dest, expected)?;
                }
            }
        }
        Ok(())
    }

    /// Short human-readable form, used in logs.
    pub fn describe(&self) -> String {
        match self {
            Operation::Command(spec) => format!("run `{}`", spec.command),
            Operation::Directory { path, .. } => format!("create {}", path.display()),
            Operation::WriteFile { path, .. } => format!("write {}", path.display()),
            Operation::DeleteFile(path) => format!("delete {}", path.display()),
            Operation::ReplaceLine { path, .. } => format!("edit {}", path.display()),
            Operation::Fetch { url, dest, .. } => {
                format!("fetch {} to {}", url, dest.display())
            }
        }
    }
}

/// Check a downloaded file, removing it when the digest is wrong.
fn verify_checksum(path: &std::path::Path, expected: &str) -> Result<()> {
    let actual = files::sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        return Ok(());
    }
    files::delete_file(path)?;
    Err(ConvergeError::ChecksumMismatch {
        path: path.to_path_buf(),
        expected: expected.to_string(),
        actual,
    })
}
