//! Guard checks.
//!
//! A [`Check`] is a [`GuardSpec`](crate::config::GuardSpec) with its
//! variables resolved, paths anchored and regexes compiled. Evaluating it
//! answers "is the step's target state already in place?".

use crate::engine::ActionContext;
use crate::error::Result;
use crate::executor::{files, CommandSpec, Executor};
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

/// A resolved guard predicate.
#[derive(Debug, Clone)]
pub enum Check {
    Exists(PathBuf),
    Missing(PathBuf),
    DirectoryExists(PathBuf),
    Contains {
        path: PathBuf,
        pattern: Regex,
    },
    Content {
        path: PathBuf,
        content: String,
    },
    Checksum {
        path: PathBuf,
        sha256: String,
    },
    Fresh {
        path: PathBuf,
        max_age: Duration,
    },
    LinesReplaced {
        path: PathBuf,
        pattern: Regex,
        replacement: String,
    },
    /// Satisfied when the command exits 0.
    Command(CommandSpec),
    All(Vec<Check>),
    Any(Vec<Check>),
    Not(Box<Check>),
}

impl Check {
    /// Evaluate the check against the host.
    ///
    /// `All` short-circuits on the first unsatisfied check and `Any` on the
    /// first satisfied one. An error from any check is returned as is.
    pub fn evaluate(&self, executor: &dyn Executor) -> Result<bool> {
        self.evaluate_within(executor, &ActionContext::default())
    }

    /// Evaluate the check, stopping guard commands once `ctx` is cancelled.
    pub fn evaluate_within(&self, executor: &dyn Executor, ctx: &ActionContext) -> Result<bool> {
        let satisfied = match self {
            Check::Exists(path) => files::exists(path)?,
            Check::Missing(path) => !files::exists(path)?,
            Check::DirectoryExists(path) => files::is_dir(path)?,
            Check::Contains { path, pattern } => files::contains_match(path, pattern)?,
            Check::Content { path, content } => files::content_equals(path, content)?,
            Check::Checksum { path, sha256 } => files::checksum_matches(path, sha256)?,
            Check::Fresh { path, max_age } => files::modified_within(path, *max_age)?,
            Check::LinesReplaced {
                path,
                pattern,
                replacement,
            } => files::lines_replaced(path, pattern, replacement)?,
            Check::Command(spec) => executor.run_command(spec, ctx)?.success,
            Check::All(checks) => {
                for check in checks {
                    if !check.evaluate_within(executor, ctx)? {
                        return Ok(false);
                    }
                }
                true
            }
            Check::Any(checks) => {
                for check in checks {
                    if check.evaluate_within(executor, ctx)? {
                        return Ok(true);
                    }
                }
                false
            }
            Check::Not(check) => !check.evaluate_within(executor, ctx)?,
        };

        debug!("Check {} -> {}", self.describe(), satisfied);
        Ok(satisfied)
    }

    /// Short human-readable form, used in logs.
    pub fn describe(&self) -> String {
        match self {
            Check::Exists(path) => format!("exists {}", path.display()),
            Check::Missing(path) => format!("missing {}", path.display()),
            Check::DirectoryExists(path) => format!("directory {}", path.display()),
            Check::Contains { path, pattern } => {
                format!("{} contains /{}/", path.display(), pattern)
            }
            Check::Content { path, .. } => format!("content of {}", path.display()),
            Check::Checksum { path, .. } => format!("checksum of {}", path.display()),
            Check::Fresh { path, max_age } => format!(
                "{} modified within {}m",
                path.display(),
                max_age.as_secs() / 60
            ),
            Check::LinesReplaced { path, pattern, .. } => {
                format!("{} lines /{}/ replaced", path.display(), pattern)
            }
            Check::Command(spec) => format!("`{}`", spec.command),
            Check::All(checks) => format!("all of {}", checks.len()),
            Check::Any(checks) => format!("any of {}", checks.len()),
            Check::Not(check) => format!("not {}", check.describe()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CancellationToken;
    use crate::error::ConvergeError;
    use crate::executor::CommandOutput;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Answers commands from a fixed exit status and records what ran.
    struct ScriptedExecutor {
        succeed: bool,
        ran: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(succeed: bool) -> Self {
            Self {
                succeed,
                ran: Mutex::new(Vec::new()),
            }
        }
    }

    impl Executor for ScriptedExecutor {
        fn run_command(&self, spec: &CommandSpec, ctx: &ActionContext) -> Result<CommandOutput> {
            ctx.check()?;
            self.ran.lock().unwrap().push(spec.command.clone());
            Ok(CommandOutput {
                exit_code: Some(if self.succeed { 0 } else { 1 }),
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
                success: self.succeed,
            })
        }

        fn fetch(&self, _url: &str, _dest: &Path, _ctx: &ActionContext) -> Result<()> {
            unreachable!("checks never fetch")
        }
    }

    #[test]
    fn file_checks() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("bcheck");
        fs::write(&file, "built\n").unwrap();
        let executor = ScriptedExecutor::new(true);

        assert!(Check::Exists(file.clone()).evaluate(&executor).unwrap());
        assert!(!Check::Missing(file.clone()).evaluate(&executor).unwrap());
        assert!(!Check::DirectoryExists(file.clone()).evaluate(&executor).unwrap());
        assert!(Check::DirectoryExists(temp.path().to_path_buf())
            .evaluate(&executor)
            .unwrap());
        assert!(Check::Contains {
            path: file.clone(),
            pattern: Regex::new("^built$").unwrap(),
        }
        .evaluate(&executor)
        .unwrap());
        assert!(Check::Content {
            path: file,
            content: "built\n".to_string(),
        }
        .evaluate(&executor)
        .unwrap());
    }

    #[test]
    fn command_check_follows_exit_status() {
        let spec = CommandSpec::new("dpkg -s git");

        let ok = ScriptedExecutor::new(true);
        assert!(Check::Command(spec.clone()).evaluate(&ok).unwrap());
        assert_eq!(*ok.ran.lock().unwrap(), vec!["dpkg -s git"]);

        let fail = ScriptedExecutor::new(false);
        assert!(!Check::Command(spec).evaluate(&fail).unwrap());
    }

    #[test]
    fn combinators_short_circuit() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");
        let executor = ScriptedExecutor::new(true);
        let command = Check::Command(CommandSpec::new("probe"));

        let all = Check::All(vec![Check::Exists(missing.clone()), command.clone()]);
        assert!(!all.evaluate(&executor).unwrap());
        assert!(executor.ran.lock().unwrap().is_empty());

        let any = Check::Any(vec![Check::Missing(missing.clone()), command]);
        assert!(any.evaluate(&executor).unwrap());
        assert!(executor.ran.lock().unwrap().is_empty());

        let not = Check::Not(Box::new(Check::Exists(missing)));
        assert!(not.evaluate(&executor).unwrap());
    }

    #[test]
    fn nested_command_check_sees_cancellation() {
        let token = CancellationToken::new();
        token.cancel("time limit reached");
        let ctx = ActionContext::new(token.child(), None);
        let executor = ScriptedExecutor::new(true);
        let check = Check::Not(Box::new(Check::All(vec![Check::Command(CommandSpec::new(
            "dpkg -s git",
        ))])));

        let err = check.evaluate_within(&executor, &ctx).unwrap_err();

        assert!(matches!(err, ConvergeError::Cancelled { .. }));
        assert!(executor.ran.lock().unwrap().is_empty());
    }

    #[test]
    fn describe_is_readable() {
        let check = Check::Not(Box::new(Check::Command(CommandSpec::new("test -f x"))));
        assert_eq!(check.describe(), "not `test -f x`");
    }
}
