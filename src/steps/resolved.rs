//! Resolved step ready for execution.
//!
//! A ResolvedStep is a recipe [`StepConfig`] with every `${var}` reference
//! substituted, relative paths anchored at the recipe directory, package
//! actions expanded through the recipe's templates, and the action's
//! implied guard attached when none was declared.

use crate::config::interpolation::{resolve_string, InterpolationContext};
use crate::config::{ActionSpec, GuardSpec, PackageCommands, Settings, StepConfig};
use crate::engine::{Notification, RunMode};
use crate::error::{ConvergeError, Result};
use crate::executor::{files, CommandSpec};
use crate::steps::check::Check;
use crate::steps::operation::Operation;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A fully resolved step.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    /// Step name (unique within the recipe).
    pub name: String,

    /// Description.
    pub description: Option<String>,

    /// What to do when the guard is unsatisfied.
    pub operation: Operation,

    /// Declared or implied guard. `None` means the action always runs.
    pub check: Option<Check>,

    /// Action timeout.
    pub timeout: Option<Duration>,

    /// Notification edges.
    pub notifies: Vec<Notification>,

    pub run_mode: RunMode,
}

/// Turns step configs into resolved steps.
pub struct StepResolver<'a> {
    vars: &'a InterpolationContext,
    settings: &'a Settings,
    base_dir: &'a Path,
}

impl<'a> StepResolver<'a> {
    /// Create a resolver. Relative paths resolve against `base_dir`.
    pub fn new(vars: &'a InterpolationContext, settings: &'a Settings, base_dir: &'a Path) -> Self {
        Self {
            vars,
            settings,
            base_dir,
        }
    }

    /// Resolve a single step.
    pub fn resolve(&self, config: &StepConfig) -> Result<ResolvedStep> {
        let operation = self.operation(&config.action)?;
        let check = match &config.guard {
            Some(guard) => Some(self.check(guard)?),
            None => self.implied_check(&config.action, &operation)?,
        };
        let timeout = config
            .timeout
            .or(self.settings.default_timeout)
            .map(Duration::from_secs);

        Ok(ResolvedStep {
            name: config.name.clone(),
            description: config.description.clone(),
            operation,
            check,
            timeout,
            notifies: config.notifies.clone(),
            run_mode: config.run_mode,
        })
    }

    fn operation(&self, action: &ActionSpec) -> Result<Operation> {
        Ok(match action {
            ActionSpec::Command { command, cwd, env } => {
                Operation::Command(self.command(command, cwd.as_deref(), env)?)
            }
            ActionSpec::Package { name } => {
                let name = self.string(name)?;
                let template = &self.packages()?.install;
                Operation::Command(self.package_command(template, &name)?)
            }
            ActionSpec::Directory { path, mode } => Operation::Directory {
                path: self.path(path)?,
                mode: self.mode(mode.as_deref())?,
            },
            ActionSpec::WriteFile {
                path,
                content,
                mode,
            } => Operation::WriteFile {
                path: self.path(path)?,
                content: self.string(content)?,
                mode: self.mode(mode.as_deref())?,
            },
            ActionSpec::DeleteFile { path } => Operation::DeleteFile(self.path(path)?),
            ActionSpec::ReplaceLine {
                path,
                pattern,
                replacement,
            } => Operation::ReplaceLine {
                path: self.path(path)?,
                pattern: self.regex(pattern)?,
                replacement: self.string(replacement)?,
            },
            ActionSpec::Fetch { url, dest, sha256 } => Operation::Fetch {
                url: self.string(url)?,
                dest: self.path(dest)?,
                sha256: sha256.as_deref().map(|s| self.string(s)).transpose()?,
            },
        })
    }

    fn check(&self, guard: &GuardSpec) -> Result<Check> {
        Ok(match guard {
            GuardSpec::FileExists { path } => Check::Exists(self.path(path)?),
            GuardSpec::FileMissing { path } => Check::Missing(self.path(path)?),
            GuardSpec::DirectoryExists { path } => Check::DirectoryExists(self.path(path)?),
            GuardSpec::FileContains { path, pattern } => Check::Contains {
                path: self.path(path)?,
                pattern: self.regex(pattern)?,
            },
            GuardSpec::FileContent { path, content } => Check::Content {
                path: self.path(path)?,
                content: self.string(content)?,
            },
            GuardSpec::FileChecksum { path, sha256 } => Check::Checksum {
                path: self.path(path)?,
                sha256: self.string(sha256)?,
            },
            GuardSpec::FileFresh {
                path,
                max_age_minutes,
            } => Check::Fresh {
                path: self.path(path)?,
                max_age: Duration::from_secs(max_age_minutes.saturating_mul(60)),
            },
            GuardSpec::LinesReplaced {
                path,
                pattern,
                replacement,
            } => Check::LinesReplaced {
                path: self.path(path)?,
                pattern: self.regex(pattern)?,
                replacement: self.string(replacement)?,
            },
            GuardSpec::CommandSucceeds { command, cwd } => {
                Check::Command(self.command(command, cwd.as_deref(), &HashMap::new())?)
            }
            GuardSpec::PackageInstalled { name } => {
                let name = self.string(name)?;
                let template = &self.packages()?.check;
                Check::Command(self.package_command(template, &name)?)
            }
            GuardSpec::All { checks } => Check::All(self.checks(checks)?),
            GuardSpec::Any { checks } => Check::Any(self.checks(checks)?),
            GuardSpec::Not { check } => Check::Not(Box::new(self.check(check)?)),
        })
    }

    fn checks(&self, guards: &[GuardSpec]) -> Result<Vec<Check>> {
        guards.iter().map(|g| self.check(g)).collect()
    }

    /// Guard an action converges on when the recipe declares none.
    fn implied_check(&self, action: &ActionSpec, operation: &Operation) -> Result<Option<Check>> {
        Ok(match (action, operation) {
            (ActionSpec::Package { name }, _) => {
                let name = self.string(name)?;
                let template = &self.packages()?.check;
                Some(Check::Command(self.package_command(template, &name)?))
            }
            (_, Operation::Directory { path, .. }) => Some(Check::DirectoryExists(path.clone())),
            (_, Operation::WriteFile { path, content, .. }) => Some(Check::Content {
                path: path.clone(),
                content: content.clone(),
            }),
            (_, Operation::DeleteFile(path)) => Some(Check::Missing(path.clone())),
            (
                _,
                Operation::ReplaceLine {
                    path,
                    pattern,
                    replacement,
                },
            ) => Some(Check::LinesReplaced {
                path: path.clone(),
                pattern: pattern.clone(),
                replacement: replacement.clone(),
            }),
            (_, Operation::Fetch { dest, sha256, .. }) => Some(match sha256 {
                Some(sha256) => Check::Checksum {
                    path: dest.clone(),
                    sha256: sha256.clone(),
                },
                None => Check::Exists(dest.clone()),
            }),
            (_, Operation::Command(_)) => None,
        })
    }

    fn string(&self, input: &str) -> Result<String> {
        resolve_string(input, self.vars)
    }

    fn path(&self, input: &str) -> Result<PathBuf> {
        let path = PathBuf::from(self.string(input)?);
        Ok(if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        })
    }

    fn regex(&self, input: &str) -> Result<Regex> {
        let pattern = self.string(input)?;
        Regex::new(&pattern).map_err(|e| ConvergeError::ConfigValidationError {
            message: format!("invalid pattern '{}': {}", pattern, e),
        })
    }

    fn mode(&self, input: Option<&str>) -> Result<Option<u32>> {
        input
            .map(|mode| files::parse_mode(&self.string(mode)?))
            .transpose()
    }

    /// Commands run in the recipe directory unless they name a `cwd`.
    fn command(
        &self,
        command: &str,
        cwd: Option<&str>,
        env: &HashMap<String, String>,
    ) -> Result<CommandSpec> {
        let cwd = match cwd {
            Some(cwd) => self.path(cwd)?,
            None => self.base_dir.to_path_buf(),
        };
        let env = env
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.string(v)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(CommandSpec {
            command: self.string(command)?,
            cwd: Some(cwd),
            env,
        })
    }

    fn packages(&self) -> Result<&'a PackageCommands> {
        self.settings
            .packages
            .as_ref()
            .ok_or_else(|| ConvergeError::ConfigValidationError {
                message: "package steps need settings.packages".to_string(),
            })
    }

    fn package_command(&self, template: &str, package: &str) -> Result<CommandSpec> {
        let vars = self.vars.clone().with_override("package", package);
        Ok(CommandSpec {
            command: resolve_string(template, &vars)?,
            cwd: Some(self.base_dir.to_path_buf()),
            env: HashMap::new(),
        })
    }
}
