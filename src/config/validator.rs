//! Recipe validation rules.
//!
//! This module validates a recipe for correctness before anything runs:
//! - Step names must be non-empty and unique
//! - Notification targets must reference existing steps
//! - Commands must be non-empty
//! - Regexes, octal modes and checksums must be well-formed
//! - `package` actions need `settings.packages`
//!
//! Values containing `${var}` references are checked after interpolation
//! instead, when the resolved value is used.

use crate::config::interpolation::has_interpolation;
use crate::config::schema::{ActionSpec, GuardSpec, RecipeConfig};
use crate::error::{ConvergeError, Result};
use std::collections::HashSet;

/// Validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Rule identifier
    pub rule: String,
    /// Human-readable error message
    pub message: String,
    /// Step name if error is step-specific
    pub step: Option<String>,
}

impl ValidationError {
    fn step(rule: &str, step: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            message,
            step: Some(step.to_string()),
        }
    }
}

/// Validate a recipe and return all errors.
///
/// Collects every problem rather than stopping at the first one.
pub fn validate_recipe(recipe: &RecipeConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if recipe.settings.default_timeout == Some(0) {
        errors.push(ValidationError {
            rule: "zero-timeout".to_string(),
            message: "settings.default_timeout must be greater than zero".to_string(),
            step: None,
        });
    }

    errors.extend(validate_names(recipe));

    let names: HashSet<&str> = recipe.steps.iter().map(|s| s.name.as_str()).collect();
    let has_packages = recipe.settings.packages.is_some();

    for step in &recipe.steps {
        for notification in &step.notifies {
            if !names.contains(notification.target.as_str()) {
                errors.push(ValidationError::step(
                    "unknown-notify-target",
                    &step.name,
                    format!(
                        "Step '{}' notifies '{}' which does not exist",
                        step.name, notification.target
                    ),
                ));
            }
        }

        if step.timeout == Some(0) {
            errors.push(ValidationError::step(
                "zero-timeout",
                &step.name,
                format!("Step '{}' has a zero timeout", step.name),
            ));
        }

        errors.extend(validate_action(&step.name, &step.action, has_packages));
        if let Some(guard) = &step.guard {
            errors.extend(validate_guard(&step.name, guard, has_packages));
        }
    }

    errors
}

/// Validate a recipe, failing with every problem joined into one error.
pub fn validate(recipe: &RecipeConfig) -> Result<()> {
    let errors = validate_recipe(recipe);
    if errors.is_empty() {
        return Ok(());
    }

    let message = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    Err(ConvergeError::ConfigValidationError { message })
}

fn validate_names(recipe: &RecipeConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (i, step) in recipe.steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            errors.push(ValidationError {
                rule: "empty-name".to_string(),
                message: format!("Step #{} has an empty name", i + 1),
                step: None,
            });
        } else if !seen.insert(step.name.as_str()) {
            errors.push(ValidationError::step(
                "duplicate-step",
                &step.name,
                format!("Step '{}' is declared more than once", step.name),
            ));
        }
    }

    errors
}

fn validate_action(step: &str, action: &ActionSpec, has_packages: bool) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match action {
        ActionSpec::Command { command, .. } => {
            if command.trim().is_empty() {
                errors.push(ValidationError::step(
                    "empty-command",
                    step,
                    format!("Step '{}' has an empty command", step),
                ));
            }
        }
        ActionSpec::Package { name } => {
            if !has_packages {
                errors.push(missing_packages(step));
            }
            if name.trim().is_empty() {
                errors.push(ValidationError::step(
                    "empty-package",
                    step,
                    format!("Step '{}' installs a package with an empty name", step),
                ));
            }
        }
        ActionSpec::Directory { mode, .. } | ActionSpec::WriteFile { mode, .. } => {
            if let Some(mode) = mode {
                errors.extend(check_mode(step, mode));
            }
        }
        ActionSpec::ReplaceLine { pattern, .. } => {
            errors.extend(check_pattern(step, pattern));
        }
        ActionSpec::Fetch { sha256, .. } => {
            if let Some(sha256) = sha256 {
                errors.extend(check_sha256(step, sha256));
            }
        }
        ActionSpec::DeleteFile { .. } => {}
    }

    errors
}

fn validate_guard(step: &str, guard: &GuardSpec, has_packages: bool) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match guard {
        GuardSpec::FileContains { pattern, .. } | GuardSpec::LinesReplaced { pattern, .. } => {
            errors.extend(check_pattern(step, pattern));
        }
        GuardSpec::FileChecksum { sha256, .. } => {
            errors.extend(check_sha256(step, sha256));
        }
        GuardSpec::CommandSucceeds { command, .. } => {
            if command.trim().is_empty() {
                errors.push(ValidationError::step(
                    "empty-command",
                    step,
                    format!("Step '{}' has a guard with an empty command", step),
                ));
            }
        }
        GuardSpec::PackageInstalled { .. } => {
            if !has_packages {
                errors.push(missing_packages(step));
            }
        }
        GuardSpec::All { checks } | GuardSpec::Any { checks } => {
            if checks.is_empty() {
                errors.push(ValidationError::step(
                    "empty-checks",
                    step,
                    format!("Step '{}' has a combined guard with no checks", step),
                ));
            }
            for check in checks {
                errors.extend(validate_guard(step, check, has_packages));
            }
        }
        GuardSpec::Not { check } => {
            errors.extend(validate_guard(step, check, has_packages));
        }
        GuardSpec::FileExists { .. }
        | GuardSpec::FileMissing { .. }
        | GuardSpec::DirectoryExists { .. }
        | GuardSpec::FileContent { .. }
        | GuardSpec::FileFresh { .. } => {}
    }

    errors
}

fn missing_packages(step: &str) -> ValidationError {
    ValidationError::step(
        "missing-package-commands",
        step,
        format!(
            "Step '{}' uses packages but settings.packages is not configured",
            step
        ),
    )
}

fn check_pattern(step: &str, pattern: &str) -> Option<ValidationError> {
    if has_interpolation(pattern) {
        return None;
    }
    regex::Regex::new(pattern).err().map(|e| {
        ValidationError::step(
            "invalid-pattern",
            step,
            format!("Step '{}' has an invalid pattern: {}", step, e),
        )
    })
}

fn check_mode(step: &str, mode: &str) -> Option<ValidationError> {
    if has_interpolation(mode) || u32::from_str_radix(mode, 8).is_ok_and(|m| m <= 0o7777) {
        return None;
    }
    Some(ValidationError::step(
        "invalid-mode",
        step,
        format!("Step '{}' has an invalid octal mode '{}'", step, mode),
    ))
}

fn check_sha256(step: &str, digest: &str) -> Option<ValidationError> {
    if has_interpolation(digest)
        || (digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return None;
    }
    Some(ValidationError::step(
        "invalid-checksum",
        step,
        format!("Step '{}' has a malformed sha256 '{}'", step, digest),
    ))
}
