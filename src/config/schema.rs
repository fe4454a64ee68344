//! Recipe schema definitions.
//!
//! This module contains the struct definitions that map to the YAML recipe
//! format. Every string field of a guard or action may contain `${var}`
//! references, resolved when the recipe is turned into engine steps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::engine::{Notification, RunMode};

/// Root structure of a recipe file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeConfig {
    /// Recipe name (for display purposes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Inline variables
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub vars: HashMap<String, serde_yaml::Value>,

    /// File of tuning variables, relative to the recipe's directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vars_file: Option<PathBuf>,

    /// Global settings
    pub settings: Settings,

    /// Steps in declaration order
    pub steps: Vec<StepConfig>,
}

/// Settings that apply to every step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Timeout in seconds for steps that do not set one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<u64>,

    /// Command templates backing `package` actions and guards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<PackageCommands>,
}

/// Package handling expressed as shell templates.
///
/// `${package}` is replaced with the package name. No package manager is
/// built in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageCommands {
    /// Exits 0 when the package is installed
    pub check: String,
    /// Installs the package
    pub install: String,
}

/// A single declared step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step name
    pub name: String,

    /// Step description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// What to do when the guard is not satisfied
    pub action: ActionSpec,

    /// Explicit "already satisfied?" check; overrides the action's implied guard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<GuardSpec>,

    /// Action timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Steps to run after this one applies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifies: Vec<Notification>,

    #[serde(default)]
    pub run_mode: RunMode,
}

/// State-changing operation of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Run a shell command; non-zero exit is a failure
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },

    /// Install a package through `settings.packages.install`
    Package { name: String },

    /// Create a directory (and parents), optionally setting an octal mode
    Directory {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },

    /// Write a file with the given content
    WriteFile {
        path: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },

    /// Remove a file if present
    DeleteFile { path: String },

    /// Rewrite every line matching `pattern` with `replacement`
    ///
    /// `replacement` may use `$1`-style capture references.
    ReplaceLine {
        path: String,
        pattern: String,
        replacement: String,
    },

    /// Download a URL to a destination path
    Fetch {
        url: String,
        dest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    },
}

/// Predicate deciding whether a step's target state already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardSpec {
    /// A file or directory exists
    FileExists { path: String },

    /// Nothing exists at the path
    FileMissing { path: String },

    /// A directory exists
    DirectoryExists { path: String },

    /// A file has a line matching the regex
    FileContains { path: String, pattern: String },

    /// A file's content equals the given text
    FileContent { path: String, content: String },

    /// A file's sha256 matches
    FileChecksum { path: String, sha256: String },

    /// A file was modified within the last `max_age_minutes`
    FileFresh { path: String, max_age_minutes: u64 },

    /// Every line matching `pattern` already equals its replacement
    LinesReplaced {
        path: String,
        pattern: String,
        replacement: String,
    },

    /// A shell command exits 0
    CommandSucceeds {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },

    /// `settings.packages.check` exits 0 for the package
    PackageInstalled { name: String },

    /// All checks must pass
    All { checks: Vec<GuardSpec> },

    /// Any check passing is sufficient
    Any { checks: Vec<GuardSpec> },

    /// Inverts a check
    Not { check: Box<GuardSpec> },
}
