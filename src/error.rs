//! Error types for converge operations.
//!
//! This module defines [`ConvergeError`], the primary error type used
//! throughout the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Configuration problems (duplicate steps, unresolved notification
//!   targets, bad recipes) are fatal and surface before any step runs
//! - Guard and action errors are turned into per-step failures by the engine
//! - Use `anyhow::Error` (via `ConvergeError::Other`) for unexpected errors

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Core error type for converge operations.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// A step with the same name is already registered.
    #[error("Duplicate step: '{name}' is already registered")]
    DuplicateStep { name: String },

    /// A notification references a step that does not exist.
    #[error("Step '{step}' notifies unknown step '{target}'")]
    UnknownNotifyTarget { step: String, target: String },

    /// Notification edges form a cycle that would never converge.
    #[error("Notification cycle detected: {cycle}")]
    NotificationCycle { cycle: String },

    /// Recipe file not found at expected location.
    #[error("Recipe not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Failed to parse recipe file.
    #[error("Failed to parse recipe at {path}: {message}")]
    ConfigParseError { path: PathBuf, message: String },

    /// Invalid recipe structure or values.
    #[error("Invalid configuration: {message}")]
    ConfigValidationError { message: String },

    /// A `${name}` reference that no variable source defines.
    #[error("Unknown variable '{name}'")]
    UnknownVariable { name: String },

    /// Shell command failed.
    #[error("Command failed with exit code {code:?}: {command}")]
    CommandFailed { command: String, code: Option<i32> },

    /// Download failed.
    #[error("Fetch of {url} failed: {message}")]
    FetchFailed { url: String, message: String },

    /// A file's sha256 did not match the expected digest.
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// An action exceeded its time bound.
    #[error("Timed out after {}s", after.as_secs_f64())]
    Timeout { after: Duration },

    /// The run was cancelled while the operation was in progress.
    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConvergeError {
    /// Whether this error means the recipe itself is wrong.
    ///
    /// Configuration errors are detected before the run starts and are
    /// never reported as step failures.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateStep { .. }
                | Self::UnknownNotifyTarget { .. }
                | Self::NotificationCycle { .. }
                | Self::ConfigNotFound { .. }
                | Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::UnknownVariable { .. }
        )
    }
}

/// Result type alias for converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;
