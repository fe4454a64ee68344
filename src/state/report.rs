//! Run reports.
//!
//! A [`RunRecord`] captures one convergence run: when it started, how long
//! it took, how it ended and what happened to each step. `apply --report`
//! writes it as JSON.

use crate::engine::{Invocation, RunResult, StepOutcome};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A record of a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// When the run started.
    pub timestamp: DateTime<Utc>,

    /// Recipe name, if the recipe sets one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Overall status.
    pub status: RunStatus,

    /// Final outcome per step, in the order steps were first touched.
    pub steps: Vec<StepRecord>,

    /// Every guard/action invocation in order.
    pub invocations: Vec<Invocation>,

    /// The step that halted the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,

    /// Diagnostic of the failing step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Converged,
    Failed,
    Cancelled,
}

impl RunRecord {
    /// Build a record from a finished run.
    pub fn from_result(recipe: Option<&str>, started: DateTime<Utc>, result: &RunResult) -> Self {
        let status = if result.cancelled {
            RunStatus::Cancelled
        } else if result.is_converged() {
            RunStatus::Converged
        } else {
            RunStatus::Failed
        };
        let failure = result.failure();

        Self {
            timestamp: started,
            recipe: recipe.map(String::from),
            duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            status,
            steps: result
                .outcomes()
                .map(|(name, outcome)| StepRecord {
                    name: name.to_string(),
                    outcome: outcome.clone(),
                })
                .collect(),
            invocations: result.trace().to_vec(),
            failed_step: failure.map(|(name, _)| name.to_string()),
            error: failure.map(|(_, f)| f.to_string()),
        }
    }

    /// Write the record as pretty-printed JSON, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(anyhow::Error::from)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read a record back.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content).map_err(anyhow::Error::from)?)
    }
}
