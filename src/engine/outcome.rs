//! Per-step outcomes and the result of a convergence run.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The guard itself could not be evaluated.
    Guard,
    /// The action returned an error.
    Action,
    /// The action exceeded its timeout.
    Timeout,
    /// The run was cancelled while the action was in progress.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Guard => "guard error",
            Self::Action => "action error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Diagnostic for a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of a step within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Guard reported the target state already holds.
    Skipped,
    /// Action ran successfully.
    Applied,
    /// Guard or action failed; the run halted here.
    Failed(Failure),
    /// An earlier failure or cancellation halted the run first.
    NotReached,
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Short lowercase label used in terminal output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Applied => "applied",
            Self::Failed(_) => "failed",
            Self::NotReached => "not reached",
        }
    }
}

/// What caused a step to be invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Trigger {
    /// The ordered pass over declared steps.
    Pass,
    /// An immediate notification from another step.
    Immediate { from: String },
    /// A delayed notification, fired after the pass.
    Delayed { from: String },
}

impl Trigger {
    pub fn is_notification(&self) -> bool {
        !matches!(self, Self::Pass)
    }
}

/// One guard/action invocation, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub step: String,
    pub trigger: Trigger,
    pub outcome: StepOutcome,
}

/// Outcome counts for summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_reached: usize,
}

/// Result of one convergence run.
///
/// Entries are kept in the order steps were first touched. A step touched
/// more than once keeps its latest outcome here; [`trace`](RunResult::trace)
/// holds every invocation. Steps that only run when notified and were never
/// notified have no entry.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    entries: Vec<(String, StepOutcome)>,
    trace: Vec<Invocation>,
    /// Whether the run was cancelled before it finished.
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl RunResult {
    /// Outcome of the named step, if it was touched.
    pub fn get(&self, name: &str) -> Option<&StepOutcome> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }

    /// All step outcomes in first-touched order.
    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &StepOutcome)> {
        self.entries.iter().map(|(n, o)| (n.as_str(), o))
    }

    /// Every invocation in chronological order.
    pub fn trace(&self) -> &[Invocation] {
        &self.trace
    }

    /// Number of times the named step's action ran successfully.
    pub fn times_applied(&self, name: &str) -> usize {
        self.trace
            .iter()
            .filter(|i| i.step == name && i.outcome == StepOutcome::Applied)
            .count()
    }

    /// The step that halted the run, if any.
    pub fn failure(&self) -> Option<(&str, &Failure)> {
        self.entries.iter().find_map(|(n, o)| match o {
            StepOutcome::Failed(f) => Some((n.as_str(), f)),
            _ => None,
        })
    }

    /// Whether every touched step is Skipped or Applied and the run finished.
    pub fn is_converged(&self) -> bool {
        !self.cancelled
            && self
                .entries
                .iter()
                .all(|(_, o)| matches!(o, StepOutcome::Skipped | StepOutcome::Applied))
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for (_, outcome) in &self.entries {
            match outcome {
                StepOutcome::Applied => counts.applied += 1,
                StepOutcome::Skipped => counts.skipped += 1,
                StepOutcome::Failed(_) => counts.failed += 1,
                StepOutcome::NotReached => counts.not_reached += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn record(&mut self, name: &str, trigger: Trigger, outcome: StepOutcome) {
        self.trace.push(Invocation {
            step: name.to_string(),
            trigger,
            outcome: outcome.clone(),
        });
        self.set(name, outcome);
    }

    pub(crate) fn mark_not_reached(&mut self, name: &str) {
        if self.get(name).is_none() {
            self.entries.push((name.to_string(), StepOutcome::NotReached));
        }
    }

    fn set(&mut self, name: &str, outcome: StepOutcome) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = outcome,
            None => self.entries.push((name.to_string(), outcome)),
        }
    }
}
