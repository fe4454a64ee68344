//! Declared steps: the unit of system state the engine converges.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{ConvergeError, Result};

use super::cancel::CancellationToken;

/// Predicate answering "does the target state already hold?".
///
/// The context carries the run's cancellation token and never a deadline.
pub type Guard = Arc<dyn Fn(&ActionContext) -> Result<bool> + Send + Sync>;

/// State-changing operation of a step.
pub type Action = Arc<dyn Fn(&ActionContext) -> Result<()> + Send + Sync>;

/// Whether a step takes part in the ordered pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Evaluated in declaration order.
    #[default]
    Run,
    /// Runs only when another step notifies it.
    NothingUnlessNotified,
}

/// When a notification fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyTiming {
    /// Right after the notifying step's action, before the next step.
    Immediate,
    /// Once the ordered pass has finished.
    #[default]
    #[serde(alias = "deferred")]
    Delayed,
}

/// A notification edge from one step to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Name of the step to run.
    pub target: String,
    /// When to run it.
    #[serde(default)]
    pub timing: NotifyTiming,
}

/// Per-invocation context handed to an action.
///
/// Long-running actions should poll [`check`](ActionContext::check) (or
/// [`is_cancelled`](ActionContext::is_cancelled)) so that timeouts and run
/// cancellation take effect promptly.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl ActionContext {
    /// Create a context with an optional time bound.
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
        }
    }

    /// The token observed by this invocation.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the action should stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.is_expired()
    }

    /// Time left before the deadline, if there is one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Return an error if the action should stop.
    ///
    /// An expired deadline yields [`ConvergeError::Timeout`]; an external
    /// cancellation yields [`ConvergeError::Cancelled`].
    pub fn check(&self) -> Result<()> {
        if let (true, Some(after)) = (self.is_expired(), self.timeout) {
            return Err(ConvergeError::Timeout { after });
        }
        if self.cancel.is_cancelled() {
            return Err(ConvergeError::Cancelled {
                reason: self
                    .cancel
                    .reason()
                    .unwrap_or_else(|| "cancelled".to_string()),
            });
        }
        Ok(())
    }
}

/// A declared system-state assertion.
///
/// Built with a name and an action, then refined with the builder methods.
///
/// ```
/// use converge::engine::{NotifyTiming, Step};
///
/// let step = Step::new("install-pkg", |_ctx| Ok(()))
///     .guard(|| Ok(false))
///     .notifies("update", NotifyTiming::Immediate);
/// assert_eq!(step.name(), "install-pkg");
/// ```
#[derive(Clone)]
pub struct Step {
    name: String,
    guard: Option<Guard>,
    action: Action,
    timeout: Option<Duration>,
    notifies: Vec<Notification>,
    run_mode: RunMode,
}

impl Step {
    /// Create a step with no guard (never satisfied) in [`RunMode::Run`].
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&ActionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::from_parts(name, Arc::new(action))
    }

    /// Create a step from an already shared action.
    pub fn from_parts(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            guard: None,
            action,
            timeout: None,
            notifies: Vec::new(),
            run_mode: RunMode::Run,
        }
    }

    /// Set the guard predicate.
    pub fn guard<F>(mut self, guard: F) -> Self
    where
        F: Fn() -> Result<bool> + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(move |_: &ActionContext| guard()));
        self
    }

    /// Set a guard predicate that observes run cancellation.
    pub fn guard_with_context<F>(mut self, guard: F) -> Self
    where
        F: Fn(&ActionContext) -> Result<bool> + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Set an already shared guard predicate.
    pub fn with_guard(mut self, guard: Option<Guard>) -> Self {
        self.guard = guard;
        self
    }

    /// Bound the action's execution time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a notification edge.
    pub fn notifies(mut self, target: impl Into<String>, timing: NotifyTiming) -> Self {
        self.notifies.push(Notification {
            target: target.into(),
            timing,
        });
        self
    }

    /// Set the run mode.
    pub fn run_mode(mut self, mode: RunMode) -> Self {
        self.run_mode = mode;
        self
    }

    /// Step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Notification edges in declaration order.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifies
    }

    /// Configured run mode.
    pub fn mode(&self) -> RunMode {
        self.run_mode
    }

    /// Configured action timeout.
    pub fn action_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether a guard is set.
    pub fn has_guard(&self) -> bool {
        self.guard.is_some()
    }

    pub(crate) fn evaluate_guard(&self, ctx: &ActionContext) -> Result<bool> {
        match &self.guard {
            Some(guard) => guard(ctx),
            None => Ok(false),
        }
    }

    pub(crate) fn action(&self) -> &Action {
        &self.action
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("guard", &self.guard.is_some())
            .field("timeout", &self.timeout)
            .field("notifies", &self.notifies)
            .field("run_mode", &self.run_mode)
            .finish()
    }
}
