//! The idempotent convergence engine.
//!
//! An [`Engine`] owns an ordered list of [`Step`]s. Each run walks the list
//! in declaration order, evaluates each step's guard, applies the action of
//! every unsatisfied step, fires notifications, and halts on the first
//! failure:
//!
//! - [`Step`] - name, guard, action, timeout, notification edges, run mode
//! - [`Engine`] - registration, validation, and the convergence loop
//! - [`RunResult`] - per-step [`StepOutcome`] plus an invocation trace
//! - [`CancellationToken`] - cooperative cancellation between and inside steps
//!
//! # Example
//!
//! ```
//! use converge::engine::{CancellationToken, Engine, NotifyTiming, RunMode, Step, StepOutcome};
//!
//! let mut engine = Engine::new();
//! engine
//!     .register(Step::new("update", |_| Ok(())).run_mode(RunMode::NothingUnlessNotified))
//!     .unwrap();
//! engine
//!     .register(
//!         Step::new("install-pkg", |_| Ok(()))
//!             .guard(|| Ok(false))
//!             .notifies("update", NotifyTiming::Immediate),
//!     )
//!     .unwrap();
//!
//! let result = engine.run(&CancellationToken::new()).unwrap();
//! assert_eq!(result.get("install-pkg"), Some(&StepOutcome::Applied));
//! assert_eq!(result.get("update"), Some(&StepOutcome::Applied));
//! ```

pub mod cancel;
pub mod graph;
pub mod outcome;
pub mod runner;
pub mod step;

pub use cancel::CancellationToken;
pub use graph::validate_notifications;
pub use outcome::{Failure, FailureKind, Invocation, OutcomeCounts, RunResult, StepOutcome, Trigger};
pub use runner::{Engine, RunProgress};
pub use step::{Action, ActionContext, Guard, Notification, NotifyTiming, RunMode, Step};
