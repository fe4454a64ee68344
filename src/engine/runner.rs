//! The convergence loop.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{ConvergeError, Result};

use super::cancel::CancellationToken;
use super::graph::validate_notifications;
use super::outcome::{Failure, FailureKind, RunResult, StepOutcome, Trigger};
use super::step::{Action, ActionContext, NotifyTiming, RunMode, Step};

/// How often a waiting engine re-checks the run token while an action with a
/// timeout is running on its helper thread.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const ACTION_PANICKED: &str = "action panicked before reporting a result";

/// Progress events emitted during a run.
#[derive(Debug)]
pub enum RunProgress<'a> {
    /// A step's guard or action is about to be invoked.
    StepStarting {
        name: &'a str,
        trigger: &'a Trigger,
    },
    /// A step invocation finished.
    StepFinished {
        name: &'a str,
        trigger: &'a Trigger,
        outcome: &'a StepOutcome,
    },
    /// A step was left unevaluated because the run halted.
    StepNotReached { name: &'a str },
}

/// Applies an ordered list of steps to the current machine.
///
/// The engine holds only the immutable step list; every run starts fresh.
#[derive(Debug, Default)]
pub struct Engine {
    steps: Vec<Step>,
    index: HashMap<String, usize>,
}

impl Engine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    ///
    /// Fails with [`ConvergeError::DuplicateStep`] if the name is taken, in
    /// which case the step list is unchanged. Notification targets are not
    /// resolved here; see [`validate`](Engine::validate).
    pub fn register(&mut self, step: Step) -> Result<()> {
        if self.index.contains_key(step.name()) {
            return Err(ConvergeError::DuplicateStep {
                name: step.name().to_string(),
            });
        }
        debug!("Registered step '{}'", step.name());
        self.index.insert(step.name().to_string(), self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    /// Resolve notification targets and reject notification cycles.
    ///
    /// [`run`](Engine::run) calls this before touching any step.
    pub fn validate(&self) -> Result<()> {
        validate_notifications(&self.steps)
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    /// Registered steps in declaration order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Execute one convergence pass.
    ///
    /// Returns an error only for configuration problems, before any guard
    /// or action is invoked. Step failures are reported in the result.
    pub fn run(&self, token: &CancellationToken) -> Result<RunResult> {
        self.run_with_progress(token, |_| {})
    }

    /// Execute one convergence pass with a progress callback.
    pub fn run_with_progress(
        &self,
        token: &CancellationToken,
        on_progress: impl FnMut(RunProgress<'_>),
    ) -> Result<RunResult> {
        self.validate()?;

        let start = Instant::now();
        let mut pass = Pass {
            engine: self,
            token,
            result: RunResult::default(),
            delayed: VecDeque::new(),
            on_progress,
        };

        info!("Converging {} steps", self.steps.len());

        let mut halted = false;
        for (i, step) in self.steps.iter().enumerate() {
            if step.mode() == RunMode::NothingUnlessNotified {
                continue;
            }
            if token.is_cancelled() {
                pass.result.cancelled = true;
                pass.halt_from(i);
                halted = true;
                break;
            }
            if pass.converge(step).is_err() {
                pass.halt_from(i + 1);
                halted = true;
                break;
            }
        }

        if !halted {
            while let Some((target, from)) = pass.delayed.pop_front() {
                if token.is_cancelled() {
                    pass.result.cancelled = true;
                    pass.delayed.push_front((target, from));
                    break;
                }
                if pass.notify(&target, Trigger::Delayed { from }).is_err() {
                    break;
                }
            }
        }
        pass.drain_delayed();

        let mut result = pass.result;
        result.duration = start.elapsed();

        match result.failure() {
            Some((name, failure)) => warn!("Run halted at '{}': {}", name, failure),
            None if result.cancelled => warn!("Run cancelled"),
            None => info!("Converged in {:?}", result.duration),
        }

        Ok(result)
    }
}

/// Marker returned when a run must stop.
struct Halt;

/// State of a single run.
struct Pass<'e, F> {
    engine: &'e Engine,
    token: &'e CancellationToken,
    result: RunResult,
    delayed: VecDeque<(String, String)>,
    on_progress: F,
}

impl<F> Pass<'_, F>
where
    F: FnMut(RunProgress<'_>),
{
    /// Ordered-pass handling: guard first, action only if unsatisfied.
    fn converge(&mut self, step: &Step) -> std::result::Result<(), Halt> {
        let trigger = Trigger::Pass;
        (self.on_progress)(RunProgress::StepStarting {
            name: step.name(),
            trigger: &trigger,
        });

        let ctx = ActionContext::new(self.token.child(), None);
        match step.evaluate_guard(&ctx) {
            Ok(true) => {
                debug!("'{}' already satisfied", step.name());
                self.finish(step, trigger, StepOutcome::Skipped);
                Ok(())
            }
            Ok(false) => self.apply(step, trigger),
            Err(e) => {
                let kind = match e {
                    ConvergeError::Cancelled { .. } => {
                        self.result.cancelled = true;
                        FailureKind::Cancelled
                    }
                    _ => FailureKind::Guard,
                };
                let failure = Failure::new(kind, e.to_string());
                self.finish(step, trigger, StepOutcome::Failed(failure));
                Err(Halt)
            }
        }
    }

    /// Run a notified step's action unconditionally.
    fn notify(&mut self, target: &str, trigger: Trigger) -> std::result::Result<(), Halt> {
        let engine = self.engine;
        let Some(step) = engine.step(target) else {
            let failure = Failure::new(FailureKind::Action, format!("unknown step '{target}'"));
            self.finish_named(target, trigger, StepOutcome::Failed(failure));
            return Err(Halt);
        };

        debug!("'{}' notified ({:?})", target, trigger);
        (self.on_progress)(RunProgress::StepStarting {
            name: step.name(),
            trigger: &trigger,
        });
        self.apply(step, trigger)
    }

    fn apply(&mut self, step: &Step, trigger: Trigger) -> std::result::Result<(), Halt> {
        match self.invoke(step) {
            Ok(()) => {
                self.finish(step, trigger, StepOutcome::Applied);
                self.fire_notifications(step)
            }
            Err(failure) => {
                if failure.kind == FailureKind::Cancelled {
                    self.result.cancelled = true;
                }
                self.finish(step, trigger, StepOutcome::Failed(failure));
                Err(Halt)
            }
        }
    }

    fn fire_notifications(&mut self, step: &Step) -> std::result::Result<(), Halt> {
        for notification in step.notifications() {
            match notification.timing {
                NotifyTiming::Immediate => {
                    if self.token.is_cancelled() {
                        self.result.cancelled = true;
                        if self.result.get(&notification.target).is_none() {
                            (self.on_progress)(RunProgress::StepNotReached {
                                name: &notification.target,
                            });
                            self.result.mark_not_reached(&notification.target);
                        }
                        return Err(Halt);
                    }
                    self.notify(
                        &notification.target,
                        Trigger::Immediate {
                            from: step.name().to_string(),
                        },
                    )?;
                }
                NotifyTiming::Delayed => {
                    self.delayed
                        .push_back((notification.target.clone(), step.name().to_string()));
                }
            }
        }
        Ok(())
    }

    fn invoke(&self, step: &Step) -> std::result::Result<(), Failure> {
        let token = self.token.child();
        match step.action_timeout() {
            None => {
                let ctx = ActionContext::new(token, None);
                let action = step.action();
                match panic::catch_unwind(AssertUnwindSafe(|| action(&ctx))) {
                    Ok(result) => result.map_err(classify),
                    Err(_) => Err(Failure::new(FailureKind::Action, ACTION_PANICKED)),
                }
            }
            Some(limit) => self.invoke_with_deadline(step, token, limit),
        }
    }

    /// Run the action on a helper thread and stop waiting once the limit
    /// passes. The action's token is cancelled so preemptible actions
    /// (subprocesses) abort; others are left to finish on their own thread.
    fn invoke_with_deadline(
        &self,
        step: &Step,
        token: CancellationToken,
        limit: Duration,
    ) -> std::result::Result<(), Failure> {
        let (tx, rx) = mpsc::channel();
        let ctx = ActionContext::new(token.clone(), Some(limit));
        let action: Action = Arc::clone(step.action());

        thread::Builder::new()
            .name(format!("converge-{}", step.name()))
            .spawn(move || {
                let _ = tx.send(action(&ctx));
            })
            .map_err(|e| Failure::new(FailureKind::Action, e.to_string()))?;

        let deadline = Instant::now() + limit;
        loop {
            let now = Instant::now();
            if now >= deadline {
                token.cancel("timed out");
                return Err(classify(ConvergeError::Timeout { after: limit }));
            }
            match rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                Ok(result) => return result.map_err(classify),
                Err(RecvTimeoutError::Timeout) => {
                    if self.token.is_cancelled() {
                        let reason = self
                            .token
                            .reason()
                            .unwrap_or_else(|| "cancelled".to_string());
                        return Err(classify(ConvergeError::Cancelled { reason }));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Failure::new(FailureKind::Action, ACTION_PANICKED));
                }
            }
        }
    }

    fn finish(&mut self, step: &Step, trigger: Trigger, outcome: StepOutcome) {
        self.finish_named(step.name(), trigger, outcome);
    }

    fn finish_named(&mut self, name: &str, trigger: Trigger, outcome: StepOutcome) {
        (self.on_progress)(RunProgress::StepFinished {
            name,
            trigger: &trigger,
            outcome: &outcome,
        });
        self.result.record(name, trigger, outcome);
    }

    /// Mark ordered-pass steps from `index` on as not reached.
    fn halt_from(&mut self, index: usize) {
        let engine = self.engine;
        for step in &engine.steps[index..] {
            if step.mode() == RunMode::Run && self.result.get(step.name()).is_none() {
                (self.on_progress)(RunProgress::StepNotReached { name: step.name() });
                self.result.mark_not_reached(step.name());
            }
        }
    }

    /// Delayed notifications still queued when the run stopped.
    fn drain_delayed(&mut self) {
        while let Some((target, _)) = self.delayed.pop_front() {
            if self.result.get(&target).is_none() {
                (self.on_progress)(RunProgress::StepNotReached { name: &target });
                self.result.mark_not_reached(&target);
            }
        }
    }
}

fn classify(err: ConvergeError) -> Failure {
    let kind = match err {
        ConvergeError::Timeout { .. } => FailureKind::Timeout,
        ConvergeError::Cancelled { .. } => FailureKind::Cancelled,
        _ => FailureKind::Action,
    };
    Failure::new(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Step {
        let log = Arc::clone(log);
        let label = name.to_string();
        Step::new(name, move |_| {
            log.lock().unwrap().push(label.clone());
            Ok(())
        })
    }

    #[test]
    fn register_rejects_duplicates_without_effect() {
        let mut engine = Engine::new();
        engine.register(Step::new("a", |_| Ok(()))).unwrap();
        let err = engine
            .register(Step::new("a", |_| Ok(())).timeout(Duration::from_secs(1)))
            .unwrap_err();

        assert!(matches!(err, ConvergeError::DuplicateStep { .. }));
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.step("a").unwrap().action_timeout(), None);
    }

    #[test]
    fn run_rejects_unknown_target_before_any_guard() {
        let guard_calls = Arc::new(Mutex::new(0));
        let calls = Arc::clone(&guard_calls);

        let mut engine = Engine::new();
        engine
            .register(
                Step::new("a", |_| Ok(()))
                    .guard(move || {
                        *calls.lock().unwrap() += 1;
                        Ok(false)
                    })
                    .notifies("missing", NotifyTiming::Immediate),
            )
            .unwrap();

        let err = engine.run(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, ConvergeError::UnknownNotifyTarget { .. }));
        assert_eq!(*guard_calls.lock().unwrap(), 0);
    }

    #[test]
    fn guard_error_fails_fast() {
        let log = log();
        let mut engine = Engine::new();
        engine
            .register(recording("probe", &log).guard(|| {
                Err(ConvergeError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "cannot stat",
                )))
            }))
            .unwrap();
        engine.register(recording("next", &log)).unwrap();

        let result = engine.run(&CancellationToken::new()).unwrap();

        match result.get("probe") {
            Some(StepOutcome::Failed(f)) => assert_eq!(f.kind, FailureKind::Guard),
            other => panic!("expected guard failure, got {:?}", other),
        }
        assert_eq!(result.get("next"), Some(&StepOutcome::NotReached));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn notified_step_chains_its_own_notifications() {
        let log = log();
        let mut engine = Engine::new();
        engine
            .register(recording("a", &log).notifies("b", NotifyTiming::Immediate))
            .unwrap();
        engine
            .register(
                recording("b", &log)
                    .run_mode(RunMode::NothingUnlessNotified)
                    .notifies("c", NotifyTiming::Immediate)
                    .notifies("d", NotifyTiming::Delayed),
            )
            .unwrap();
        engine
            .register(recording("c", &log).run_mode(RunMode::NothingUnlessNotified))
            .unwrap();
        engine
            .register(recording("d", &log).run_mode(RunMode::NothingUnlessNotified))
            .unwrap();
        engine.register(recording("e", &log)).unwrap();

        let result = engine.run(&CancellationToken::new()).unwrap();

        assert!(result.is_converged());
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "e", "d"]);
    }

    #[test]
    fn timeout_fails_step_and_halts() {
        let mut engine = Engine::new();
        engine
            .register(
                Step::new("slow", |ctx: &ActionContext| {
                    while !ctx.is_cancelled() {
                        thread::sleep(Duration::from_millis(5));
                    }
                    ctx.check()
                })
                .timeout(Duration::from_millis(100)),
            )
            .unwrap();
        engine.register(Step::new("after", |_| Ok(()))).unwrap();

        let result = engine.run(&CancellationToken::new()).unwrap();

        match result.get("slow") {
            Some(StepOutcome::Failed(f)) => assert_eq!(f.kind, FailureKind::Timeout),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(result.get("after"), Some(&StepOutcome::NotReached));
        assert!(!result.cancelled);
    }

    #[test]
    fn action_within_timeout_applies() {
        let mut engine = Engine::new();
        engine
            .register(Step::new("quick", |_| Ok(())).timeout(Duration::from_secs(5)))
            .unwrap();

        let result = engine.run(&CancellationToken::new()).unwrap();
        assert_eq!(result.get("quick"), Some(&StepOutcome::Applied));
    }

    #[test]
    fn cancellation_during_action_is_reported() {
        let token = CancellationToken::new();
        let trigger = token.clone();

        let mut engine = Engine::new();
        engine
            .register(Step::new("interrupt", move |ctx: &ActionContext| {
                trigger.cancel("operator abort");
                ctx.check()
            }))
            .unwrap();
        engine.register(Step::new("later", |_| Ok(()))).unwrap();

        let result = engine.run(&token).unwrap();

        assert!(result.cancelled);
        match result.get("interrupt") {
            Some(StepOutcome::Failed(f)) => {
                assert_eq!(f.kind, FailureKind::Cancelled);
                assert!(f.message.contains("operator abort"));
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(result.get("later"), Some(&StepOutcome::NotReached));
    }

    #[test]
    fn failure_drops_pending_delayed_notifications() {
        let log = log();
        let mut engine = Engine::new();
        engine
            .register(recording("a", &log).notifies("cleanup", NotifyTiming::Delayed))
            .unwrap();
        engine
            .register(Step::new("broken", |_| {
                Err(ConvergeError::CommandFailed {
                    command: "false".into(),
                    code: Some(1),
                })
            }))
            .unwrap();
        engine
            .register(recording("cleanup", &log).run_mode(RunMode::NothingUnlessNotified))
            .unwrap();

        let result = engine.run(&CancellationToken::new()).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        assert_eq!(result.get("cleanup"), Some(&StepOutcome::NotReached));
        assert_eq!(result.failure().unwrap().0, "broken");
    }

    #[test]
    fn progress_reports_every_event() {
        let mut engine = Engine::new();
        engine
            .register(Step::new("ok", |_| Ok(())).guard(|| Ok(true)))
            .unwrap();
        engine
            .register(Step::new("bad", |_| {
                Err(ConvergeError::CommandFailed {
                    command: "exit 3".into(),
                    code: Some(3),
                })
            }))
            .unwrap();
        engine.register(Step::new("never", |_| Ok(()))).unwrap();

        let mut events = Vec::new();
        engine
            .run_with_progress(&CancellationToken::new(), |progress| {
                events.push(match progress {
                    RunProgress::StepStarting { name, .. } => format!("start {name}"),
                    RunProgress::StepFinished { name, outcome, .. } => {
                        format!("{} {}", outcome.label(), name)
                    }
                    RunProgress::StepNotReached { name } => format!("not reached {name}"),
                });
            })
            .unwrap();

        assert_eq!(
            events,
            vec![
                "start ok",
                "skipped ok",
                "start bad",
                "failed bad",
                "not reached never"
            ]
        );
    }

    #[test]
    fn cancelled_immediate_notification_reports_not_reached() {
        let token = CancellationToken::new();
        let canceller = token.clone();

        let mut engine = Engine::new();
        engine
            .register(
                Step::new("a", move |_| {
                    canceller.cancel("operator interrupt");
                    Ok(())
                })
                .notifies("n", NotifyTiming::Immediate),
            )
            .unwrap();
        engine
            .register(Step::new("n", |_| Ok(())).run_mode(RunMode::NothingUnlessNotified))
            .unwrap();

        let mut not_reached = Vec::new();
        let result = engine
            .run_with_progress(&token, |progress| {
                if let RunProgress::StepNotReached { name } = progress {
                    not_reached.push(name.to_string());
                }
            })
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.get("n"), Some(&StepOutcome::NotReached));
        assert_eq!(not_reached, vec!["n"]);
    }

    #[test]
    fn guard_observes_run_cancellation() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel("time limit reached");
        });

        let mut engine = Engine::new();
        engine
            .register(Step::new("wait", |_| Ok(())).guard_with_context(|ctx| {
                while !ctx.is_cancelled() {
                    thread::sleep(Duration::from_millis(10));
                }
                ctx.check()?;
                Ok(true)
            }))
            .unwrap();
        engine.register(Step::new("after", |_| Ok(()))).unwrap();

        let result = engine.run(&token).unwrap();
        handle.join().unwrap();

        assert!(result.cancelled);
        match result.get("wait") {
            Some(StepOutcome::Failed(failure)) => {
                assert_eq!(failure.kind, FailureKind::Cancelled)
            }
            other => panic!("expected cancelled guard, got {:?}", other),
        }
        assert_eq!(result.get("after"), Some(&StepOutcome::NotReached));
    }

    #[test]
    fn panicking_action_fails_step() {
        let mut engine = Engine::new();
        engine
            .register(Step::new("boom", |_| panic!("unexpected state")))
            .unwrap();
        engine.register(Step::new("after", |_| Ok(()))).unwrap();

        let result = engine.run(&CancellationToken::new()).unwrap();

        match result.get("boom") {
            Some(StepOutcome::Failed(failure)) => {
                assert_eq!(failure.kind, FailureKind::Action);
                assert_eq!(failure.message, ACTION_PANICKED);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(result.get("after"), Some(&StepOutcome::NotReached));
    }
}
