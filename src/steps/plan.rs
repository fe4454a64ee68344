//! Building an engine from a recipe.

use crate::config::{build_context, validate, RecipeConfig};
use crate::engine::{Action, ActionContext, Engine, Guard, Step};
use crate::error::Result;
use crate::executor::Executor;
use crate::steps::resolved::{ResolvedStep, StepResolver};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

/// Validate a recipe and resolve every step.
///
/// Any configuration problem, including an unknown variable anywhere in
/// the recipe, is reported here before anything touches the host.
pub fn resolve_recipe(
    recipe: &RecipeConfig,
    recipe_path: &Path,
    overrides: &HashMap<String, String>,
) -> Result<Vec<ResolvedStep>> {
    validate(recipe)?;

    let vars = build_context(recipe, recipe_path, overrides)?;
    let base_dir = recipe_path.parent().unwrap_or_else(|| Path::new("."));
    let resolver = StepResolver::new(&vars, &recipe.settings, base_dir);

    recipe.steps.iter().map(|s| resolver.resolve(s)).collect()
}

/// Turn a resolved step into an engine step whose guard and action run
/// through `executor`.
pub fn engine_step(step: ResolvedStep, executor: Arc<dyn Executor>) -> Step {
    let guard: Option<Guard> = step.check.map(|check| {
        let executor = Arc::clone(&executor);
        Arc::new(move |ctx: &ActionContext| check.evaluate_within(executor.as_ref(), ctx)) as Guard
    });

    let operation = step.operation;
    let action: Action =
        Arc::new(move |ctx: &ActionContext| operation.apply(executor.as_ref(), ctx));

    let mut built = Step::from_parts(step.name, action)
        .with_guard(guard)
        .run_mode(step.run_mode);
    if let Some(timeout) = step.timeout {
        built = built.timeout(timeout);
    }
    for notification in step.notifies {
        built = built.notifies(notification.target, notification.timing);
    }
    built
}

/// Load-time half of a run: validate, resolve, register, and check the
/// notification graph.
pub fn build_engine(
    recipe: &RecipeConfig,
    recipe_path: &Path,
    overrides: &HashMap<String, String>,
    executor: Arc<dyn Executor>,
) -> Result<Engine> {
    let mut engine = Engine::new();
    for step in resolve_recipe(recipe, recipe_path, overrides)? {
        debug!("Registering step '{}': {}", step.name, step.operation.describe());
        engine.register(engine_step(step, Arc::clone(&executor)))?;
    }
    engine.validate()?;
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_recipe;
    use crate::engine::{CancellationToken, RunMode, StepOutcome};
    use crate::error::ConvergeError;
    use crate::executor::{CommandOutput, CommandSpec};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every command and reports success for all of them.
    #[derive(Default)]
    struct RecordingExecutor {
        commands: Mutex<Vec<String>>,
    }

    impl Executor for RecordingExecutor {
        fn run_command(&self, spec: &CommandSpec, _ctx: &ActionContext) -> Result<CommandOutput> {
            self.commands.lock().unwrap().push(spec.command.clone());
            Ok(CommandOutput {
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
                success: !spec.command.starts_with("check"),
            })
        }

        fn fetch(&self, _url: &str, _dest: &Path, _ctx: &ActionContext) -> Result<()> {
            Ok(())
        }
    }

    fn build(yaml: &str, executor: Arc<RecordingExecutor>) -> Result<Engine> {
        let recipe = parse_recipe(yaml, Path::new("/srv/converge.yml"))?;
        build_engine(
            &recipe,
            Path::new("/srv/converge.yml"),
            &HashMap::new(),
            executor,
        )
    }

    #[test]
    fn builds_and_runs_package_flow() {
        let yaml = r#"
settings:
  packages:
    check: "check ${package}"
    install: "install ${package}"
steps:
  - name: update
    action: { type: command, command: "update" }
    run_mode: nothing_unless_notified
  - name: git
    action: { type: package, name: git }
    notifies: [{ target: update, timing: immediate }]
"#;
        let executor = Arc::new(RecordingExecutor::default());
        let engine = build(yaml, Arc::clone(&executor)).unwrap();
        let result = engine.run(&CancellationToken::new()).unwrap();

        assert_eq!(result.get("git"), Some(&StepOutcome::Applied));
        assert_eq!(result.get("update"), Some(&StepOutcome::Applied));
        assert_eq!(
            *executor.commands.lock().unwrap(),
            vec!["check git", "install git", "update"]
        );
    }

    #[test]
    fn build_rejects_notification_cycle() {
        let yaml = r#"
steps:
  - name: a
    action: { type: command, command: "a" }
    notifies: [{ target: b }]
  - name: b
    action: { type: command, command: "b" }
    notifies: [{ target: a }]
"#;
        let executor = Arc::new(RecordingExecutor::default());
        let err = build(yaml, Arc::clone(&executor)).unwrap_err();

        assert!(matches!(err, ConvergeError::NotificationCycle { .. }));
        assert!(executor.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn build_rejects_invalid_recipe() {
        let yaml = r#"
steps:
  - name: a
    action: { type: command, command: "a" }
    notifies: [{ target: ghost }]
"#;
        let err = build(yaml, Arc::new(RecordingExecutor::default())).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn engine_step_carries_settings() {
        let yaml = r#"
steps:
  - name: a
    action: { type: command, command: "a" }
    timeout: 30
    notifies: [{ target: b, timing: immediate }]
  - name: b
    action: { type: command, command: "b" }
    run_mode: nothing_unless_notified
"#;
        let engine = build(yaml, Arc::new(RecordingExecutor::default())).unwrap();
        let a = engine.step("a").unwrap();

        assert_eq!(a.action_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(a.notifications().len(), 1);
        assert!(!a.has_guard());
        assert_eq!(engine.step("b").unwrap().mode(), RunMode::NothingUnlessNotified);
    }
}
