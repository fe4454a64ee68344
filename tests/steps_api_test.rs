//! Integration tests for recipe steps against real commands and downloads.

use converge::config::parse_recipe;
use converge::engine::{CancellationToken, FailureKind, StepOutcome};
use converge::executor::SystemExecutor;
use converge::steps::build_engine;
use httpmock::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn engine_for(yaml: &str, recipe_path: &Path) -> converge::engine::Engine {
    let recipe = parse_recipe(yaml, recipe_path).unwrap();
    let executor = Arc::new(SystemExecutor::new().unwrap());
    build_engine(&recipe, recipe_path, &HashMap::new(), executor).unwrap()
}

#[test]
fn fetch_step_downloads_once() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/hello.txt");
        then.status(200).body("hello");
    });

    let temp = TempDir::new().unwrap();
    let recipe_path = temp.path().join("converge.yml");
    let yaml = format!(
        r#"
vars:
  url: "{}"
steps:
  - name: hello
    action:
      type: fetch
      url: "${{url}}"
      dest: downloads/hello.txt
      sha256: {}
"#,
        server.url("/hello.txt"),
        HELLO_SHA256
    );
    let engine = engine_for(&yaml, &recipe_path);

    let first = engine.run(&CancellationToken::new()).unwrap();
    assert_eq!(first.get("hello"), Some(&StepOutcome::Applied));
    assert_eq!(
        fs::read_to_string(temp.path().join("downloads/hello.txt")).unwrap(),
        "hello"
    );

    let second = engine.run(&CancellationToken::new()).unwrap();
    assert_eq!(second.get("hello"), Some(&StepOutcome::Skipped));
    mock.assert_hits(1);
}

#[test]
fn fetch_step_rejects_bad_checksum() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/hello.txt");
        then.status(200).body("tampered");
    });

    let temp = TempDir::new().unwrap();
    let recipe_path = temp.path().join("converge.yml");
    let yaml = format!(
        r#"
steps:
  - name: hello
    action: {{ type: fetch, url: "{}", dest: hello.txt, sha256: {} }}
"#,
        server.url("/hello.txt"),
        HELLO_SHA256
    );
    let engine = engine_for(&yaml, &recipe_path);

    let result = engine.run(&CancellationToken::new()).unwrap();
    match result.get("hello") {
        Some(StepOutcome::Failed(failure)) => {
            assert_eq!(failure.kind, FailureKind::Action);
            assert!(failure.message.contains("Checksum mismatch"));
        }
        other => panic!("expected checksum failure, got {:?}", other),
    }
    assert!(!temp.path().join("hello.txt").exists());
}

#[cfg(unix)]
#[test]
fn command_step_with_timeout_is_killed() {
    let temp = TempDir::new().unwrap();
    let recipe_path = temp.path().join("converge.yml");
    let engine = engine_for(
        r#"
steps:
  - name: hang
    action: { type: command, command: "sleep 10" }
    timeout: 1
"#,
        &recipe_path,
    );

    let start = std::time::Instant::now();
    let result = engine.run(&CancellationToken::new()).unwrap();

    match result.get("hang") {
        Some(StepOutcome::Failed(failure)) => assert_eq!(failure.kind, FailureKind::Timeout),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(start.elapsed() < std::time::Duration::from_secs(5));
}

#[cfg(unix)]
#[test]
fn hung_guard_command_stops_on_cancellation() {
    let temp = TempDir::new().unwrap();
    let recipe_path = temp.path().join("converge.yml");
    let engine = engine_for(
        r#"
steps:
  - name: locked
    action: { type: command, command: "true" }
    guard: { type: command_succeeds, command: "sleep 10" }
  - name: after
    action: { type: write_file, path: after.txt, content: x }
"#,
        &recipe_path,
    );

    let token = CancellationToken::new();
    let canceller = token.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(200));
        canceller.cancel("time limit of 1s reached");
    });

    let start = std::time::Instant::now();
    let result = engine.run(&token).unwrap();
    handle.join().unwrap();

    assert!(result.cancelled);
    match result.get("locked") {
        Some(StepOutcome::Failed(failure)) => assert_eq!(failure.kind, FailureKind::Cancelled),
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(result.get("after"), Some(&StepOutcome::NotReached));
    assert!(!temp.path().join("after.txt").exists());
    assert!(start.elapsed() < std::time::Duration::from_secs(5));
}

#[cfg(unix)]
#[test]
fn background_child_does_not_hold_up_step() {
    let temp = TempDir::new().unwrap();
    let recipe_path = temp.path().join("converge.yml");
    let engine = engine_for(
        r#"
steps:
  - name: daemon
    action: { type: command, command: "sleep 4 & echo started" }
"#,
        &recipe_path,
    );

    let start = std::time::Instant::now();
    let result = engine.run(&CancellationToken::new()).unwrap();

    assert_eq!(result.get("daemon"), Some(&StepOutcome::Applied));
    assert!(start.elapsed() < std::time::Duration::from_secs(2));
}

#[cfg(unix)]
#[test]
fn package_templates_drive_install_and_check() {
    let temp = TempDir::new().unwrap();
    let recipe_path = temp.path().join("converge.yml");
    let engine = engine_for(
        r#"
settings:
  packages:
    check: "test -f pkg-${package}"
    install: "touch pkg-${package}"
steps:
  - name: git
    action: { type: package, name: git }
"#,
        &recipe_path,
    );

    let first = engine.run(&CancellationToken::new()).unwrap();
    assert_eq!(first.get("git"), Some(&StepOutcome::Applied));
    assert!(temp.path().join("pkg-git").exists());

    let second = engine.run(&CancellationToken::new()).unwrap();
    assert_eq!(second.get("git"), Some(&StepOutcome::Skipped));
}
