//! Integration tests for the blocking runner

mod common;

use std::time::{Duration, Instant};

use proclaunch::executor::{StartConfiguration, SynchronousProcessRunner, EXIT_CODE_UNSET};
use proclaunch::ProcessError;

#[test]
fn test_echo_hello_world() {
    let config = StartConfiguration::new("echo").with_arguments("\"hello world\"");
    let mut runner = SynchronousProcessRunner::new(config);
    assert_eq!(runner.timeout(), Duration::from_millis(10_000));

    let result = runner.run().expect("echo should run");
    assert!(result.is_success);
    assert!(!result.is_error);
    assert!(!result.is_timeout);
    assert_eq!(result.exit_code, 0);
    assert!(result.output_text.contains("hello world"));
    assert!(result.is_completed());
}

#[test]
fn test_nonexistent_executable() {
    let started = Instant::now();
    let config = StartConfiguration::new("nonexistent_command_12345");
    let mut runner = SynchronousProcessRunner::new(config);

    match runner.run() {
        Err(ProcessError::SpawnFailed { command, .. }) => {
            assert!(command.contains("nonexistent_command_12345"));
        }
        other => panic!("Expected SpawnFailed, got {:?}", other),
    }
    assert!(runner.is_error());
    assert!(!runner.is_success());
    assert!(!runner.is_timeout());
    assert_eq!(runner.exit_code(), EXIT_CODE_UNSET);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(unix)]
#[test]
fn test_script_streams_and_exit_code() {
    let (_dir, script) = common::create_script("mixed.sh", common::MIXED_OUTPUT_SCRIPT);
    let config = StartConfiguration::new(&script).with_arguments("5");
    let mut runner = SynchronousProcessRunner::new(config);

    let result = runner.run().expect("nonzero exit is not a run error");
    assert_eq!(result.exit_code, 5);
    assert!(result.is_error);
    assert_eq!(result.output_text, "out one\n\nout two\n");
    assert_eq!(result.error_text, "err one\n");
}

#[cfg(unix)]
#[test]
fn test_timeout_kills_process_tree() {
    let (_dir, script) = common::create_script("tree.sh", common::TREE_SCRIPT);
    let config = StartConfiguration::new(&script);
    let mut runner = SynchronousProcessRunner::new(config).with_timeout(Duration::from_millis(400));
    let started = Instant::now();

    let err = runner.run().unwrap_err();
    assert!(err.is_timeout());
    assert!(runner.is_timeout());
    assert!(runner.output_text().starts_with("spawned "));
    // The backgrounded sleep would hold the pipe for 30s had it survived
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_runner_is_single_use() {
    let mut runner = SynchronousProcessRunner::new(StartConfiguration::new("echo"));
    runner.run().unwrap();
    assert!(matches!(runner.run(), Err(ProcessError::InvalidOperation(_))));
}

#[tokio::test]
async fn test_run_from_async_context() {
    let config = StartConfiguration::new("echo").with_arguments("inside");
    let mut runner = SynchronousProcessRunner::new(config);

    let result = runner.run().expect("run should not panic inside a runtime");
    assert!(result.is_success);
    assert_eq!(result.output_text, "inside\n");
}
