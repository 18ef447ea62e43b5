//! End-to-end tests for the `proclaunch` binary

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

fn proclaunch() -> Command {
    let mut cmd = Command::cargo_bin("proclaunch").expect("binary should build");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_run_echo() {
    proclaunch()
        .args(["run", "--", "echo", "hello world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));
}

#[cfg(unix)]
#[test]
fn test_run_propagates_exit_code() {
    proclaunch()
        .args(["run", "--", "sh", "-c", "echo oops >&2; exit 3"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("oops"));
}

#[cfg(unix)]
#[test]
fn test_run_timeout_exits_124() {
    proclaunch()
        .args(["run", "--timeout-ms", "300", "--", "sleep", "5"])
        .assert()
        .code(124)
        .stderr(predicate::str::contains("timeout"));
}

#[test]
fn test_run_missing_executable_fails() {
    proclaunch()
        .args(["run", "--", "nonexistent_command_12345"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nonexistent_command_12345"));
}

#[test]
fn test_run_json_output() {
    let output = proclaunch()
        .args(["--format", "json", "run", "--", "echo", "hi"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["command"], "echo hi");
    assert_eq!(json["result"]["exit_code"], 0);
    assert_eq!(json["result"]["is_success"], true);
    assert_eq!(json["result"]["output_text"], "hi\n");
}

#[cfg(unix)]
#[test]
fn test_run_with_env_and_cwd() {
    let dir = tempfile::TempDir::new().unwrap();
    proclaunch()
        .args(["run", "-e", "GREETING=howdy", "--cwd"])
        .arg(dir.path())
        .args(["--", "sh", "-c", "echo $GREETING; pwd"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("howdy\n"));
}

#[cfg(unix)]
#[test]
fn test_spawn_run_timeout_exits_124() {
    proclaunch()
        .args(["spawn", "--run-timeout-ms", "300", "--", "sleep", "5"])
        .assert()
        .code(124);
}

#[cfg(unix)]
#[test]
fn test_spawn_reports_progress() {
    proclaunch()
        .args(["spawn", "--poll-ms", "50", "--", "sh", "-c", "echo a; sleep 0.3; echo b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a\nb\n"))
        .stderr(predicate::str::contains("stdout_lines="));
}

#[cfg(unix)]
#[test]
fn test_profile_runs_configured_launch() {
    let (_dir, config) = common::create_config(
        r#"
        [env]
        WHO = "world"

        [profiles.greet]
        executable = "sh"
        arguments = "-c 'echo hello $WHO'"
        "#,
    );

    proclaunch()
        .arg("-c")
        .arg(&config)
        .args(["profile", "greet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));

    proclaunch()
        .arg("-c")
        .arg(&config)
        .args(["profile", "greet", "--async"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));
}

#[test]
fn test_profile_missing_lists_known_profiles() {
    let (_dir, config) = common::create_config(
        r#"
        [profiles.build]
        executable = "cargo"
        "#,
    );

    proclaunch()
        .arg("-c")
        .arg(&config)
        .args(["profile", "deploy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Profile 'deploy' not found"))
        .stderr(predicate::str::contains("build"));
}

#[test]
fn test_config_shows_resolved_profile_json() {
    let (_dir, config) = common::create_config(
        r#"
        [defaults]
        timeout_ms = 1234

        [profiles.build]
        executable = "cargo"
        arguments = "build --release"
        run_timeout_ms = 60000
        "#,
    );

    let output = proclaunch()
        .arg("-c")
        .arg(&config)
        .args(["--format", "json", "config", "--profile", "build"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["executable"], "cargo");
    assert_eq!(json["timeout_ms"], 1234);
    assert_eq!(json["run_timeout_ms"], 60000);
    assert_eq!(json["startup_timeout_ms"], 5000);
}
