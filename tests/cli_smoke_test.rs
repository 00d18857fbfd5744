//! Smoke tests for the hawser CLI.
//!
//! These verify argument parsing and the startup contract: every command
//! that talks to a vendor requires an environment file and fails with a
//! clean error when none exists.

mod common;

use common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_version_flag() {
    let env = TestEnv::new();
    env.hawser()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hawser"))
        .stdout(predicate::str::contains("0.4.1"));
}

#[test]
fn test_help_lists_commands() {
    let env = TestEnv::new();
    env.hawser()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("run-once"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("blocks"))
        .stdout(predicate::str::contains("user"))
        .stdout(predicate::str::contains("issues"))
        .stdout(predicate::str::contains("metrics"))
        .stdout(predicate::str::contains("leave"));
}

#[test]
fn test_metrics_help_lists_subcommands() {
    let env = TestEnv::new();
    env.hawser()
        .args(["metrics", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("maturity"))
        .stdout(predicate::str::contains("plot"))
        .stdout(predicate::str::contains("sync"));
}

#[test]
fn test_invalid_command() {
    let env = TestEnv::new();
    env.hawser()
        .arg("not-a-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_invalid_sync_op_is_rejected() {
    let env = TestEnv::new();
    env.hawser()
        .args(["sync", "app", "--op", "everything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_missing_env_file_is_a_startup_error() {
    let env = TestEnv::new();
    env.hawser()
        .arg("run-once")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("no environment file found"));
}

#[test]
fn test_explicit_env_file_must_exist() {
    let env = TestEnv::new();
    env.hawser()
        .args(["--env-file", "missing.env", "run-once"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no environment file found"))
        .stderr(predicate::str::contains("missing.env"));
}
