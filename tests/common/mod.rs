//! Common test utilities for hawser integration tests.
//!
//! Provides `TestEnv` for isolated test environments: each test gets its
//! own working directory (where `.env` and reports live) and its own state
//! directory, so nothing touches the user's real configuration.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::Path;
pub use tempfile::TempDir;

/// A test environment with an isolated working directory and state
/// directory.
///
/// `hawser()` returns a `Command` with a scrubbed environment, so
/// `HAWSER_*` variables from the host shell cannot leak credentials or
/// overrides into tests. Everything is per-instance, making tests
/// parallel-safe.
pub struct TestEnv {
    pub work_dir: TempDir,
    pub state_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            work_dir: TempDir::new().unwrap(),
            state_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the hawser binary rooted in this environment.
    pub fn hawser(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_hawser"));
        cmd.current_dir(self.work_dir.path());
        cmd.env_clear();
        cmd.env("HAWSER_STATE_DIR", self.state_dir.path());
        cmd
    }

    /// Write the local `.env` file the command under test will load.
    pub fn write_env_file(&self, contents: &str) {
        self.write_file(".env", contents);
    }

    /// Write an arbitrary file into the working directory.
    pub fn write_file(&self, name: &str, contents: &str) {
        fs::write(self.work_dir.path().join(name), contents).unwrap();
    }

    pub fn work_path(&self) -> &Path {
        self.work_dir.path()
    }

    pub fn state_path(&self) -> &Path {
        self.state_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
