//! Shared test utilities for berth CLI tests.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Path of a file under the shared `fixtures/` directory
pub fn fixture(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(relative)
}

/// A scratch data directory plus a `berth` command bound to it.
///
/// The command runs inside the temp directory, so no stray `berth.toml` is
/// picked up, and every `BERTH_*` path points into it.
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn berth(&self) -> Command {
        let mut cmd = Command::cargo_bin("berth").expect("berth binary");
        cmd.current_dir(self.dir.path())
            .env_remove("BERTH_TOKEN")
            .env_remove("BERTH_LOG_FORMAT")
            .env("BERTH_DATA_DIR", self.data_dir())
            .env("BERTH_BUILD_PATH", self.dir.path().join("build"))
            .env("BERTH_LOG_DIR", self.dir.path().join("logs"))
            .env("BERTH_SITE_DATA_DIR", fixture("site"))
            .env("BERTH_USER", "tester");
        cmd
    }
}

/// Parse stdout that holds one pretty-printed JSON document
pub fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("stdout is JSON")
}
