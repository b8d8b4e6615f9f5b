use predicates::prelude::*;

mod support;
use support::{stdout_json, Sandbox};

#[test]
fn test_help_output() {
    let sandbox = Sandbox::new();
    sandbox
        .berth()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("launch"))
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("recover"))
        .stdout(predicate::str::contains("containers"))
        .stdout(predicate::str::contains("server"));
}

#[test]
fn test_version_output() {
    let sandbox = Sandbox::new();
    sandbox
        .berth()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "berth {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_default_output() {
    let sandbox = Sandbox::new();
    sandbox
        .berth()
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Run 'berth --help' to see available commands.",
        ));
}

#[test]
fn test_server_set_then_show() {
    let sandbox = Sandbox::new();
    sandbox
        .berth()
        .arg("server")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("No server is configured"));

    sandbox
        .berth()
        .args([
            "server",
            "set",
            "--host",
            "tcp://engine:2376",
            "--swarm",
            "--site-prefix",
            "/data/site",
            "--engine-prefix",
            "/mnt/site",
        ])
        .assert()
        .success();

    let output = sandbox
        .berth()
        .args(["server", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let server = stdout_json(&output);
    assert_eq!(server["host"], "tcp://engine:2376");
    assert_eq!(server["swarmMode"], true);
    assert_eq!(server["pathTranslation"]["enginePrefix"], "/mnt/site");
    assert!(sandbox.data_dir().join("server.json").exists());
}

#[test]
fn test_engine_commands_without_server_exit_3() {
    let sandbox = Sandbox::new();
    sandbox
        .berth()
        .arg("images")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No container engine server is configured"));
}

#[test]
fn test_watch_once_without_server_keeps_running() {
    // Poll failures are logged, not fatal
    let sandbox = Sandbox::new();
    sandbox
        .berth()
        .args(["watch", "--once"])
        .assert()
        .success();
}

#[test]
fn test_bad_settings_file() {
    let sandbox = Sandbox::new();
    std::fs::write(sandbox.dir.path().join("berth.toml"), "poll_interval_secs = 0\n").unwrap();
    sandbox
        .berth()
        .args(["containers", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll_interval_secs"));
}
