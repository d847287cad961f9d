//! CLI subprocess integration tests.
//!
//! These tests invoke the `corral` binary with the mock backend and verify
//! exit codes, stdout content, and JSON output shape. The mock keeps its
//! containers in memory, so each invocation starts with an empty container
//! table while the store persists between invocations.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn corral_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_corral"));
    cmd.env_remove("CORRAL_STORE");
    cmd.env("CORRAL_SKIP_PREREQS", "1");
    cmd
}

fn write_mock_config(dir: &Path, low: u16, high: u16) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        format!(
            r#"[runtime]
backend = "mock"

[ports]
low = {low}
high = {high}
"#
        ),
    )
    .unwrap();
    path
}

struct Env {
    store: tempfile::TempDir,
    config: PathBuf,
    config_dir: tempfile::TempDir,
}

impl Env {
    fn new() -> Self {
        let config_dir = tempfile::tempdir().unwrap();
        let config = write_mock_config(config_dir.path(), 10000, 10001);
        Self {
            store: tempfile::tempdir().unwrap(),
            config,
            config_dir,
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        corral_bin()
            .arg("--store")
            .arg(self.store.path())
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .output()
            .unwrap()
    }

    fn create_json(&self, branch: &str) -> serde_json::Value {
        let out = self.run(&[
            "--json", "create", "--project", "p1", "--branch", branch, "--port", "ui:3000",
        ]);
        assert!(
            out.status.success(),
            "create must exit 0. stderr: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        let stdout = String::from_utf8_lossy(&out.stdout);
        serde_json::from_str(&stdout)
            .unwrap_or_else(|e| panic!("create --json must produce valid JSON: {e}\nstdout: {stdout}"))
    }
}

#[test]
fn cli_version_exits_zero() {
    let output = corral_bin().arg("--version").output().unwrap();
    assert!(output.status.success(), "corral --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("corral"), "version output must contain 'corral': {stdout}");
}

#[test]
fn cli_help_lists_lifecycle_commands() {
    let output = corral_bin().arg("--help").output().unwrap();
    assert!(output.status.success(), "corral --help must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["create", "pause", "resume", "delete", "exec", "drift"] {
        assert!(stdout.contains(cmd), "help must list '{cmd}' command");
    }
}

#[test]
fn cli_create_assigns_lowest_port() {
    let env = Env::new();
    let created = env.create_json("main");
    assert_eq!(created["status"], "running");
    assert_eq!(created["ports"][0]["name"], "ui");
    assert_eq!(created["ports"][0]["host_port"], 10000);
    assert!(created["id"].is_string());
    assert!(created["container_id"].is_string());
}

#[test]
fn cli_create_exhausted_range_fails() {
    let env = Env::new();
    env.create_json("a");
    env.create_json("b");
    let out = env.run(&["create", "--project", "p1", "--branch", "c", "--port", "ui:3000"]);
    assert_eq!(out.status.code(), Some(1), "exhausted range is a server-side failure");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("10000-10001"), "stderr: {stderr}");
}

#[test]
fn cli_create_taken_port_is_client_error() {
    let env = Env::new();
    env.create_json("a");
    let out = env.run(&[
        "create", "--project", "p1", "--branch", "b", "--port", "ui:3000:10000",
    ]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn cli_create_bad_port_spec_is_client_error() {
    let env = Env::new();
    let out = env.run(&["create", "--project", "p1", "--branch", "b", "--port", "ui"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid port spec"));
}

#[test]
fn cli_list_json_output_stable() {
    let env = Env::new();
    env.create_json("main");

    let output = env.run(&["--json", "list", "--project", "p1"]);
    assert!(
        output.status.success(),
        "list --json must exit 0. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("list --json must produce valid JSON: {e}\nstdout: {stdout}"));
    let arr = parsed.as_array().expect("list output must be a JSON array");
    assert_eq!(arr.len(), 1, "should have exactly 1 environment");
    assert!(arr[0]["id"].is_string());
    assert_eq!(arr[0]["project_id"], "p1");
    assert_eq!(arr[0]["branch"], "main");
}

#[test]
fn cli_store_and_config_accepted_after_subcommand() {
    let env = Env::new();
    env.create_json("main");

    let output = corral_bin()
        .arg("list")
        .arg("--project")
        .arg("p1")
        .arg("--store")
        .arg(env.store.path())
        .arg("--config")
        .arg(&env.config)
        .arg("--json")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "flags after the subcommand must be accepted. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let parsed: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
}

#[test]
fn cli_get_accepts_prefix() {
    let env = Env::new();
    let created = env.create_json("main");
    let id = created["id"].as_str().unwrap();

    let output = env.run(&["--json", "get", &id[..8]]);
    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(parsed["id"], id);
}

#[test]
fn cli_get_unknown_id_is_client_error() {
    let env = Env::new();
    let out = env.run(&["get", "nonexistent"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn cli_delete_releases_ports() {
    let env = Env::new();
    let created = env.create_json("a");
    env.create_json("b");
    let id = created["id"].as_str().unwrap();

    // The container lives in another process's mock table; removal failure is
    // tolerated and the row still becomes a tombstone.
    let out = env.run(&["delete", id]);
    assert!(
        out.status.success(),
        "delete must exit 0. stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let again = env.create_json("c");
    assert_eq!(again["ports"][0]["host_port"], 10000);

    let out = env.run(&["get", id]);
    assert_eq!(out.status.code(), Some(2), "tombstone must read as not found");

    let out = env.run(&["--json", "list", "--project", "p1", "--all"]);
    let parsed: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&out.stdout)).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 3);
}

#[test]
fn cli_drift_reports_missing_containers() {
    let env = Env::new();
    let created = env.create_json("main");

    // A fresh process has an empty mock table, so the container is gone.
    let out = env.run(&["--json", "drift"]);
    assert_eq!(out.status.code(), Some(1), "drift must exit 1 when drift is found");
    let parsed: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&out.stdout)).unwrap();
    assert_eq!(parsed["checked"], 1);
    assert_eq!(parsed["drifted"][0]["env_id"], created["id"]);

    let out = env.run(&["--json", "get", created["id"].as_str().unwrap()]);
    let after: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&out.stdout)).unwrap();
    assert_eq!(after["status"], "running", "drift detection must not repair");
}

#[test]
fn cli_doctor_json() {
    let env = Env::new();
    let out = env.run(&["--json", "doctor"]);
    assert!(
        out.status.success(),
        "doctor must exit 0 with mock backend. stdout: {}",
        String::from_utf8_lossy(&out.stdout)
    );
    let parsed: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&out.stdout)).unwrap();
    assert_eq!(parsed["healthy"], true);
    assert!(parsed["checks"].is_array());
}

#[test]
fn cli_invalid_config_fails() {
    let env = Env::new();
    let bad = write_mock_config(env.config_dir.path(), 20000, 10000);
    let out = corral_bin()
        .arg("--store")
        .arg(env.store.path())
        .arg("--config")
        .arg(&bad)
        .args(["list"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("config error"));
}

#[test]
fn cli_completions_bash() {
    let out = corral_bin().args(["completions", "bash"]).output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("corral"));
}
