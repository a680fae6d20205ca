//! Integration tests for the `rackfleet` CLI binary.
//!
//! Argument parsing, help output, completions, the config commands and the
//! offline topology commands against snapshots in a temp directory. None
//! of them need a region.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `rackfleet` binary with env isolation.
///
/// Clears all `RACKFLEET_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn rackfleet_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("rackfleet");
    cmd.env("HOME", "/tmp/rackfleet-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/rackfleet-cli-test-nonexistent")
        .env_remove("RACKFLEET_CONFIG")
        .env_remove("RACKFLEET_OUTPUT")
        .env_remove("RACKFLEET_SECRET")
        .env_remove("RACKFLEET_INTERFACES")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn write_json(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// A topology holding one rack controller and nothing else.
fn bare_topology(dir: &TempDir) -> PathBuf {
    write_json(
        dir,
        "topology.json",
        &json!({
            "nodes": [{
                "id": 1,
                "system_id": "abc123",
                "hostname": "rack1",
                "type": "rack_controller"
            }]
        }),
    )
}

/// eth0 with a static address on 10.0.0.0/24.
fn one_nic_report(dir: &TempDir) -> PathBuf {
    write_json(
        dir,
        "report.json",
        &json!({
            "eth0": {
                "type": "physical",
                "mac_address": "52:54:00:00:00:01",
                "links": [{"mode": "static", "address": "10.0.0.2/24"}]
            }
        }),
    )
}

fn reconcile_and_write(topology: &Path, report: &Path) {
    rackfleet_cmd()
        .args(["reconcile", "--node", "rack1", "--write", "-q"])
        .arg("--topology")
        .arg(topology)
        .arg("--report")
        .arg(report)
        .assert()
        .success();
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = rackfleet_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    rackfleet_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("rack controller")
            .and(predicate::str::contains("reconcile"))
            .and(predicate::str::contains("dhcp-config"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    rackfleet_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rackfleet"));
}

#[test]
fn test_unknown_output_format_is_usage_error() {
    let output = rackfleet_cmd()
        .args(["-o", "xml", "config", "path"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    rackfleet_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rackfleet"));
}

#[test]
fn test_completions_zsh() {
    rackfleet_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_env() {
    rackfleet_cmd()
        .env("RACKFLEET_CONFIG", "/etc/rackfleet/rack.toml")
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/etc/rackfleet/rack.toml"));
}

#[test]
fn test_config_show_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "region_urls = [\"http://region:5240/MAAS\"]\nhostname = \"rack1\"\n\n[rpc]\ncall_timeout = 20\n",
    )
    .unwrap();

    let output = rackfleet_cmd()
        .args(["config", "show", "-o", "json"])
        .arg("--config")
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let shown: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["region_urls"][0], "http://region:5240/MAAS");
    assert_eq!(shown["hostname"], "rack1");
    assert_eq!(shown["rpc"]["call_timeout"], 20);
    assert_eq!(shown["rpc"]["keepalive_interval"], 30);
}

#[test]
fn test_run_without_secret_is_auth_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            "region_urls = [\"http://127.0.0.1:9/MAAS\"]\nstate_dir = \"{}\"\n",
            dir.path().join("state").display()
        ),
    )
    .unwrap();

    let output = rackfleet_cmd()
        .args(["run", "--interfaces", "/nonexistent/report.json"])
        .arg("--config")
        .arg(&path)
        .env("RACKFLEET_SECRET", "")
        .output()
        .unwrap();
    // Either no secret at all, or a keyring entry on the host; never success.
    assert!(!output.status.success());
}

#[test]
fn test_run_rejects_malformed_secret() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "region_urls = [\"http://127.0.0.1:9/MAAS\"]\n").unwrap();

    let output = rackfleet_cmd()
        .args(["run", "--interfaces", "/nonexistent/report.json"])
        .arg("--config")
        .arg(&path)
        .env("RACKFLEET_SECRET", "not-hex")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2), "{}", combined_output(&output));
    assert!(combined_output(&output).contains("secret"));
}

// ── Reconcile ───────────────────────────────────────────────────────

#[test]
fn test_reconcile_reports_created_interfaces() {
    let dir = tempfile::tempdir().unwrap();
    let topology = bare_topology(&dir);
    let report = one_nic_report(&dir);

    let output = rackfleet_cmd()
        .args(["reconcile", "--node", "abc123", "-o", "json"])
        .arg("--topology")
        .arg(&topology)
        .arg("--report")
        .arg(&report)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let outcome: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["created"], json!(["eth0"]));
    assert_eq!(outcome["deleted"], json!([]));

    // Without --write the snapshot is untouched.
    assert!(read_json(&topology)["interfaces"].is_null());
}

#[test]
fn test_reconcile_write_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let topology = bare_topology(&dir);
    let report = one_nic_report(&dir);

    reconcile_and_write(&topology, &report);
    let saved = read_json(&topology);
    assert_eq!(saved["interfaces"].as_array().unwrap().len(), 1);
    assert_eq!(saved["subnets"][0]["cidr"], "10.0.0.0/24");

    rackfleet_cmd()
        .args(["reconcile", "--node", "rack1"])
        .arg("--topology")
        .arg(&topology)
        .arg("--report")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
}

#[test]
fn test_reconcile_unknown_node_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let topology = bare_topology(&dir);
    let report = one_nic_report(&dir);

    let output = rackfleet_cmd()
        .args(["reconcile", "--node", "rack9"])
        .arg("--topology")
        .arg(&topology)
        .arg("--report")
        .arg(&report)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("rack9"));
}

#[test]
fn test_reconcile_malformed_report_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let topology = bare_topology(&dir);
    let report = dir.path().join("report.json");
    std::fs::write(&report, "{ not json").unwrap();

    let output = rackfleet_cmd()
        .args(["reconcile", "--node", "rack1"])
        .arg("--topology")
        .arg(&topology)
        .arg("--report")
        .arg(&report)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── DHCP config ─────────────────────────────────────────────────────

#[test]
fn test_dhcp_config_off_without_managed_vlans() {
    let dir = tempfile::tempdir().unwrap();
    let topology = bare_topology(&dir);
    reconcile_and_write(&topology, &one_nic_report(&dir));

    rackfleet_cmd()
        .args(["dhcp-config", "--rack", "rack1", "--color", "never"])
        .arg("--topology")
        .arg(&topology)
        .assert()
        .success()
        .stdout(predicate::str::contains("DHCP is off"));
}

#[test]
fn test_dhcp_config_lists_served_subnets() {
    let dir = tempfile::tempdir().unwrap();
    let topology = bare_topology(&dir);
    reconcile_and_write(&topology, &one_nic_report(&dir));

    let mut snapshot = read_json(&topology);
    snapshot["vlans"][0]["dhcp_on"] = json!(true);
    snapshot["vlans"][0]["primary_rack"] = json!(1);
    std::fs::write(&topology, serde_json::to_string(&snapshot).unwrap()).unwrap();

    rackfleet_cmd()
        .args(["dhcp-config", "--rack", "abc123", "-o", "plain"])
        .arg("--topology")
        .arg(&topology)
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.0.0/24"));

    let output = rackfleet_cmd()
        .args(["dhcp-config", "--rack", "rack1", "--family", "v4", "-o", "json"])
        .arg("--topology")
        .arg(&topology)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let config: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(config.get("v6").is_none());
    assert_eq!(config["v4"]["shared_networks"][0]["interface"], "eth0");
    assert_eq!(config["v4"]["hosts"][0]["mac"], "52:54:00:00:00:01");
}

#[test]
fn test_dhcp_config_rejects_missing_topology() {
    let output = rackfleet_cmd()
        .args(["dhcp-config", "--rack", "rack1", "--topology", "/nonexistent/topology.json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
