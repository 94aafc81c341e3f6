// End-to-end tests for the `cashapp` binary.
// Run with: cargo test -p cashapp-cli --test cashapp_cli_tests

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn cashapp() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cashapp"));
    cmd.env_remove("CASHAPP_LOG");
    cmd
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../recon/tests/fixtures").join(name)
}

fn run(args: &[&str]) -> Output {
    cashapp().args(args).output().expect("failed to spawn cashapp")
}

fn path_str(p: &Path) -> &str {
    p.to_str().expect("non-utf8 path")
}

#[test]
fn validate_accepts_fixture_config() {
    let out = run(&["validate", path_str(&fixture("cashapp.toml"))]);
    assert_eq!(out.status.code(), Some(0));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("valid: 'AR cash application'"), "stderr: {stderr}");
}

#[test]
fn validate_rejects_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[posting]\ntimeout_ms = 0\n").unwrap();

    let out = run(&["validate", path_str(&path)]);
    assert_eq!(out.status.code(), Some(60));
}

#[test]
fn classify_json_output() {
    let out = run(&["classify", path_str(&fixture("payments.csv")), "--json"]);
    assert_eq!(out.status.code(), Some(0));

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["summary"]["total_payments"], 9);
    assert_eq!(json["summary"]["exceptions"], 7);
    let payments = json["payments"].as_array().unwrap();
    assert_eq!(payments[1]["id"], "pmt_002");
    assert_eq!(payments[1]["exception_reason"], "REMITTANCE_PARSE_ERROR");
    assert_eq!(payments[1]["exception_category"], "MISSING_REMITTANCE");
}

#[test]
fn classify_missing_column_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payments.csv");
    std::fs::write(&path, "id,currency\np1,USD\n").unwrap();

    let out = run(&["classify", path_str(&path)]);
    assert_eq!(out.status.code(), Some(61));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("hint:"), "stderr: {stderr}");
}

#[test]
fn classify_reports_invalid_payments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payments.csv");
    std::fs::write(
        &path,
        "id,amount_cents,currency,bank_account,parse_error\np1,100,USD,chase-op,yes\np2,250,usd,chase-op,\n",
    )
    .unwrap();

    let out = run(&["classify", path_str(&path), "--json"]);
    assert_eq!(out.status.code(), Some(62));

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["summary"]["total_payments"], 2);
    assert_eq!(json["summary"]["by_ready_state"]["BLOCKED"], 1);
    assert_eq!(json["rejected"][0]["payment_id"], "p2");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("rejected p2"), "stderr: {stderr}");
}

#[test]
fn batch_with_rejection_exits_62_and_writes_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("batch.json");

    let out = run(&[
        "batch",
        path_str(&fixture("payments.csv")),
        "--config",
        path_str(&fixture("cashapp.toml")),
        "--posting-date",
        "2026-01-31",
        "--output",
        path_str(&output),
    ]);
    assert_eq!(out.status.code(), Some(62));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(json["batch"]["id"], "batch-2026-01-31");
    assert_eq!(json["batch"]["total_payments"], 8);
    assert_eq!(json["batch"]["ready_count"], 2);
    assert_eq!(json["rejected"][0]["payment_id"], "pmt_007");
}

#[test]
fn batch_simulated_post_is_partial() {
    let out = run(&[
        "batch",
        path_str(&fixture("payments.json")),
        "--config",
        path_str(&fixture("cashapp.toml")),
        "--id",
        "b_sim",
        "--simulate-post",
        "--json",
    ]);
    assert_eq!(out.status.code(), Some(0));

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["posting"]["summary"]["posted"], 2);
    assert_eq!(json["posting"]["status"], "PARTIAL");
    assert_eq!(json["batch"]["status"], "PARTIAL");
    assert_eq!(json["batch"]["posted_count"], 2);
}

#[test]
fn unknown_subcommand_is_usage_error() {
    let out = run(&["reconcile"]);
    assert_eq!(out.status.code(), Some(2));
}
