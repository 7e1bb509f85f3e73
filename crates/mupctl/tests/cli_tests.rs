//! Command-line behavior of the built `mupctl` binary

use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

fn mupctl(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mupctl").unwrap();
    cmd.env("MUP_STATE_DIR", home.path().join("state"))
        .env("MUP_LOCK_FILE", home.path().join("mup.lock"))
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_and_version() {
    let home = TempDir::new().unwrap();
    let out = mupctl(&home).arg("--help").output().unwrap();
    assert!(out.status.success());
    let help = String::from_utf8_lossy(&out.stdout);
    assert!(help.contains("--only"));
    assert!(help.contains("--dry-run"));
    assert!(help.contains("--stats"));

    let out = mupctl(&home).arg("--version").output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).starts_with("mupctl "));
}

#[test]
fn test_unknown_flag_is_usage_error() {
    let home = TempDir::new().unwrap();
    mupctl(&home).arg("--bogus").assert().code(64);
    mupctl(&home).args(["--only", "snap"]).assert().code(64);
}

#[test]
fn test_missing_explicit_config_exits_2() {
    let home = TempDir::new().unwrap();
    mupctl(&home)
        .args(["--config", "/nonexistent/multi-updater/x.conf"])
        .assert()
        .code(2);
}

#[test]
fn test_stats_without_history() {
    let home = TempDir::new().unwrap();
    let out = mupctl(&home).arg("--stats").output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("Update statistics"));
    assert!(text.contains("No runs recorded yet"));
    assert!(!home.path().join("state/logs").exists());
}

#[test]
fn test_stats_reads_record() {
    let home = TempDir::new().unwrap();
    let state = home.path().join("state");
    fs::create_dir_all(&state).unwrap();
    fs::write(
        state.join("stats.json"),
        r#"{"total_updates":4,"successful_updates":3,"failed_updates":1,"avg_duration":75.0,"last_update":null,"last_duration":60.0}"#,
    )
    .unwrap();

    let out = mupctl(&home).args(["--stats", "--no-color"]).output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("Total runs:       4"));
    assert!(text.contains("Success rate:     75.0%"));
    assert!(text.contains("Average duration: 1m 15s"));
}

#[test]
fn test_held_lock_exits_1_without_run_log() {
    let home = TempDir::new().unwrap();
    let holder = format!(
        r#"{{"pid":{},"created_at":"2026-01-01T00:00:00+00:00","hostname":"test"}}"#,
        std::process::id()
    );
    fs::write(home.path().join("mup.lock"), holder).unwrap();

    let out = mupctl(&home).arg("--no-color").output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("another update run is active"));

    let logs = home.path().join("state/logs");
    let left = fs::read_dir(&logs).map(|d| d.count()).unwrap_or(0);
    assert_eq!(left, 0);
    assert!(home.path().join("mup.lock").exists());
}

#[test]
fn test_unusable_state_dir_is_not_reported_as_lock() {
    let home = TempDir::new().unwrap();
    let blocker = home.path().join("not-a-dir");
    fs::write(&blocker, b"").unwrap();

    let out = mupctl(&home)
        .env("MUP_STATE_DIR", blocker.join("state"))
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(70));
    assert!(String::from_utf8_lossy(&out.stderr).contains("cannot create run log"));
}
