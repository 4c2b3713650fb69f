//! Corruption recovery tests for medtrack.
//!
//! These tests verify the system handles:
//! - Corrupted profile files
//! - Corrupted watermark files
//! - Schedules edited into an invalid state

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cli(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("medtrack"));
    cmd.env("XDG_CONFIG_HOME", dir.path().join("config"))
        .arg("--data-dir")
        .arg(dir.path());
    cmd
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

#[test]
fn test_corrupted_profile_file_is_reported_not_replaced() {
    let temp_dir = setup_test_dir();
    let profiles_path = temp_dir.path().join("profiles.json");
    fs::write(&profiles_path, "{ invalid json }}}}").unwrap();

    cli(&temp_dir)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Json"));

    // Writes must not clobber the user's history either
    cli(&temp_dir)
        .args(["add", "Aspirin", "--times", "morning"])
        .assert()
        .failure();

    let contents = fs::read_to_string(&profiles_path).unwrap();
    assert_eq!(contents, "{ invalid json }}}}");
}

#[test]
fn test_corrupted_watermark_file_is_treated_as_empty() {
    let temp_dir = setup_test_dir();
    fs::write(temp_dir.path().join("watermarks.json"), "not json at all").unwrap();

    cli(&temp_dir)
        .args(["add", "Aspirin", "--times", "morning,noon,evening"])
        .assert()
        .success();

    cli(&temp_dir).args(["watch", "--once"]).assert().success();
}

#[test]
fn test_invalid_stored_schedule_is_a_configuration_error() {
    let temp_dir = setup_test_dir();
    let book = r#"{
        "profiles": [{
            "id": "default-user",
            "name": "Me",
            "avatar": "👤",
            "medications": [{
                "id": "med-1",
                "name": "Broken",
                "quantity": 1.0,
                "unit": "tablet",
                "schedule": { "type": "interval", "hours": 0, "start_hour": 8 }
            }]
        }],
        "active_profile_id": "default-user"
    }"#;
    fs::write(temp_dir.path().join("profiles.json"), book).unwrap();

    cli(&temp_dir)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration"));
}

#[test]
fn test_dangling_active_profile_is_repaired() {
    let temp_dir = setup_test_dir();
    let book = r#"{
        "profiles": [{ "id": "p1", "name": "Alex", "avatar": "", "medications": [] }],
        "active_profile_id": "gone"
    }"#;
    fs::write(temp_dir.path().join("profiles.json"), book).unwrap();

    cli(&temp_dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Alex"));
}

#[test]
fn test_missing_data_dir_is_created_on_write() {
    let temp_dir = setup_test_dir();
    let nested = temp_dir.path().join("deeper/still");

    Command::new(assert_cmd::cargo::cargo_bin!("medtrack"))
        .env("XDG_CONFIG_HOME", temp_dir.path().join("config"))
        .arg("--data-dir")
        .arg(&nested)
        .args(["add", "Aspirin", "--times", "noon"])
        .assert()
        .success();

    assert!(nested.join("profiles.json").exists());
}
