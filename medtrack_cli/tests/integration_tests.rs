//! End-to-end tests for the medtrack CLI.
//!
//! Each test drives the real binary against a throwaway data directory and
//! asserts on its output, covering the add/schedule/pattern/log/merge flow.

use assert_cmd::Command;
use chrono::{Datelike, Duration, TimeZone, Utc, Weekday};
use predicates::prelude::*;
use tempfile::TempDir;

fn cli() -> Command {
    Command::cargo_bin("medtrack").expect("Failed to find medtrack binary")
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn weekday_flag(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn add_med(data_dir: &std::path::Path, name: &str, dosage: &str) {
    cli()
        .arg("add-med")
        .arg(name)
        .arg("--dosage")
        .arg(dosage)
        .arg("--data-dir")
        .arg(data_dir)
        .assert()
        .success();
}

#[test]
fn test_add_med_and_duplicate_name_rejected() {
    let temp_dir = setup_test_dir();
    add_med(temp_dir.path(), "Lisinopril", "10");

    cli()
        .arg("add-med")
        .arg("Lisinopril")
        .arg("--dosage")
        .arg("10")
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .failure();
}

#[test]
fn test_due_shows_pattern_doses() {
    let temp_dir = setup_test_dir();
    add_med(temp_dir.path(), "Prednisone", "5");

    cli()
        .args(["add-schedule", "Prednisone", "--at", "08:00"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    let today = Utc::now().date_naive();
    cli()
        .args(["set-pattern", "Prednisone", "--cycle", "4.0,4.0,3.0"])
        .arg("--from")
        .arg(today.to_string())
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    // Days 0,1 of the cycle are 4; day 2 is 3
    cli()
        .args(["due", "--days", "3", "--zone", "UTC"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("4 mg"))
        .stdout(predicate::str::contains("3 mg"));
}

#[test]
fn test_log_and_duplicate_guard() {
    let temp_dir = setup_test_dir();
    add_med(temp_dir.path(), "Metformin", "500");

    cli()
        .args(["add-schedule", "Metformin", "--at", "08:00"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    let today = Utc::now().date_naive();
    let at = Utc
        .from_utc_datetime(&today.and_hms_opt(8, 5, 0).unwrap())
        .to_rfc3339();

    cli()
        .args(["log", "Metformin", "--at", &at])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Dose logged"));

    // Second same-day attempt is rejected by the duplicate guard
    let later = Utc
        .from_utc_datetime(&today.and_hms_opt(9, 0, 0).unwrap())
        .to_rfc3339();
    cli()
        .args(["log", "Metformin", "--at", &later])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("already logged"));
}

#[test]
fn test_prn_med_exempt_from_duplicate_guard() {
    let temp_dir = setup_test_dir();

    cli()
        .args(["add-med", "Ibuprofen", "--dosage", "200", "--prn"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    for _ in 0..2 {
        cli()
            .args(["log", "Ibuprofen"])
            .arg("--data-dir")
            .arg(temp_dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Dose logged"));
    }
}

#[test]
fn test_late_log_warns_then_confirms() {
    let temp_dir = setup_test_dir();
    add_med(temp_dir.path(), "Warfarin", "5");

    // Schedule fires only on yesterday's weekday, so yesterday's event is
    // the nearest one to the late attempt
    let yesterday = Utc::now().date_naive() - Duration::days(1);
    cli()
        .args(["add-schedule", "Warfarin", "--at", "08:00"])
        .arg("--days")
        .arg(weekday_flag(yesterday.weekday()))
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    // 13 hours past due: outside the 12h safety window
    let late = Utc
        .from_utc_datetime(&yesterday.and_hms_opt(21, 0, 0).unwrap())
        .to_rfc3339();

    cli()
        .args(["log", "Warfarin", "--at", &late])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("--confirm-late"));

    cli()
        .args(["log", "Warfarin", "--at", &late, "--confirm-late"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("logged late"));
}

#[test]
fn test_non_positive_dosage_rejected() {
    let temp_dir = setup_test_dir();

    cli()
        .args(["add-med", "Lisinopril", "--dosage", "0"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("dosage must be positive"));
}

#[test]
fn test_sweep_resolves_unlogged_overdue_doses() {
    let temp_dir = setup_test_dir();
    add_med(temp_dir.path(), "Metoprolol", "25");

    // Fires only on the weekday of three days ago, so the 14-day sweep
    // window holds exactly two due events: 3 and 10 days back, unlogged
    let three_days_ago = Utc::now().date_naive() - Duration::days(3);
    cli()
        .args(["add-schedule", "Metoprolol", "--at", "08:00"])
        .arg("--days")
        .arg(weekday_flag(three_days_ago.weekday()))
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    // The 10-day-old dose was superseded by the 3-day-old event; the
    // 3-day-old one has aged past the 48h unknown cutoff
    cli()
        .arg("sweep")
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1 missed, 1 unknown"));

    // The missed dose now counts against adherence
    cli()
        .args(["adherence", "--days", "14"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0%"));

    // Re-running the sweep is a no-op
    cli()
        .arg("sweep")
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0 missed, 0 unknown"));
}

#[test]
fn test_skip_falls_back_to_nearest_due_event() {
    let temp_dir = setup_test_dir();
    add_med(temp_dir.path(), "Losartan", "50");

    let yesterday = Utc::now().date_naive() - Duration::days(1);
    cli()
        .args(["add-schedule", "Losartan", "--at", "08:00"])
        .arg("--days")
        .arg(weekday_flag(yesterday.weekday()))
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    // Nothing logged and nothing swept yet: skipping still works
    cli()
        .args(["skip", "Losartan"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped"));

    // The event is resolved now; a second skip has nothing to act on
    cli()
        .args(["skip", "Losartan"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("already resolved"));
}

#[test]
fn test_adherence_reports_no_data_on_empty_history() {
    let temp_dir = setup_test_dir();

    cli()
        .args(["adherence", "--days", "7"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No scheduled doses"));
}

#[test]
fn test_rollup_archives_wal() {
    let temp_dir = setup_test_dir();

    cli()
        .args(["add-med", "Ibuprofen", "--dosage", "200", "--prn"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();
    cli()
        .args(["log", "Ibuprofen"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    cli()
        .args(["rollup", "--cleanup"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled up 1"));

    assert!(temp_dir.path().join("doses.csv").exists());
    assert!(!temp_dir.path().join("wal/doses.wal").exists());
}

#[test]
fn test_merge_surfaces_conflicts() {
    let temp_dir = setup_test_dir();

    cli()
        .args(["add-med", "Ibuprofen", "--dosage", "200", "--prn"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();
    cli()
        .args(["log", "Ibuprofen", "--dose", "200"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    // Simulate the same entry edited later on another device
    let wal_path = temp_dir.path().join("wal/doses.wal");
    let line = std::fs::read_to_string(&wal_path).unwrap();
    let mut remote: serde_json::Value = serde_json::from_str(line.lines().next().unwrap()).unwrap();
    remote["actual_dosage"] = serde_json::json!(400.0);
    remote["device_id"] = serde_json::json!("remote-tablet");
    let newer = Utc::now() + Duration::hours(1);
    remote["modified_at"] = serde_json::json!(newer.to_rfc3339());

    let remote_path = temp_dir.path().join("remote.wal");
    std::fs::write(&remote_path, format!("{}\n", remote)).unwrap();

    cli()
        .arg("merge")
        .arg(&remote_path)
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1 conflicts surfaced"))
        .stdout(predicate::str::contains("overwrote edits"));
}
