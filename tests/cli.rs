// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn avaflow(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("avaflow").unwrap();
    cmd.current_dir(dir)
        .env("NO_COLOR", "1")
        .env_remove("AVAFLOW_PIPELINE");
    cmd
}

fn write_pipeline(dir: &Path, yaml: &str) {
    fs::write(dir.join("avaflow.yaml"), yaml).unwrap();
}

const STAGING: &str = r#"
name: staging
vars:
  SHELL_BIN: sh
steps:
  - title: Producing
    command:
      executable: ${SHELL_BIN}
      args: ["-c", "mkdir -p inbox && echo hi > inbox/${INPUT}"]
  - title: Moving Input Image
    operation: { kind: move_all, from: inbox, to: staged }
"#;

#[test]
fn test_validate_accepts_pipeline() {
    let dir = TempDir::new().unwrap();
    write_pipeline(dir.path(), STAGING);

    avaflow(dir.path())
        .args(["validate", "--var", "INPUT=face.jpg"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid!"));
}

#[test]
fn test_validate_missing_file_fails() {
    let dir = TempDir::new().unwrap();

    avaflow(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_plan_shows_resolved_variables() {
    let dir = TempDir::new().unwrap();
    write_pipeline(dir.path(), STAGING);

    avaflow(dir.path())
        .args(["plan", "--var", "INPUT=face.jpg"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[1/2] Producing"))
        .stdout(predicate::str::contains("inbox/face.jpg"));
}

#[test]
fn test_plan_reports_undefined_variable() {
    let dir = TempDir::new().unwrap();
    write_pipeline(dir.path(), STAGING);

    avaflow(dir.path())
        .env_remove("INPUT")
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("INPUT"));
}

#[test]
fn test_run_moves_files() {
    let dir = TempDir::new().unwrap();
    write_pipeline(dir.path(), STAGING);

    avaflow(dir.path())
        .args(["run", "--quiet", "--var", "INPUT=face.jpg"])
        .assert()
        .success();

    assert!(dir.path().join("staged/face.jpg").exists());
    assert!(!dir.path().join("inbox/face.jpg").exists());
}

#[test]
fn test_failed_run_stops_and_records_events() {
    let dir = TempDir::new().unwrap();
    write_pipeline(
        dir.path(),
        r#"
name: failing
steps:
  - title: Aligning
    command: { executable: sh, args: ["-c", "true"] }
  - title: Encoding
    command: { executable: sh, args: ["-c", "echo bad input >&2; exit 3"] }
  - title: Reconstructing
    command: { executable: sh, args: ["-c", "touch reconstructed"] }
"#,
    );

    avaflow(dir.path())
        .args(["run", "--events", "events.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad input"));

    assert!(!dir.path().join("reconstructed").exists());

    let events = fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = events
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    let kinds: Vec<&str> = lines.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        vec![
            "stage_started",
            "stage_succeeded",
            "stage_started",
            "stage_failed",
            "pipeline_completed"
        ]
    );

    let last = lines.last().unwrap();
    assert_eq!(last["final_status"], "failed");
    assert_eq!(last["diagnostic"]["step_index"], 1);
    assert_eq!(last["diagnostic"]["exit_code"], 3);
}
