//! End-to-end runs of the `dfile` binary against a shell-script agent.
#![cfg(unix)]

mod common;

use common::{case, test_settings};
use dispute_filer::case::{BureauId, ItemKind};
use dispute_filer::config::write_settings;
use dispute_filer::store::now_epoch_ms;
use serde_json::Value;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const AGENT_SCRIPT: &str = r#"#!/bin/sh
req=$(cat)
case "$req" in
  *'"action":"close"'*|*'"action":"screenshot"'*)
    echo '{"success":true,"raw_output":""}' ;;
  *'Report Number:'*)
    echo 'Report Number: 987654321' ;;
  *'Complaint ID:'*)
    echo '{"success":true,"raw_output":"Complaint ID: 240301-7654321","steps_taken":3}' ;;
  *ACTIVE_DISPUTE*)
    echo 'ACTIVE_DISPUTE: NO' ;;
  *LOGGED_IN*)
    echo 'LOGGED_IN' ;;
  *'Confirmation #'*)
    echo 'Confirmation #: CONF-4242' ;;
  *)
    echo 'Done.' ;;
esac
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let script = dir.path().join("agent.sh");
        fs::write(&script, AGENT_SCRIPT).expect("write agent script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod agent");

        let mut settings = test_settings(&dir.path().join("data"));
        settings.agent_command = script.display().to_string();
        write_settings(&dir.path().join("data/config.json"), &settings).expect("write config");
        Self { dir }
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn write_case(&self, case_id: &str, kind: ItemKind, bureaus: &[BureauId]) -> PathBuf {
        let path = self.dir.path().join(format!("{case_id}.json"));
        let text = serde_json::to_string_pretty(&case(case_id, kind, bureaus)).unwrap();
        fs::write(&path, text).unwrap();
        path
    }

    fn dfile(&self, args: &[&str]) -> Output {
        dfile_in(&self.data_dir(), args)
    }
}

fn dfile_in(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dfile"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env_remove("DFILE_AGENT_COMMAND")
        .env_remove("DFILE_DATA_DIR")
        .env_remove("RUST_LOG")
        .output()
        .expect("run dfile")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not JSON ({err}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn full_run_files_every_stage() {
    let ws = Workspace::new();
    let bureaus = [BureauId::Equifax, BureauId::TransUnion];
    let case_path = ws.write_case("cli-full", ItemKind::Account, &bureaus);

    let output = ws.dfile(&["run", "--case", case_path.to_str().unwrap(), "--json"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary = stdout_json(&output);
    assert_eq!(summary["is_complete"], true);
    assert_eq!(summary["attempted"], 5);
    assert_eq!(summary["current_step"], "complete");
    assert_eq!(summary["report"]["confirmation_code"], "987654321");
    assert_eq!(summary["complaints"]["equifax"]["confirmation_code"], "240301-7654321");
    assert_eq!(summary["bureaus"]["transunion"]["confirmation_code"], "CONF-4242");
    assert!(summary["bureaus"]["transunion"]["message"]
        .as_str()
        .unwrap()
        .contains("1-800-916-8800"));

    let status = ws.dfile(&["status", "--case-id", "cli-full", "--json"]);
    assert!(status.status.success());
    let record = stdout_json(&status);
    assert_eq!(
        record["timeline"]["checkpoints"]["report.reference"]["value"],
        "987654321"
    );
    assert_eq!(record["runs"].as_array().unwrap().len(), 5);
}

#[test]
fn outstanding_dispute_makes_run_incomplete_until_resolved() {
    let ws = Workspace::new();
    let case_path = ws.write_case("cli-exp", ItemKind::Account, &[BureauId::Experian]);
    let case_arg = case_path.to_str().unwrap();

    let first = ws.dfile(&["bureau", "--case", case_arg, "--bureau", "experian"]);
    assert!(first.status.success());

    let second = ws.dfile(&["bureau", "--case", case_arg, "--bureau", "experian"]);
    assert_eq!(second.status.code(), Some(2));
    let text = String::from_utf8_lossy(&second.stdout);
    assert!(text.contains("DISPUTE_LIMIT_REACHED"), "stdout: {text}");

    let resolve = ws.dfile(&["resolve", "--case-id", "cli-exp", "--bureau", "experian"]);
    assert!(resolve.status.success());
    let third = ws.dfile(&["bureau", "--case", case_arg, "--bureau", "experian"]);
    assert!(third.status.success());
}

#[test]
fn invalid_case_file_is_rejected() {
    let ws = Workspace::new();
    let path = ws.dir.path().join("broken.json");
    fs::write(&path, "{\"case_id\": \"x\"}").unwrap();

    let output = ws.dfile(&["report", "--case", path.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("parse case JSON"));
}

#[test]
fn init_config_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    let first = dfile_in(dir.path(), &["init-config"]);
    assert!(first.status.success());
    assert!(dir.path().join("config.json").is_file());

    let second = dfile_in(dir.path(), &["init-config"]);
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("--force"));

    let forced = dfile_in(dir.path(), &["init-config", "--force"]);
    assert!(forced.status.success());
}

#[test]
fn lease_left_by_a_crashed_run_is_cleared_with_unlock() {
    let ws = Workspace::new();
    let case_path = ws.write_case("cli-lock", ItemKind::Inquiry, &[BureauId::Equifax]);
    let case_arg = case_path.to_str().unwrap();
    let case_dir = ws.data_dir().join("cases/cli-lock");
    fs::create_dir_all(&case_dir).unwrap();
    let lease = serde_json::json!({
        "case_id": "cli-lock",
        "holder": "pid4242-crashed",
        "acquired_at_epoch_ms": now_epoch_ms(),
    });
    fs::write(case_dir.join("lease.json"), lease.to_string()).unwrap();

    let blocked = ws.dfile(&["report", "--case", case_arg]);
    assert!(!blocked.status.success());
    assert!(String::from_utf8_lossy(&blocked.stderr).contains("RUN_IN_PROGRESS"));

    let unlock = ws.dfile(&["unlock", "--case-id", "cli-lock"]);
    assert!(unlock.status.success());
    assert!(String::from_utf8_lossy(&unlock.stdout).contains("pid4242-crashed"));

    let report = ws.dfile(&["report", "--case", case_arg]);
    assert!(
        report.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&report.stderr)
    );
    let again = ws.dfile(&["unlock", "--case-id", "cli-lock"]);
    assert!(String::from_utf8_lossy(&again.stdout).contains("has no lease"));
}

#[test]
fn path_like_case_ids_are_refused() {
    let ws = Workspace::new();
    let output = ws.dfile(&["resolve", "--case-id", "../../cli-escape", "--bureau", "experian"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("case_id"));
    assert!(!ws.dir.path().join("cli-escape").exists());
    assert!(!ws.data_dir().join("cli-escape").exists());
}
