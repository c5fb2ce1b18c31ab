//! CLI integration tests for the store-facing subcommands.
//!
//! Uses `assert_cmd` to spawn the `promptsmith` binary against a fresh
//! temporary store root per test and checks exit codes, stdout and stderr.
//! Commands that need a model are only checked for their failure path.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper: a `promptsmith` command rooted at `home`, isolated from the
/// caller's environment.
fn promptsmith(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("promptsmith");
    cmd.arg("--home")
        .arg(home)
        .env_remove("PROMPTSMITH_HOME")
        .env_remove("PROMPTSMITH_MODEL")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

const QA_SIGNATURE: &str = r#"{
    "name": "qa",
    "description": "Question answering",
    "instructions": "Answer the question in one word.",
    "input_fields": ["question"],
    "output_fields": ["answer"]
}"#;

fn with_qa() -> TempDir {
    let home = tempfile::tempdir().unwrap();
    let file = write(home.path(), "qa.json", QA_SIGNATURE);
    promptsmith(home.path())
        .args(["signature", "add", &file])
        .assert()
        .success();
    home
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    let home = tempfile::tempdir().unwrap();
    promptsmith(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Prompt program optimization and evaluation",
        ));
}

#[test]
fn version_exits_0() {
    let home = tempfile::tempdir().unwrap();
    promptsmith(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("promptsmith"));
}

// ──────────────────────────────────────────────
// 2. Signatures
// ──────────────────────────────────────────────

#[test]
fn fresh_store_lists_builtin_signature() {
    let home = tempfile::tempdir().unwrap();
    promptsmith(home.path())
        .args(["signature", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PLNTask"));
}

#[test]
fn added_signature_shows_in_json() {
    let home = with_qa();
    let out = promptsmith(home.path())
        .args(["--output", "json", "signature", "show", "qa"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value["name"], "qa");
    assert_eq!(value["input_fields"], serde_json::json!(["question"]));
}

#[test]
fn duplicate_signature_fails() {
    let home = with_qa();
    let file = write(home.path(), "again.json", QA_SIGNATURE);
    promptsmith(home.path())
        .args(["signature", "add", &file])
        .assert()
        .failure()
        .stderr(predicate::str::contains("qa"));
}

#[test]
fn overlapping_fields_rejected() {
    let home = tempfile::tempdir().unwrap();
    let file = write(
        home.path(),
        "bad.json",
        r#"{"name": "bad", "input_fields": ["x"], "output_fields": ["x"]}"#,
    );
    promptsmith(home.path())
        .args(["signature", "add", &file])
        .assert()
        .failure();
}

#[test]
fn show_unknown_signature_fails() {
    let home = tempfile::tempdir().unwrap();
    promptsmith(home.path())
        .args(["signature", "show", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn remove_signature() {
    let home = with_qa();
    promptsmith(home.path())
        .args(["signature", "remove", "qa"])
        .assert()
        .success();
    promptsmith(home.path())
        .args(["signature", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("qa  (").not());
}

// ──────────────────────────────────────────────
// 3. Samples
// ──────────────────────────────────────────────

#[test]
fn template_has_every_field() {
    let home = with_qa();
    let out = promptsmith(home.path())
        .args(["sample", "template", "qa"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value, serde_json::json!({"answer": "", "question": ""}));
}

#[test]
fn add_edit_delete_sample() {
    let home = with_qa();
    let first = write(
        home.path(),
        "s1.json",
        r#"{"question": "capital of France?", "answer": "Paris"}"#,
    );
    promptsmith(home.path())
        .args(["sample", "add", "qa", &first])
        .assert()
        .success()
        .stdout(predicate::str::contains("added sample 0"));

    let edited = write(
        home.path(),
        "s2.json",
        r#"{"question": "capital of Italy?", "answer": "Rome"}"#,
    );
    promptsmith(home.path())
        .args(["sample", "edit", "qa", "0", &edited])
        .assert()
        .success();
    promptsmith(home.path())
        .args(["sample", "list", "qa"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rome"));

    promptsmith(home.path())
        .args(["sample", "delete", "qa", "0"])
        .assert()
        .success();
    promptsmith(home.path())
        .args(["sample", "delete", "qa", "0"])
        .assert()
        .failure();
}

#[test]
fn sample_missing_field_rejected() {
    let home = with_qa();
    let file = write(home.path(), "partial.json", r#"{"question": "why?"}"#);
    promptsmith(home.path())
        .args(["sample", "add", "qa", &file])
        .assert()
        .failure()
        .stderr(predicate::str::contains("answer"));
}

#[test]
fn import_then_export() {
    let home = with_qa();
    let file = write(
        home.path(),
        "batch.json",
        r#"[{"question": "1+1?", "answer": "2"}, {"question": "2+2?", "answer": "4"}]"#,
    );
    promptsmith(home.path())
        .args(["sample", "import", "qa", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 total"));

    let out_path = home.path().join("out.json");
    promptsmith(home.path())
        .args(["sample", "export", "qa", "--out"])
        .arg(&out_path)
        .assert()
        .success();
    let exported: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(exported.as_array().unwrap().len(), 2);
    assert_eq!(exported[1]["answer"], "4");
}

// ──────────────────────────────────────────────
// 4. Programs
// ──────────────────────────────────────────────

#[test]
fn new_program_then_list_and_show() {
    let home = with_qa();
    let out = promptsmith(home.path())
        .args(["--output", "json", "program", "new", "qa", "--model", "m1"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let meta: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let id = meta["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("program_"));
    assert_eq!(meta["signature_name"], "qa");

    promptsmith(home.path())
        .args(["program", "list", "--signature", "qa"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()));

    promptsmith(home.path())
        .args(["program", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Answer the question in one word."));
}

#[test]
fn instructions_patch_round_trip() {
    let home = with_qa();
    let out = promptsmith(home.path())
        .args(["--output", "json", "program", "new", "qa"])
        .output()
        .unwrap();
    let meta: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let id = meta["id"].as_str().unwrap().to_string();

    promptsmith(home.path())
        .args(["program", "instructions", &id, "--set", "Be terse."])
        .assert()
        .success();
    promptsmith(home.path())
        .args(["program", "instructions", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Be terse."));
}

#[test]
fn base_of_other_signature_rejected() {
    let home = with_qa();
    let out = promptsmith(home.path())
        .args(["--output", "json", "program", "new", "PLNTask"])
        .output()
        .unwrap();
    let meta: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let pln_id = meta["id"].as_str().unwrap().to_string();

    promptsmith(home.path())
        .args(["program", "new", "qa", "--base", &pln_id])
        .assert()
        .failure();
}

#[test]
fn delete_program() {
    let home = with_qa();
    let out = promptsmith(home.path())
        .args(["--output", "json", "program", "new", "qa"])
        .output()
        .unwrap();
    let meta: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let id = meta["id"].as_str().unwrap().to_string();

    promptsmith(home.path())
        .args(["program", "delete", &id])
        .assert()
        .success();
    promptsmith(home.path())
        .args(["program", "show", &id])
        .assert()
        .failure();
}

// ──────────────────────────────────────────────
// 5. Model-backed commands without credentials
// ──────────────────────────────────────────────

#[test]
fn optimize_without_api_key_fails() {
    let home = with_qa();
    promptsmith(home.path())
        .args(["optimize", "qa"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ANTHROPIC_API_KEY"));
}

#[test]
fn json_errors_are_json() {
    let home = tempfile::tempdir().unwrap();
    let out = promptsmith(home.path())
        .args(["--output", "json", "signature", "show", "missing"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8(out.stderr).unwrap();
    let last = stderr.lines().last().unwrap();
    let value: serde_json::Value = serde_json::from_str(last).unwrap();
    assert!(value["error"].as_str().unwrap().contains("missing"));
}
