//! CLI tests for `agentic-tdd`.
//!
//! Spawns the binary and checks setup validation and exit codes. No test
//! here reaches a real agent.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tdd_runner::exit_codes;

fn write_kata(dir: &Path) -> std::path::PathBuf {
    let kata = dir.join("kata.md");
    fs::write(&kata, "# String Calculator\n\nAdd numbers from a string.\n").expect("write kata");
    kata
}

fn agentic_tdd(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_agentic-tdd"))
        .current_dir(cwd)
        .args(args)
        .env_remove("MAX_TDD_CYCLES")
        .env_remove("VERBOSE_OUTPUT")
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn agentic-tdd")
}

#[test]
fn dry_run_validates_without_creating_the_work_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let kata = write_kata(temp.path());
    let work = temp.path().join("work");

    let output = agentic_tdd(
        &[
            kata.to_str().expect("utf8"),
            "--work-dir",
            work.to_str().expect("utf8"),
            "--dry-run",
            "--verbose",
        ],
        temp.path(),
    );

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("String Calculator"), "stdout: {stdout}");
    assert!(stdout.contains("dry run"), "stdout: {stdout}");
    assert!(!work.exists());
}

#[test]
fn missing_kata_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = agentic_tdd(&["missing.md", "--dry-run"], temp.path());

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing.md"), "stderr: {stderr}");
}

#[test]
fn provider_without_credentials_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let kata = write_kata(temp.path());

    let output = Command::new(env!("CARGO_BIN_EXE_agentic-tdd"))
        .current_dir(temp.path())
        .arg(&kata)
        .args(["--provider", "acme", "--dry-run"])
        .env_remove("ACME_API_KEY")
        .output()
        .expect("spawn agentic-tdd");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ACME_API_KEY"), "stderr: {stderr}");
}

#[test]
fn zero_max_cycles_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let kata = write_kata(temp.path());

    let output = agentic_tdd(
        &[
            kata.to_str().expect("utf8"),
            "--max-cycles",
            "0",
            "--dry-run",
        ],
        temp.path(),
    );

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}
