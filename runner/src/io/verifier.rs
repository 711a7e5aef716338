//! Test suite execution.
//!
//! The [`Verifier`] runs the whole suite against the current workspace and
//! reports per-test results parsed from the runner's output.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::test_output::parse_test_results;
use crate::core::types::{TestStatus, VerifyReport};
use crate::io::config::TddConfig;
use crate::io::process::{run_captured, tail};

/// Bytes of suite output kept in [`VerifyReport::detail`].
pub const DETAIL_LIMIT_BYTES: usize = 4_000;

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    /// Directory for `verify.log`.
    pub log_dir: PathBuf,
}

/// Abstraction over test suite runners.
pub trait Verifier {
    /// Run the suite. Errors mean the suite could not be executed at all.
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyReport>;
}

/// Verifier that runs a configured command from the workspace root.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit: usize,
}

impl CommandVerifier {
    pub fn new(config: &TddConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.verifier.command.clone(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(config.step_timeout_secs),
            output_limit: config.output_limit_bytes,
        }
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip_all, fields(log_dir = %request.log_dir.display()))]
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyReport> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("verifier command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);

        let output = run_captured(cmd, None, self.timeout, self.output_limit)
            .with_context(|| format!("run verifier `{}`", self.command.join(" ")))?;

        fs::create_dir_all(&request.log_dir)
            .with_context(|| format!("create verifier log dir {}", request.log_dir.display()))?;
        let log_path = request.log_dir.join("verify.log");
        fs::write(&log_path, output.render_log("verifier", self.output_limit))
            .with_context(|| format!("write {}", log_path.display()))?;

        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let tests = parse_test_results(&combined);
        let any_failed = tests.values().any(|s| *s == TestStatus::Failed);
        let report = VerifyReport {
            passed: output.succeeded() && !any_failed,
            timed_out: output.timed_out,
            tests,
            detail: tail(combined.trim(), DETAIL_LIMIT_BYTES).to_string(),
        };
        info!(
            passed = report.passed,
            timed_out = report.timed_out,
            tests = report.tests.len(),
            failing = report.failing().count(),
            "suite finished"
        );
        debug!(exit_code = ?output.status.code(), "verifier exit");
        Ok(report)
    }
}
