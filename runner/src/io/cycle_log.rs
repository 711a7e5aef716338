//! Per-attempt logs under `.tdd/cycles/` and the run summary in `.tdd/run.json`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::{Role, RunResult, VerifyReport};

/// How a single step attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Advanced,
    Rejected,
    /// Tester reported the requirements as satisfied.
    Satisfied,
    /// Refactorer proposed no change.
    Skipped,
    AgentFailed,
}

/// Suite outcome as stored in `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifySummary {
    pub passed: bool,
    pub timed_out: bool,
    pub failing: Vec<String>,
}

impl From<&VerifyReport> for VerifySummary {
    fn from(report: &VerifyReport) -> Self {
        Self {
            passed: report.passed,
            timed_out: report.timed_out,
            failing: report.failing().map(str::to_string).collect(),
        }
    }
}

/// Metadata for one step attempt, persisted to `meta.json`.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta {
    pub cycle: u32,
    pub role: Role,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub reason: Option<String>,
    pub summary: Option<String>,
    pub files: Vec<String>,
    pub verify: Option<VerifySummary>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_secs: Option<f64>,
    #[serde(skip)]
    started_at: DateTime<Utc>,
}

impl AttemptMeta {
    /// Begin timing an attempt. The outcome defaults to rejected until set.
    pub fn start(cycle: u32, role: Role, attempt: u32) -> Self {
        let started_at = Utc::now();
        Self {
            cycle,
            role,
            attempt,
            outcome: AttemptOutcome::Rejected,
            reason: None,
            summary: None,
            files: Vec::new(),
            verify: None,
            start_time: started_at.to_rfc3339(),
            end_time: None,
            duration_secs: None,
            started_at,
        }
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.end_time = Some(now.to_rfc3339());
        self.duration_secs = Some(elapsed_secs(self.started_at, now));
    }
}

/// Write `meta.json` into an attempt directory.
pub fn write_attempt_meta(dir: &Path, meta: &AttemptMeta) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create attempt dir {}", dir.display()))?;
    write_json(&dir.join("meta.json"), meta)
}

/// Run summary persisted to `.tdd/run.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<'a> {
    pub kata: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    #[serde(flatten)]
    pub result: &'a RunResult,
}

pub fn write_run_summary(path: &Path, summary: &RunSummary<'_>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    write_json(path, summary)
}

pub fn elapsed_secs(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> f64 {
    (ended_at - started_at).num_milliseconds().max(0) as f64 / 1000.0
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StopReason;

    #[test]
    fn writes_attempt_meta() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("cycles/1/tester-2");
        let mut meta = AttemptMeta::start(1, Role::Tester, 2);
        meta.outcome = AttemptOutcome::Advanced;
        meta.files = vec!["tests/test_a.py".to_string()];
        meta.finish();

        write_attempt_meta(&dir, &meta).expect("write");

        let raw = fs::read_to_string(dir.join("meta.json")).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["role"], "tester");
        assert_eq!(value["outcome"], "advanced");
        assert_eq!(value["files"][0], "tests/test_a.py");
        assert!(value["end_time"].is_string());
        assert!(value.get("started_at").is_none());
    }

    #[test]
    fn run_summary_flattens_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".tdd/run.json");
        let result = RunResult::new(StopReason::MaxCyclesReached);
        let now = Utc::now();
        let summary = RunSummary {
            kata: "kata.md".to_string(),
            start_time: now.to_rfc3339(),
            end_time: now.to_rfc3339(),
            duration_secs: 0.0,
            result: &result,
        };

        write_run_summary(&path, &summary).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["stop"]["reason"], "max_cycles_reached");
        assert_eq!(value["cycles_completed"], 0);
        assert_eq!(value["kata"], "kata.md");
    }

    #[test]
    fn elapsed_is_never_negative() {
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(2);
        assert_eq!(elapsed_secs(later, earlier), 0.0);
        assert_eq!(elapsed_secs(earlier, later), 2.0);
    }
}
