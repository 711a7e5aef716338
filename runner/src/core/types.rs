//! Shared deterministic types for the cycle orchestrator.
//!
//! These types define the contracts between the supervisor and its external
//! collaborators (agents, verifier, committer). They carry no I/O and serialize
//! to stable JSON for cycle logs and `run.json`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TddError;

/// Role-specialized generation step within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tester,
    Implementer,
    Refactorer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Tester => "tester",
            Role::Implementer => "implementer",
            Role::Refactorer => "refactorer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single file mutation proposed by an agent.
///
/// `contents: None` deletes the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub contents: Option<String>,
}

/// Ordered set of file mutations produced by one agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(pub Vec<FileChange>);

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileChange> {
        self.0.iter()
    }
}

/// Structured reply from an agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReport {
    /// One-paragraph description of what the agent did or intends.
    pub summary: String,
    /// Set by the Tester when no further failing test is required.
    #[serde(default)]
    pub requirements_satisfied: bool,
    #[serde(default, rename = "files")]
    pub patch: Patch,
}

/// Per-test status as reported by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

/// Result of one verifier run over the whole suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// True when the suite command succeeded and no test reported a failure.
    pub passed: bool,
    pub timed_out: bool,
    /// Per-test results keyed by test identity. Empty when the output had none.
    pub tests: BTreeMap<String, TestStatus>,
    /// Bounded tail of the suite output, fed back to agents on retry.
    pub detail: String,
}

impl VerifyReport {
    pub fn failing(&self) -> impl Iterator<Item = &str> {
        self.tests_with(TestStatus::Failed)
    }

    pub fn passing(&self) -> impl Iterator<Item = &str> {
        self.tests_with(TestStatus::Passed)
    }

    pub fn status_of(&self, test: &str) -> Option<TestStatus> {
        self.tests.get(test).copied()
    }

    fn tests_with(&self, status: TestStatus) -> impl Iterator<Item = &str> {
        self.tests
            .iter()
            .filter(move |(_, s)| **s == status)
            .map(|(name, _)| name.as_str())
    }
}

/// Kind of checkpoint recorded after a verified step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitKind {
    Test,
    Implementation,
    Refactor,
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommitKind::Test => "test",
            CommitKind::Implementation => "implementation",
            CommitKind::Refactor => "refactor",
        })
    }
}

/// A durable checkpoint recorded by the committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub cycle: u32,
    pub kind: CommitKind,
    pub id: String,
}

/// A cycle that exhausted its retry budget and was reported as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleFailure {
    pub cycle: u32,
    pub role: Role,
    pub attempts: u32,
    pub reason: String,
}

/// Why the run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The Tester reported that no further failing test is required.
    RequirementsSatisfied,
    /// The configured cycle budget was exhausted first.
    MaxCyclesReached,
    /// A cycle failed and fail-fast is enabled.
    CycleFailed { cycle: u32 },
    /// A fatal error ended the run.
    Aborted {
        #[serde(serialize_with = "serialize_display")]
        error: TddError,
    },
    /// Setup validation only; no cycle was started.
    DryRun,
}

/// Aggregate outcome of a run, returned to the CLI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Cycles that reached their implementation checkpoint.
    pub cycles_completed: u32,
    /// Cycles that were started (bounded by `max_cycles`).
    pub cycles_started: u32,
    pub stop: StopReason,
    pub commits: Vec<CommitRecord>,
    pub failed_cycles: Vec<CycleFailure>,
    pub agent_invocations: u32,
    pub verifier_runs: u32,
}

impl RunResult {
    pub fn new(stop: StopReason) -> Self {
        Self {
            cycles_completed: 0,
            cycles_started: 0,
            stop,
            commits: Vec::new(),
            failed_cycles: Vec::new(),
            agent_invocations: 0,
            verifier_runs: 0,
        }
    }

    pub fn commits_of(&self, kind: CommitKind) -> impl Iterator<Item = &CommitRecord> {
        self.commits.iter().filter(move |c| c.kind == kind)
    }
}

fn serialize_display<S: serde::Serializer>(
    value: &TddError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_report_parses_files_as_patch() {
        let raw = r#"{
            "summary": "add test for add",
            "requirements_satisfied": false,
            "files": [
                {"path": "tests/test_add.py", "contents": "def test_add(): ..."},
                {"path": "old.py", "contents": null}
            ]
        }"#;
        let report: AgentReport = serde_json::from_str(raw).expect("parse");
        assert_eq!(report.patch.len(), 2);
        assert_eq!(report.patch.0[1].contents, None);
        assert!(!report.requirements_satisfied);
    }

    #[test]
    fn agent_report_defaults_missing_fields() {
        let report: AgentReport =
            serde_json::from_str(r#"{"summary": "done", "requirements_satisfied": true}"#)
                .expect("parse");
        assert!(report.patch.is_empty());
        assert!(report.requirements_satisfied);
    }

    #[test]
    fn stop_reason_serializes_with_tag() {
        let json = serde_json::to_string(&StopReason::CycleFailed { cycle: 2 }).expect("json");
        assert_eq!(json, r#"{"reason":"cycle_failed","cycle":2}"#);

        let aborted = StopReason::Aborted {
            error: TddError::Configuration("bad".to_string()),
        };
        let json = serde_json::to_string(&aborted).expect("json");
        assert!(json.contains("configuration error: bad"));
    }

    #[test]
    fn verify_report_filters_by_status() {
        let mut tests = BTreeMap::new();
        tests.insert("a".to_string(), TestStatus::Passed);
        tests.insert("b".to_string(), TestStatus::Failed);
        tests.insert("c".to_string(), TestStatus::Skipped);
        let report = VerifyReport {
            passed: false,
            timed_out: false,
            tests,
            detail: String::new(),
        };
        assert_eq!(report.failing().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(report.passing().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(report.status_of("c"), Some(TestStatus::Skipped));
    }
}
