//! Test-only helpers: scratch repositories and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::core::types::{AgentReport, FileChange, Patch, Role, TestStatus, VerifyReport};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::committer::{Committer, GitCommitter};
use crate::io::config::TddConfig;
use crate::io::git::Git;
use crate::io::kata::Requirements;
use crate::io::verifier::{Verifier, VerifyRequest};
use crate::io::workspace::Workspace;

/// A prepared workspace inside a temporary directory.
pub struct TestRepo {
    _temp: tempfile::TempDir,
    workspace: Workspace,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        Self::with_config(&TddConfig::default())
    }

    pub fn with_config(config: &TddConfig) -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let workspace = Workspace::new(temp.path().join("kata"), config);
        workspace.prepare()?;
        Ok(Self {
            _temp: temp,
            workspace,
        })
    }

    pub fn root(&self) -> &Path {
        self.workspace.root()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn git(&self) -> Git {
        Git::new(self.root())
    }

    pub fn committer(&self) -> GitCommitter {
        GitCommitter::new(self.git())
    }

    /// Commit subjects after the bootstrap commit, oldest first.
    pub fn step_commits(&self) -> Result<Vec<String>> {
        let mut subjects = self.git().log_subjects()?;
        if !subjects.is_empty() {
            subjects.remove(0);
        }
        Ok(subjects)
    }

    /// Contents of a workspace file, if it exists.
    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root().join(rel)).ok()
    }
}

/// Requirements used by scenario tests.
pub fn kata(text: &str) -> Requirements {
    Requirements::new(text)
}

/// One queued agent reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Report(AgentReport),
    Fail(String),
}

/// Reply that writes `files` (path, contents).
pub fn writes(summary: &str, files: &[(&str, &str)]) -> ScriptedReply {
    let files: Vec<(&str, Option<&str>)> = files.iter().map(|(p, c)| (*p, Some(*c))).collect();
    edits(summary, &files)
}

/// Reply with arbitrary changes; `None` contents delete the path.
pub fn edits(summary: &str, files: &[(&str, Option<&str>)]) -> ScriptedReply {
    ScriptedReply::Report(AgentReport {
        summary: summary.to_string(),
        requirements_satisfied: false,
        patch: Patch(
            files
                .iter()
                .map(|(path, contents)| FileChange {
                    path: (*path).to_string(),
                    contents: contents.map(str::to_string),
                })
                .collect(),
        ),
    })
}

/// Reply with no file changes.
pub fn no_change(summary: &str) -> ScriptedReply {
    writes(summary, &[])
}

/// Tester reply declaring the requirements satisfied.
pub fn satisfied() -> ScriptedReply {
    ScriptedReply::Report(AgentReport {
        summary: "every requirement is covered".to_string(),
        requirements_satisfied: true,
        patch: Patch::default(),
    })
}

/// Agent that pops queued replies and records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    replies: RefCell<VecDeque<ScriptedReply>>,
    calls: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<AgentRequest> {
        self.calls.borrow().clone()
    }

    /// `(cycle, role, attempt)` for every call, in order.
    pub fn call_log(&self) -> Vec<(u32, Role, u32)> {
        self.calls
            .borrow()
            .iter()
            .map(|c| (c.cycle, c.role, c.attempt))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl Agent for ScriptedAgent {
    fn run(&self, request: &AgentRequest) -> Result<AgentReport> {
        self.calls.borrow_mut().push(request.clone());
        match self.replies.borrow_mut().pop_front() {
            Some(ScriptedReply::Report(report)) => Ok(report),
            Some(ScriptedReply::Fail(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!(
                "no scripted reply left for {} in cycle {}",
                request.role,
                request.cycle
            )),
        }
    }
}

/// Deterministic oracle that derives test results from workspace contents.
///
/// Every line `require <token>` in a file under the tests dir declares the test
/// `<file>::<token>`. The test passes when some file under the source dir contains
/// `<token>`. The suite passes when every declared test passes.
#[derive(Debug)]
pub struct TokenVerifier {
    root: PathBuf,
    tests_dir: PathBuf,
    src_dir: PathBuf,
    runs: Cell<u32>,
}

impl TokenVerifier {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            root: workspace.root().to_path_buf(),
            tests_dir: workspace.root().join(workspace.tests_dir()),
            src_dir: workspace.root().join(workspace.src_dir()),
            runs: Cell::new(0),
        }
    }

    pub fn runs(&self) -> u32 {
        self.runs.get()
    }

    /// Evaluate the suite without counting a run.
    pub fn check(&self) -> Result<VerifyReport> {
        let mut sources = String::new();
        for path in files_under(&self.src_dir)? {
            let body =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            sources.push_str(&body);
            sources.push('\n');
        }

        let mut tests = BTreeMap::new();
        let mut detail = String::new();
        for path in files_under(&self.tests_dir)? {
            let rel = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .display()
                .to_string();
            let body =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            for token in body.lines().filter_map(|l| l.trim().strip_prefix("require ")) {
                let token = token.trim();
                let name = format!("{rel}::{token}");
                let status = if sources.contains(token) {
                    TestStatus::Passed
                } else {
                    TestStatus::Failed
                };
                detail.push_str(&format!("{name} {status:?}\n"));
                tests.insert(name, status);
            }
        }
        Ok(VerifyReport {
            passed: tests.values().all(|s| *s == TestStatus::Passed),
            timed_out: false,
            tests,
            detail,
        })
    }
}

impl Verifier for TokenVerifier {
    fn verify(&self, _request: &VerifyRequest) -> Result<VerifyReport> {
        self.runs.set(self.runs.get() + 1);
        self.check()
    }
}

fn files_under(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read dir {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            files.extend(files_under(&path)?);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

/// Verifier that pops queued results.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    results: RefCell<VecDeque<std::result::Result<VerifyReport, String>>>,
}

impl ScriptedVerifier {
    pub fn new(results: Vec<std::result::Result<VerifyReport, String>>) -> Self {
        Self {
            results: RefCell::new(results.into()),
        }
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, _request: &VerifyRequest) -> Result<VerifyReport> {
        match self.results.borrow_mut().pop_front() {
            Some(Ok(report)) => Ok(report),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("no scripted verifier result left")),
        }
    }
}

/// Suite-level report without per-test results.
pub fn suite(passed: bool) -> VerifyReport {
    VerifyReport {
        passed,
        timed_out: false,
        tests: BTreeMap::new(),
        detail: if passed { "ok" } else { "FAILED" }.to_string(),
    }
}

/// Git committer that refuses commits whose message starts with a prefix.
#[derive(Debug)]
pub struct FailingCommitter {
    inner: GitCommitter,
    fail_prefix: String,
}

impl FailingCommitter {
    pub fn new(inner: GitCommitter, fail_prefix: &str) -> Self {
        Self {
            inner,
            fail_prefix: fail_prefix.to_string(),
        }
    }
}

impl Committer for FailingCommitter {
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<String> {
        if message.starts_with(&self.fail_prefix) {
            return Err(anyhow!("commit backend unreachable"));
        }
        self.inner.commit(paths, message)
    }

    fn restore_checkpoint(&self) -> Result<()> {
        self.inner.restore_checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_verifier_tracks_requirements() {
        let repo = TestRepo::new().expect("repo");
        let verifier = TokenVerifier::new(repo.workspace());
        assert!(verifier.check().expect("empty").passed);

        fs::write(repo.root().join("tests/test_add.py"), "require add\n").expect("write");
        let red = verifier.check().expect("red");
        assert!(!red.passed);
        assert_eq!(
            red.failing().collect::<Vec<_>>(),
            vec!["tests/test_add.py::add"]
        );

        fs::write(repo.root().join("src/calc.py"), "def add(a, b): ...\n").expect("write");
        assert!(verifier.check().expect("green").passed);
    }

    #[test]
    fn scripted_agent_reports_exhaustion() {
        let agent = ScriptedAgent::new(vec![no_change("only one")]);
        let request = AgentRequest {
            role: Role::Tester,
            cycle: 1,
            attempt: 1,
            requirements: kata("x"),
            failing_tests: Vec::new(),
            feedback: None,
            history: Vec::new(),
            log_dir: PathBuf::from("/tmp/unused"),
        };
        agent.run(&request).expect("first");
        assert!(agent.run(&request).is_err());
        assert_eq!(agent.call_log().len(), 2);
    }
}
