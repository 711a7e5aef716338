//! Git adapter for workspace checkpoints.
//!
//! Every verified step is recorded as a commit and every discarded step is
//! rolled back to `HEAD`, so we keep a small, explicit wrapper around `git`
//! subprocess calls.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// True if `workdir` is the top level of a git repository.
    pub fn is_repo_root(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--show-toplevel"])?;
        if !out.status.success() {
            return Ok(false);
        }
        let top = PathBuf::from(String::from_utf8_lossy(&out.stdout).trim());
        let top = top.canonicalize().unwrap_or(top);
        let here = self
            .workdir
            .canonicalize()
            .with_context(|| format!("canonicalize {}", self.workdir.display()))?;
        Ok(top == here)
    }

    #[instrument(skip_all)]
    pub fn init(&self) -> Result<()> {
        debug!(workdir = %self.workdir.display(), "initializing repository");
        self.run_checked(&["init"])?;
        Ok(())
    }

    /// True once the repository has at least one commit.
    pub fn has_head(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        Ok(out.status.success())
    }

    /// Read a config value visible to this repository, if set.
    pub fn config_get(&self, key: &str) -> Result<Option<String>> {
        let out = self.run(&["config", "--get", key])?;
        if !out.status.success() {
            return Ok(None);
        }
        let value = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    pub fn config_set_local(&self, key: &str, value: &str) -> Result<()> {
        self.run_checked(&["config", "--local", key, value])?;
        Ok(())
    }

    /// Return the full SHA of `HEAD`.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Commit subjects on the current branch, oldest first.
    pub fn log_subjects(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["log", "--reverse", "--format=%s"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Ensure the worktree is clean, allowing entries with any of the given prefixes.
    #[instrument(skip_all)]
    pub fn ensure_clean_except_prefixes(&self, allowed_prefixes: &[&str]) -> Result<()> {
        let disallowed: Vec<StatusEntry> = self
            .status_porcelain()?
            .into_iter()
            .filter(|entry| {
                !allowed_prefixes
                    .iter()
                    .any(|prefix| entry.path.starts_with(prefix))
            })
            .collect();
        if disallowed.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(disallowed_count = disallowed.len(), "worktree not clean");
        let mut msg = String::from("working tree not clean (uncommitted changes):\n");
        for entry in disallowed {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Stage additions, modifications and deletions of exactly these paths.
    pub fn add_paths(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args: Vec<String> = vec!["add".into(), "-A".into(), "--".into()];
        args.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&args)?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit whatever is staged and return the new `HEAD` SHA.
    ///
    /// Commits even when nothing is staged so that every verified step owns a checkpoint.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<String> {
        if !self.has_staged_changes()? {
            debug!("nothing staged, recording empty checkpoint");
        }
        self.run_checked(&["commit", "--allow-empty", "--no-verify", "-m", message])?;
        self.head_sha()
    }

    /// Discard every tracked and untracked change, returning the worktree to `HEAD`.
    ///
    /// Ignored files (such as `.tdd/`) survive.
    #[instrument(skip_all)]
    pub fn restore_head(&self) -> Result<()> {
        debug!("restoring worktree to HEAD");
        self.run_checked(&["reset", "--hard", "--quiet", "HEAD"])?;
        self.run_checked(&["clean", "-f", "-d", "--quiet"])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn repo() -> (tempfile::TempDir, Git) {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        git.init().expect("init");
        git.config_set_local("user.email", "test@example.com")
            .expect("email");
        git.config_set_local("user.name", "test").expect("name");
        (temp, git)
    }

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn commit_returns_head_and_allows_empty() {
        let (temp, git) = repo();
        assert!(!git.has_head().expect("head"));
        fs::write(temp.path().join("a.txt"), "a").expect("write");
        git.add_all().expect("add");
        let first = git.commit("first").expect("commit");
        assert_eq!(first, git.head_sha().expect("sha"));

        let second = git.commit("empty").expect("empty commit");
        assert_ne!(first, second);
        assert_eq!(git.log_subjects().expect("log"), vec!["first", "empty"]);
    }

    #[test]
    fn restore_head_drops_tracked_and_untracked_changes() {
        let (temp, git) = repo();
        let root = temp.path();
        fs::write(root.join("a.txt"), "a").expect("write");
        git.add_all().expect("add");
        git.commit("base").expect("commit");

        fs::write(root.join("a.txt"), "changed").expect("modify");
        fs::create_dir_all(root.join("new")).expect("dir");
        fs::write(root.join("new/b.txt"), "b").expect("untracked");
        git.restore_head().expect("restore");

        assert_eq!(fs::read_to_string(root.join("a.txt")).expect("read"), "a");
        assert!(!root.join("new").exists());
        git.ensure_clean_except_prefixes(&[]).expect("clean");
    }

    #[test]
    fn add_paths_stages_only_listed_files() {
        let (temp, git) = repo();
        let root = temp.path();
        fs::write(root.join("keep.txt"), "k").expect("write");
        fs::write(root.join("other.txt"), "o").expect("write");
        git.add_paths(&[PathBuf::from("keep.txt")]).expect("add");
        git.commit("keep").expect("commit");

        let status = git.status_porcelain().expect("status");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].path, "other.txt");
    }

    #[test]
    fn detects_repo_root() {
        let (temp, git) = repo();
        assert!(git.is_repo_root().expect("root"));
        fs::create_dir_all(temp.path().join("sub")).expect("sub");
        assert!(!Git::new(temp.path().join("sub")).is_repo_root().expect("sub"));
    }
}
