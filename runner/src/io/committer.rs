//! Checkpoint recording and rollback.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::io::git::Git;

/// Abstraction over durable workspace checkpoints.
pub trait Committer {
    /// Record the current state of `paths` and return the checkpoint id.
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<String>;

    /// Return the workspace to the last recorded checkpoint.
    fn restore_checkpoint(&self) -> Result<()>;
}

/// Committer backed by the workspace's git repository.
#[derive(Debug, Clone)]
pub struct GitCommitter {
    git: Git,
}

impl GitCommitter {
    pub fn new(git: Git) -> Self {
        Self { git }
    }
}

impl Committer for GitCommitter {
    #[instrument(skip_all, fields(files = paths.len()))]
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<String> {
        self.git.add_paths(paths).context("stage step files")?;
        let sha = self.git.commit(message).context("record checkpoint")?;
        info!(sha = %sha, message, "checkpoint recorded");
        Ok(sha)
    }

    fn restore_checkpoint(&self) -> Result<()> {
        self.git
            .restore_head()
            .context("restore last checkpoint")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::io::config::TddConfig;
    use crate::io::workspace::Workspace;

    #[test]
    fn commits_listed_paths_and_rolls_back_the_rest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        Workspace::new(root, &TddConfig::default())
            .prepare()
            .expect("prepare");
        let committer = GitCommitter::new(Git::new(root));

        fs::write(root.join("tests/test_a.py"), "def test_a(): assert False").expect("write");
        let sha = committer
            .commit(&[PathBuf::from("tests/test_a.py")], "test: add failing test for cycle 1")
            .expect("commit");
        assert_eq!(sha, Git::new(root).head_sha().expect("head"));

        fs::write(root.join("tests/test_a.py"), "changed").expect("modify");
        fs::write(root.join("src/impl.py"), "x = 1").expect("untracked");
        committer.restore_checkpoint().expect("restore");

        assert_eq!(
            fs::read_to_string(root.join("tests/test_a.py")).expect("read"),
            "def test_a(): assert False"
        );
        assert!(!root.join("src/impl.py").exists());
        assert!(root.join(".tdd/.gitignore").exists());
    }
}
