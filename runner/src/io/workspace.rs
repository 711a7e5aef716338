//! Kata workspace: the version-controlled file tree agents work on.
//!
//! Layout:
//! - `<tests_dir>/` and `<src_dir>/`: the kata's tests and implementation.
//! - `.tdd/`: runner-owned, git-ignored (config, cycle logs, `run.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::types::{Patch, Role};
use crate::io::config::TddConfig;
use crate::io::git::Git;

const BOOTSTRAP_MESSAGE: &str = "chore: initialize kata workspace";
const DEFAULT_USER_NAME: &str = "agentic-tdd";
const DEFAULT_USER_EMAIL: &str = "agentic-tdd@localhost";

/// Canonical paths within a workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub tdd_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub cycles_dir: PathBuf,
    pub run_result_path: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let tdd_dir = root.join(".tdd");
        Self {
            root: root.clone(),
            gitignore_path: tdd_dir.join(".gitignore"),
            config_path: tdd_dir.join("config.toml"),
            state_dir: tdd_dir.join("state"),
            cycles_dir: tdd_dir.join("cycles"),
            run_result_path: tdd_dir.join("run.json"),
            tdd_dir,
        }
    }
}

/// Workspace owned by the supervisor for the duration of a run.
#[derive(Debug, Clone)]
pub struct Workspace {
    paths: WorkspacePaths,
    tests_dir: String,
    src_dir: String,
}

/// What [`Workspace::prepare`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareOutcome {
    pub created_repo: bool,
    pub bootstrap_commit: Option<String>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, config: &TddConfig) -> Self {
        Self {
            paths: WorkspacePaths::new(root),
            tests_dir: config.tests_dir.clone(),
            src_dir: config.src_dir.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn tests_dir(&self) -> &str {
        &self.tests_dir
    }

    pub fn src_dir(&self) -> &str {
        &self.src_dir
    }

    /// Log directory for one step attempt.
    pub fn step_dir(&self, cycle: u32, role: Role, attempt: u32) -> PathBuf {
        self.paths
            .cycles_dir
            .join(cycle.to_string())
            .join(format!("{role}-{attempt}"))
    }

    /// Create and initialize the workspace so that `HEAD` is a clean checkpoint.
    ///
    /// An existing repository must not carry uncommitted changes outside `.tdd/`.
    #[instrument(skip_all, fields(root = %self.paths.root.display()))]
    pub fn prepare(&self) -> Result<PrepareOutcome> {
        let root = &self.paths.root;
        fs::create_dir_all(root).with_context(|| format!("create work dir {}", root.display()))?;
        let git = Git::new(root);

        let created_repo = !git.is_repo_root()?;
        if created_repo {
            info!("initializing git repository");
            git.init()?;
        } else if git.has_head()? {
            git.ensure_clean_except_prefixes(&[".tdd/"])?;
        }
        ensure_identity(&git)?;

        ensure_file(&self.paths.gitignore_path, "*\n")?;
        for dir in [&self.tests_dir, &self.src_dir] {
            let dir = root.join(dir);
            if !dir.exists() {
                ensure_file(&dir.join(".gitkeep"), "")?;
            }
        }

        git.add_all()?;
        let bootstrap_commit = if git.has_staged_changes()? || !git.has_head()? {
            let sha = git.commit(BOOTSTRAP_MESSAGE)?;
            debug!(sha = %sha, "bootstrap commit recorded");
            Some(sha)
        } else {
            None
        };
        Ok(PrepareOutcome {
            created_repo,
            bootstrap_commit,
        })
    }

    /// Return every reason `patch` would collide with what is on disk.
    ///
    /// Each path must land on a regular file or on nothing, and every existing
    /// parent must be a real directory. Symlinks are never followed. Expects
    /// paths that already passed `validate_patch`.
    pub fn conflicts(&self, patch: &Patch) -> Vec<String> {
        let mut errors = Vec::new();
        for change in patch.iter() {
            let rel = Path::new(&change.path);
            let depth = rel.components().count();
            let mut abs = self.paths.root.clone();
            for (index, component) in rel.components().enumerate() {
                abs.push(component);
                let Ok(meta) = fs::symlink_metadata(&abs) else {
                    break;
                };
                let shown = abs.strip_prefix(&self.paths.root).unwrap_or(&abs).display();
                if meta.file_type().is_symlink() {
                    errors.push(format!("{}: {shown} is a symlink", change.path));
                    break;
                }
                if index + 1 < depth && !meta.is_dir() {
                    errors.push(format!("{}: {shown} is not a directory", change.path));
                    break;
                }
                if index + 1 == depth && !meta.is_file() {
                    errors.push(format!("{}: not a regular file", change.path));
                }
            }
        }
        errors
    }

    /// Write a validated patch and return the relative paths it touched.
    ///
    /// Deleting a file that does not exist is a no-op and is not reported.
    pub fn apply(&self, patch: &Patch) -> Result<Vec<PathBuf>> {
        let mut touched = Vec::with_capacity(patch.len());
        for change in patch.iter() {
            let rel = PathBuf::from(&change.path);
            let abs = self.paths.root.join(&rel);
            match &change.contents {
                Some(contents) => {
                    if let Some(parent) = abs.parent() {
                        fs::create_dir_all(parent)
                            .with_context(|| format!("create {}", parent.display()))?;
                    }
                    fs::write(&abs, contents)
                        .with_context(|| format!("write {}", abs.display()))?;
                }
                None if abs.is_file() => {
                    fs::remove_file(&abs).with_context(|| format!("remove {}", abs.display()))?;
                }
                None if abs.exists() => {
                    return Err(anyhow!("refuse to delete non-file {}", abs.display()));
                }
                None => continue,
            }
            touched.push(rel);
        }
        debug!(files = touched.len(), "patch applied");
        Ok(touched)
    }
}

/// Check, without touching anything, that `root` can serve as a work dir.
pub fn check_work_dir(root: &Path) -> Result<()> {
    if root.exists() {
        if !root.is_dir() {
            return Err(anyhow!("work dir {} is not a directory", root.display()));
        }
        return Ok(());
    }
    let parent = root
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        return Err(anyhow!(
            "work dir {} cannot be created: parent {} does not exist",
            root.display(),
            parent.display()
        ));
    }
    Ok(())
}

fn ensure_identity(git: &Git) -> Result<()> {
    if git.config_get("user.name")?.is_none() {
        git.config_set_local("user.name", DEFAULT_USER_NAME)?;
    }
    if git.config_get("user.email")?.is_none() {
        git.config_set_local("user.email", DEFAULT_USER_EMAIL)?;
    }
    Ok(())
}

fn ensure_file(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FileChange;

    fn change(path: &str, contents: Option<&str>) -> FileChange {
        FileChange {
            path: path.to_string(),
            contents: contents.map(str::to_string),
        }
    }

    #[test]
    fn prepare_creates_repo_layout_and_bootstrap_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("kata");
        let ws = Workspace::new(&root, &TddConfig::default());

        let outcome = ws.prepare().expect("prepare");
        assert!(outcome.created_repo);
        assert!(outcome.bootstrap_commit.is_some());
        assert!(root.join("tests/.gitkeep").is_file());
        assert!(root.join("src/.gitkeep").is_file());
        assert!(root.join(".tdd/.gitignore").is_file());
        Git::new(&root)
            .ensure_clean_except_prefixes(&[])
            .expect("clean after prepare");

        let again = ws.prepare().expect("prepare again");
        assert!(!again.created_repo);
        assert_eq!(again.bootstrap_commit, None);
    }

    #[test]
    fn prepare_refuses_dirty_existing_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path(), &TddConfig::default());
        ws.prepare().expect("prepare");
        fs::write(temp.path().join("stray.txt"), "x").expect("write");

        let err = ws.prepare().unwrap_err();
        assert!(err.to_string().contains("stray.txt"));
    }

    #[test]
    fn apply_writes_and_deletes_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path(), &TddConfig::default());
        fs::write(temp.path().join("old.py"), "x").expect("write");

        let touched = ws
            .apply(&Patch(vec![
                change("tests/deep/test_a.py", Some("assert False")),
                change("old.py", None),
                change("never_existed.py", None),
            ]))
            .expect("apply");

        assert_eq!(
            touched,
            vec![PathBuf::from("tests/deep/test_a.py"), PathBuf::from("old.py")]
        );
        assert!(temp.path().join("tests/deep/test_a.py").is_file());
        assert!(!temp.path().join("old.py").exists());
    }

    #[test]
    fn conflicts_flag_paths_that_hit_directories_or_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path(), &TddConfig::default());
        fs::create_dir_all(temp.path().join("tests")).expect("mkdir");
        fs::write(temp.path().join("tests/.gitkeep"), "").expect("write");
        fs::write(temp.path().join("tests/test_a.py"), "x").expect("write");

        let errors = ws.conflicts(&Patch(vec![
            change("tests", Some("x")),
            change("tests/.gitkeep/x.py", Some("x")),
            change("tests", None),
            change("tests/test_a.py", Some("y")),
            change("tests/new/test_b.py", Some("y")),
            change("src/calc.py", None),
        ]));

        assert_eq!(
            errors,
            vec![
                "tests: not a regular file".to_string(),
                "tests/.gitkeep/x.py: tests/.gitkeep is not a directory".to_string(),
                "tests: not a regular file".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn conflicts_refuse_to_follow_symlinks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("outside");
        let ws = Workspace::new(temp.path(), &TddConfig::default());
        std::os::unix::fs::symlink(outside.path(), temp.path().join("src")).expect("symlink");

        let errors = ws.conflicts(&Patch(vec![change("src/calc.py", Some("x"))]));

        assert_eq!(errors, vec!["src/calc.py: src is a symlink".to_string()]);
    }

    #[test]
    fn check_work_dir_requires_existing_parent() {
        let temp = tempfile::tempdir().expect("tempdir");
        check_work_dir(temp.path()).expect("existing dir");
        check_work_dir(&temp.path().join("new")).expect("creatable");
        assert!(check_work_dir(&temp.path().join("a/b")).is_err());

        let file = temp.path().join("file");
        fs::write(&file, "").expect("write");
        assert!(check_work_dir(&file).is_err());
    }

    #[test]
    fn step_dirs_are_stable() {
        let ws = Workspace::new("/tmp/kata", &TddConfig::default());
        assert!(
            ws.step_dir(2, Role::Implementer, 3)
                .ends_with(".tdd/cycles/2/implementer-3")
        );
    }
}
