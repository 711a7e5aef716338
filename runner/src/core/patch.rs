//! Deterministic validation of agent-proposed patches.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use crate::core::types::Patch;

/// Top-level directories agents may never touch.
const RESERVED_DIRS: [&str; 2] = [".git", ".tdd"];

/// Return every reason `patch` may not be applied to a workspace.
///
/// Paths must be relative, spelled canonically (no `.`/`..` components, no
/// empty segments or trailing `/`), unique, and outside the reserved directories.
pub fn validate_patch(patch: &Patch) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();
    for change in patch.iter() {
        let path = change.path.as_str();
        if let Err(err) = validate_path(Path::new(path)) {
            errors.push(format!("{path}: {err}"));
            continue;
        }
        if !seen.insert(path) {
            errors.push(format!("{path}: listed more than once"));
        }
    }
    errors
}

fn validate_path(path: &Path) -> Result<(), &'static str> {
    if path.as_os_str().is_empty() {
        return Err("empty path");
    }
    let mut components = path.components().peekable();
    match components.peek() {
        Some(Component::Normal(first)) => {
            if first
                .to_str()
                .is_some_and(|name| RESERVED_DIRS.contains(&name))
            {
                return Err("reserved directory");
            }
        }
        _ => return Err("path must be relative and normalized"),
    }
    if components.any(|c| !matches!(c, Component::Normal(_))) {
        return Err("path must be relative and normalized");
    }
    // `components()` hides interior `.` and repeated `/`.
    let rebuilt: PathBuf = path.components().collect();
    if rebuilt.as_os_str() != path.as_os_str() {
        return Err("path must be relative and normalized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FileChange;

    fn patch(paths: &[&str]) -> Patch {
        Patch(
            paths
                .iter()
                .map(|p| FileChange {
                    path: p.to_string(),
                    contents: Some(String::new()),
                })
                .collect(),
        )
    }

    #[test]
    fn accepts_plain_relative_paths() {
        assert!(validate_patch(&patch(&["tests/test_add.py", "src/add.py", "README.md"])).is_empty());
    }

    #[test]
    fn rejects_escaping_and_absolute_paths() {
        let errors = validate_patch(&patch(&["../outside.py", "/etc/passwd", "src/../x.py", "./a.py"]));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn rejects_reserved_directories_only_at_top_level() {
        let errors = validate_patch(&patch(&[".git/config", ".tdd/run.json", "src/.tdd/ok.txt"]));
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.contains("reserved")));
    }

    #[test]
    fn allows_names_that_only_share_a_prefix() {
        assert!(validate_patch(&patch(&[".tddx/file"])).is_empty());
    }

    #[test]
    fn rejects_duplicate_paths() {
        let errors = validate_patch(&patch(&["src/a.py", "src/a.py"]));
        assert_eq!(errors, vec!["src/a.py: listed more than once".to_string()]);
    }

    #[test]
    fn rejects_non_canonical_spellings_of_the_same_file() {
        let errors = validate_patch(&patch(&["src/a.py", "src/./a.py", "src//a.py", "src/"]));
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e.contains("normalized")));
    }

    #[test]
    fn rejects_empty_path() {
        let errors = validate_patch(&patch(&[""]));
        assert_eq!(errors, vec![": empty path".to_string()]);
    }
}
