//! Kata description loading.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Immutable requirements text extracted from the kata description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirements {
    text: String,
    title: Option<String>,
}

impl Requirements {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let title = extract_title(&text);
        Self { text, title }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// First markdown heading, if the description has one.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}

/// Read the kata description file. Empty descriptions are rejected.
pub fn load_requirements(path: &Path) -> Result<Requirements> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read kata description {}", path.display()))?;
    if text.trim().is_empty() {
        return Err(anyhow!("kata description {} is empty", path.display()));
    }
    let requirements = Requirements::new(text);
    debug!(
        path = %path.display(),
        bytes = requirements.text.len(),
        title = ?requirements.title,
        "kata loaded"
    );
    Ok(requirements)
}

fn extract_title(text: &str) -> Option<String> {
    text.lines()
        .take(10)
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|title| !title.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_text_and_title() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("kata.md");
        fs::write(&path, "# String Calculator\n\nAdd numbers.\n").expect("write");
        let req = load_requirements(&path).expect("load");
        assert_eq!(req.title(), Some("String Calculator"));
        assert!(req.text().contains("Add numbers."));
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_requirements(&temp.path().join("nope.md")).unwrap_err();
        assert!(err.to_string().contains("read kata description"));
    }

    #[test]
    fn blank_file_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("kata.md");
        fs::write(&path, "  \n\n").expect("write");
        assert!(load_requirements(&path).is_err());
    }

    #[test]
    fn title_is_optional() {
        assert_eq!(Requirements::new("just text").title(), None);
    }
}
