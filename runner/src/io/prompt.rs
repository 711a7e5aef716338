//! Role prompt builder for agent input.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections go first,
//! then the longest remaining section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::types::Role;
use crate::io::agent::AgentRequest;

const TESTER_TEMPLATE: &str = include_str!("prompts/tester.md");
const IMPLEMENTER_TEMPLATE: &str = include_str!("prompts/implementer.md");
const REFACTORER_TEMPLATE: &str = include_str!("prompts/refactorer.md");
const OUTPUT_TEMPLATE: &str = include_str!("prompts/output.md");

/// Sections dropped first when over budget, in order.
const DROP_ORDER: [&str; 2] = ["history", "feedback"];
const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section marker regex")
});

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Builds role prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
    tests_dir: String,
    src_dir: String,
}

impl PromptBuilder {
    pub fn new(
        budget_bytes: usize,
        tests_dir: impl Into<String>,
        src_dir: impl Into<String>,
    ) -> Self {
        Self {
            budget_bytes,
            tests_dir: tests_dir.into(),
            src_dir: src_dir.into(),
        }
    }

    /// Render the prompt for `request.role`.
    pub fn build(&self, request: &AgentRequest) -> Result<String> {
        let rendered = self
            .render(request)
            .with_context(|| format!("render {} prompt", request.role))?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(join_sections(&sections))
    }

    fn render(&self, request: &AgentRequest) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("output", OUTPUT_TEMPLATE)?;
        env.add_template(request.role.as_str(), template_for(request.role))?;
        let template = env.get_template(request.role.as_str())?;
        let rendered = template.render(context! {
            cycle => request.cycle,
            attempt => request.attempt,
            title => request.requirements.title(),
            requirements => request.requirements.text().trim(),
            tests_dir => &self.tests_dir,
            src_dir => &self.src_dir,
            failing_tests => &request.failing_tests,
            history => &request.history,
            feedback => request.feedback.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }
}

fn template_for(role: Role) -> &'static str {
    match role {
        Role::Tester => TESTER_TEMPLATE,
        Role::Implementer => IMPLEMENTER_TEMPLATE,
        Role::Refactorer => REFACTORER_TEMPLATE,
    }
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(longest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let excess = total - budget;
    let before_len = longest.content.len();
    let mut keep = before_len
        .saturating_sub(excess)
        .saturating_sub(TRUNCATION_MARKER.len());
    while !longest.content.is_char_boundary(keep) {
        keep -= 1;
    }
    longest.content.truncate(keep);
    longest.content.push_str(TRUNCATION_MARKER);
    debug!(
        section = %longest.key,
        before_len,
        after_len = longest.content.len(),
        "truncated section for budget"
    );
}

fn join_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::kata::Requirements;
    use std::path::PathBuf;

    fn request(role: Role) -> AgentRequest {
        AgentRequest {
            role,
            cycle: 2,
            attempt: 1,
            requirements: Requirements::new("# String Calculator\n\nAdd comma separated numbers."),
            failing_tests: Vec::new(),
            feedback: None,
            history: Vec::new(),
            log_dir: PathBuf::from("/tmp/unused"),
        }
    }

    #[test]
    fn tester_prompt_sections_are_ordered() {
        let mut req = request(Role::Tester);
        req.history = vec!["cycle 1: test: add failing test for cycle 1".to_string()];
        req.feedback = Some("no new failing test".to_string());

        let prompt = PromptBuilder::new(10_000, "tests", "src")
            .build(&req)
            .expect("build");

        let contract = prompt.find("### Tester Contract").expect("contract");
        let kata = prompt.find("### Kata: String Calculator").expect("kata");
        let history = prompt.find("### Completed Steps").expect("history");
        let feedback = prompt.find("### Previous Attempt Rejected").expect("feedback");
        let output = prompt.find("### Output").expect("output");
        assert!(contract < kata);
        assert!(kata < history);
        assert!(history < feedback);
        assert!(feedback < output);
        assert!(prompt.contains("under `tests/`"));
        assert!(!prompt.contains("<!--"));
    }

    #[test]
    fn implementer_prompt_lists_failing_tests() {
        let mut req = request(Role::Implementer);
        req.failing_tests = vec!["tests/test_add.py::test_empty".to_string()];

        let prompt = PromptBuilder::new(10_000, "tests", "src")
            .build(&req)
            .expect("build");

        assert!(prompt.contains("### Failing Tests"));
        assert!(prompt.contains("`tests/test_add.py::test_empty`"));
        assert!(!prompt.contains("### Previous Attempt Rejected"));
    }

    #[test]
    fn budget_drops_history_before_feedback() {
        let mut req = request(Role::Tester);
        req.history = vec!["step".repeat(200)];
        req.feedback = Some("keep me".to_string());
        let full = PromptBuilder::new(100_000, "tests", "src")
            .build(&req)
            .expect("build");

        let prompt = PromptBuilder::new(full.len() - 400, "tests", "src")
            .build(&req)
            .expect("build");

        assert!(!prompt.contains("### Completed Steps"));
        assert!(prompt.contains("keep me"));
        assert!(prompt.contains("### Tester Contract"));
    }

    #[test]
    fn oversized_requirements_are_truncated() {
        let mut req = request(Role::Refactorer);
        req.requirements = Requirements::new("é".repeat(5_000));

        let prompt = PromptBuilder::new(3_000, "tests", "src")
            .build(&req)
            .expect("build");

        assert!(prompt.contains("[truncated]"));
        assert!(prompt.contains("### Refactorer Contract"));
        assert!(prompt.contains("### Output"));
        assert!(prompt.len() <= 3_000 + "\n\n".len() * 4);
    }
}
