//! Run configuration stored in `<work-dir>/.tdd/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Run configuration (TOML).
///
/// Missing fields default to the values below; CLI flags override the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TddConfig {
    /// Retries allowed for the tester and implementer steps after their first attempt.
    pub max_retries: u32,

    /// Stop the run after the first failed cycle instead of moving on.
    pub fail_fast: bool,

    /// Wall-clock limit for each agent call and each verifier run.
    pub step_timeout_secs: u64,

    /// Truncate captured agent/verifier output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Maximum bytes for a rendered prompt before dropping sections.
    pub prompt_budget_bytes: usize,

    /// Workspace-relative location for tests.
    pub tests_dir: String,

    /// Workspace-relative location for the implementation.
    pub src_dir: String,

    pub verifier: VerifierConfig,

    pub agent: AgentCommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierConfig {
    /// Command that runs the whole suite from the workspace root.
    pub command: Vec<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
                "-v".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentCommandConfig {
    /// Agent CLI invoked once per step with the prompt on stdin.
    pub command: Vec<String>,
}

impl Default for AgentCommandConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
        }
    }
}

impl Default for TddConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            fail_fast: false,
            step_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 40_000,
            tests_dir: "tests".to_string(),
            src_dir: "src".to_string(),
            verifier: VerifierConfig::default(),
            agent: AgentCommandConfig::default(),
        }
    }
}

impl TddConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        validate_command("verifier.command", &self.verifier.command)?;
        validate_command("agent.command", &self.agent.command)?;
        validate_dir("tests_dir", &self.tests_dir)?;
        validate_dir("src_dir", &self.src_dir)?;
        Ok(())
    }
}

fn validate_command(field: &str, command: &[String]) -> Result<()> {
    if command.first().is_none_or(|program| program.trim().is_empty()) {
        return Err(anyhow!("{field} must be a non-empty array"));
    }
    Ok(())
}

fn validate_dir(field: &str, dir: &str) -> Result<()> {
    let path = Path::new(dir);
    let normal = path
        .components()
        .all(|c| matches!(c, std::path::Component::Normal(_)));
    if dir.trim().is_empty() || !normal {
        return Err(anyhow!("{field} must be a relative path inside the workspace"));
    }
    if dir == ".git" || dir == ".tdd" {
        return Err(anyhow!("{field} may not be a reserved directory"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TddConfig::default()`.
pub fn load_config(path: &Path) -> Result<TddConfig> {
    if !path.exists() {
        let cfg = TddConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TddConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}
