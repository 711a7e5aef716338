//! Agent abstraction for role-specialized code generation.
//!
//! The [`Agent`] trait decouples the supervisor from the actual backend
//! (an agent CLI such as `codex exec`). Tests use scripted agents that return
//! predetermined reports without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{AgentReport, Role};
use crate::io::config::TddConfig;
use crate::io::kata::Requirements;
use crate::io::process::{run_captured, tail};
use crate::io::prompt::PromptBuilder;
use crate::io::workspace::Workspace;

/// JSON Schema every agent reply must satisfy.
pub const AGENT_OUTPUT_SCHEMA: &str = include_str!("../../schemas/agent_output.schema.json");

const STDERR_TAIL_BYTES: usize = 2_000;

/// Everything an agent needs for one step attempt.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: Role,
    pub cycle: u32,
    /// 1-based attempt number within the step.
    pub attempt: u32,
    pub requirements: Requirements,
    /// Tests the implementer has to turn green.
    pub failing_tests: Vec<String>,
    /// Why the previous attempt was rejected, if any.
    pub feedback: Option<String>,
    /// One line per checkpoint recorded so far.
    pub history: Vec<String>,
    /// Directory for this attempt's prompt, raw output and logs.
    pub log_dir: PathBuf,
}

/// Abstraction over agent backends.
pub trait Agent {
    /// Produce a report for `request.role`. Errors mean the call itself failed.
    fn run(&self, request: &AgentRequest) -> Result<AgentReport>;
}

/// Model and provider settings passed to the agent CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSettings {
    pub model: String,
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Environment variable that carries the API key for `provider`.
pub fn api_key_env_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_ascii_uppercase().replace('-', "_"))
}

/// Agent that spawns a configured CLI once per step attempt.
///
/// The prompt is written to stdin. The CLI must leave its final JSON reply at the
/// path given by `--output-last-message`.
pub struct CommandAgent {
    command: Vec<String>,
    workdir: PathBuf,
    schema_path: PathBuf,
    settings: AgentSettings,
    prompts: PromptBuilder,
    validator: Validator,
    timeout: Duration,
    output_limit: usize,
}

impl CommandAgent {
    pub fn new(config: &TddConfig, workspace: &Workspace, settings: AgentSettings) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(AGENT_OUTPUT_SCHEMA).context("parse agent output schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| anyhow!("compile agent output schema: {err}"))?;
        Ok(Self {
            command: config.agent.command.clone(),
            workdir: workspace.root().to_path_buf(),
            schema_path: workspace.paths().state_dir.join("agent_output.schema.json"),
            settings,
            prompts: PromptBuilder::new(
                config.prompt_budget_bytes,
                workspace.tests_dir(),
                workspace.src_dir(),
            ),
            validator,
            timeout: Duration::from_secs(config.step_timeout_secs),
            output_limit: config.output_limit_bytes,
        })
    }

    fn build_command(&self, output_path: &Path) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--sandbox")
            .arg("read-only")
            .arg("--skip-git-repo-check")
            .arg("--output-schema")
            .arg(&self.schema_path)
            .arg("--output-last-message")
            .arg(output_path);
        if !self.settings.model.is_empty() {
            cmd.arg("-m").arg(&self.settings.model);
        }
        if let Some(provider) = &self.settings.provider {
            let env_key = api_key_env_var(provider);
            cmd.arg("-c").arg(format!("model_provider=\"{provider}\""));
            cmd.arg("-c")
                .arg(format!("model_providers.{provider}.name=\"{provider}\""));
            cmd.arg("-c")
                .arg(format!("model_providers.{provider}.env_key=\"{env_key}\""));
            if let Some(url) = &self.settings.base_url {
                cmd.arg("-c")
                    .arg(format!("model_providers.{provider}.base_url=\"{url}\""));
            }
            if let Some(key) = &self.settings.api_key {
                cmd.env(env_key, key);
            }
        } else if let Some(url) = &self.settings.base_url {
            cmd.env("OPENAI_BASE_URL", url);
        }
        cmd.arg("-").current_dir(&self.workdir);
        Ok(cmd)
    }

    fn ensure_schema_file(&self) -> Result<()> {
        if self.schema_path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.schema_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&self.schema_path, AGENT_OUTPUT_SCHEMA)
            .with_context(|| format!("write {}", self.schema_path.display()))
    }

    fn parse_reply(&self, output_path: &Path) -> Result<AgentReport> {
        let raw = fs::read_to_string(output_path)
            .with_context(|| format!("missing agent output {}", output_path.display()))?;
        let value: Value = serde_json::from_str(raw.trim())
            .with_context(|| format!("parse agent output {}", output_path.display()))?;
        let messages: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(anyhow!(
                "agent output failed schema validation: {}",
                messages.join("; ")
            ));
        }
        serde_json::from_value(value).context("deserialize agent output")
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(role = %request.role, cycle = request.cycle, attempt = request.attempt))]
    fn run(&self, request: &AgentRequest) -> Result<AgentReport> {
        fs::create_dir_all(&request.log_dir)
            .with_context(|| format!("create agent log dir {}", request.log_dir.display()))?;
        self.ensure_schema_file()?;

        let prompt = self.prompts.build(request)?;
        let prompt_path = request.log_dir.join("prompt.md");
        fs::write(&prompt_path, &prompt)
            .with_context(|| format!("write {}", prompt_path.display()))?;

        let output_path = request.log_dir.join("output.json");
        let cmd = self.build_command(&output_path)?;
        info!(prompt_bytes = prompt.len(), "invoking agent");
        let output = run_captured(cmd, Some(prompt.as_bytes()), self.timeout, self.output_limit)
            .context("run agent command")?;

        let log_path = request.log_dir.join("agent.log");
        fs::write(&log_path, output.render_log("agent", self.output_limit))
            .with_context(|| format!("write {}", log_path.display()))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
            return Err(anyhow!("agent timed out after {}s", self.timeout.as_secs()));
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "agent command failed");
            return Err(anyhow!(
                "agent exited with status {:?}: {}",
                output.status.code(),
                tail(stderr.trim(), STDERR_TAIL_BYTES)
            ));
        }

        let report = self.parse_reply(&output_path)?;
        debug!(
            files = report.patch.len(),
            requirements_satisfied = report.requirements_satisfied,
            "agent reply parsed"
        );
        Ok(report)
    }
}
