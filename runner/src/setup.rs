//! Session preparation: everything that happens before the first cycle.
//!
//! [`load_session`] only reads. It is all a dry run performs. [`prepare`]
//! then creates and initializes the workspace for a real run.

use std::path::PathBuf;

use tracing::{debug, info, instrument};

use crate::error::TddError;
use crate::io::agent::{AgentSettings, api_key_env_var};
use crate::io::config::{TddConfig, load_config};
use crate::io::kata::{Requirements, load_requirements};
use crate::io::workspace::{PrepareOutcome, Workspace, WorkspacePaths, check_work_dir};
use crate::supervisor::SupervisorConfig;

/// Options collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub kata_path: PathBuf,
    pub work_dir: PathBuf,
    /// Defaults to `<work-dir>/.tdd/config.toml`.
    pub config_path: Option<PathBuf>,
    pub max_cycles: u32,
    /// Overrides `max_retries` from the config file.
    pub max_retries: Option<u32>,
    /// Forces fail-fast on; the config file can enable it too.
    pub fail_fast: bool,
    pub model: String,
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub dry_run: bool,
}

/// Validated inputs for one run.
#[derive(Debug, Clone)]
pub struct Session {
    pub requirements: Requirements,
    pub config: TddConfig,
    pub workspace: Workspace,
    pub supervisor: SupervisorConfig,
    pub agent: AgentSettings,
}

/// Load and validate every input without side effects.
///
/// `env` looks up environment variables; it is injected so credential
/// resolution can be tested without touching the process environment.
#[instrument(skip_all, fields(kata = %options.kata_path.display(), work_dir = %options.work_dir.display()))]
pub fn load_session<E>(options: &SessionOptions, env: E) -> Result<Session, TddError>
where
    E: Fn(&str) -> Option<String>,
{
    let requirements =
        load_requirements(&options.kata_path).map_err(|err| TddError::configuration(&err))?;

    check_work_dir(&options.work_dir).map_err(|err| TddError::configuration(&err))?;

    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(|| WorkspacePaths::new(&options.work_dir).config_path);
    if options.config_path.is_some() && !config_path.is_file() {
        return Err(TddError::Configuration(format!(
            "config file {} does not exist",
            config_path.display()
        )));
    }
    let mut config = load_config(&config_path).map_err(|err| TddError::configuration(&err))?;
    if let Some(max_retries) = options.max_retries {
        config.max_retries = max_retries;
    }
    config.fail_fast |= options.fail_fast;

    if options.max_cycles == 0 {
        return Err(TddError::Configuration(
            "max cycles must be at least 1".to_string(),
        ));
    }

    let api_key = resolve_api_key(
        options.provider.as_deref(),
        options.api_key.as_deref(),
        env,
    )?;
    debug!(
        provider = ?options.provider,
        has_api_key = api_key.is_some(),
        "credentials resolved"
    );

    let workspace = Workspace::new(&options.work_dir, &config);
    let supervisor = SupervisorConfig {
        max_cycles: options.max_cycles,
        max_retries: config.max_retries,
        fail_fast: config.fail_fast,
        dry_run: options.dry_run,
    };
    let agent = AgentSettings {
        model: options.model.clone(),
        provider: options.provider.clone(),
        base_url: options.base_url.clone(),
        api_key,
    };
    info!(
        title = ?requirements.title(),
        max_cycles = supervisor.max_cycles,
        max_retries = supervisor.max_retries,
        dry_run = supervisor.dry_run,
        "session loaded"
    );
    Ok(Session {
        requirements,
        config,
        workspace,
        supervisor,
        agent,
    })
}

/// Create and initialize the workspace for a real run.
pub fn prepare(session: &Session) -> Result<PrepareOutcome, TddError> {
    session
        .workspace
        .prepare()
        .map_err(|err| TddError::configuration(&err.context("prepare workspace")))
}

/// API key for `provider`: the explicit flag, else `<PROVIDER>_API_KEY`.
///
/// Without a provider the agent command authenticates on its own and no key is
/// required.
pub fn resolve_api_key<E>(
    provider: Option<&str>,
    flag: Option<&str>,
    env: E,
) -> Result<Option<String>, TddError>
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(key) = flag.filter(|k| !k.trim().is_empty()) {
        return Ok(Some(key.to_string()));
    }
    let Some(provider) = provider else {
        return Ok(None);
    };
    let var = api_key_env_var(provider);
    match env(&var).filter(|k| !k.trim().is_empty()) {
        Some(key) => Ok(Some(key)),
        None => Err(TddError::Configuration(format!(
            "missing API key for provider {provider}: pass --api-key or set {var}"
        ))),
    }
}
