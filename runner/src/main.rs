//! `agentic-tdd`: drive red → green → refactor cycles over a kata description.

use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use clap::builder::BoolishValueParser;
use tracing::warn;

use tdd_runner::core::types::{CommitKind, RunResult, StopReason};
use tdd_runner::error::TddError;
use tdd_runner::exit_codes;
use tdd_runner::io::agent::CommandAgent;
use tdd_runner::io::committer::GitCommitter;
use tdd_runner::io::cycle_log::{RunSummary, elapsed_secs, write_run_summary};
use tdd_runner::io::git::Git;
use tdd_runner::io::verifier::CommandVerifier;
use tdd_runner::logging;
use tdd_runner::setup::{self, Session, SessionOptions};
use tdd_runner::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(
    name = "agentic-tdd",
    version,
    about = "Multi-agent test-driven development over a code kata"
)]
struct Cli {
    /// Markdown file describing the kata.
    kata: PathBuf,

    /// Model passed to the agent command.
    #[arg(long, env = "DEFAULT_MODEL")]
    model: Option<String>,

    /// Model provider; its key comes from --api-key or `<PROVIDER>_API_KEY`.
    #[arg(long)]
    provider: Option<String>,

    #[arg(long)]
    api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint.
    #[arg(long)]
    base_url: Option<String>,

    /// Workspace root; created and initialized if absent.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Config file (default: `<work-dir>/.tdd/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Upper bound on the number of cycles.
    #[arg(long, env = "MAX_TDD_CYCLES", default_value_t = 10)]
    max_cycles: u32,

    /// Retries after the first attempt for the tester and implementer steps.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Stop after the first failed cycle.
    #[arg(long)]
    fail_fast: bool,

    /// Validate the setup and exit without running any cycle.
    #[arg(long)]
    dry_run: bool,

    /// Print a progress line for every step.
    #[arg(long, env = "VERBOSE_OUTPUT", value_parser = BoolishValueParser::new())]
    verbose: bool,
}

impl Cli {
    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            kata_path: self.kata.clone(),
            work_dir: self.work_dir.clone(),
            config_path: self.config.clone(),
            max_cycles: self.max_cycles,
            max_retries: self.max_retries,
            fail_fast: self.fail_fast,
            model: self.model.clone().unwrap_or_default(),
            provider: self.provider.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            dry_run: self.dry_run,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let options = cli.session_options();
    let session = match setup::load_session(&options, |var| std::env::var(var).ok()) {
        Ok(session) => session,
        Err(err) => return fail_setup(&err),
    };
    if cli.verbose {
        println!(
            "kata: {} ({} bytes)",
            session.requirements.title().unwrap_or("untitled"),
            session.requirements.text().len()
        );
        println!("work dir: {}", session.workspace.root().display());
    }

    let dry_run = session.supervisor.dry_run;
    if !dry_run {
        if let Err(err) = setup::prepare(&session) {
            return fail_setup(&err);
        }
    }
    let started_at = Utc::now();
    let result = match execute(&session, cli.verbose) {
        Ok(result) => result,
        Err(err) => return fail_setup(&err),
    };

    if !dry_run {
        let ended_at = Utc::now();
        let summary = RunSummary {
            kata: cli.kata.display().to_string(),
            start_time: started_at.to_rfc3339(),
            end_time: ended_at.to_rfc3339(),
            duration_secs: elapsed_secs(started_at, ended_at),
            result: &result,
        };
        if let Err(err) = write_run_summary(&session.workspace.paths().run_result_path, &summary)
        {
            warn!(error = %format!("{err:#}"), "failed to write run summary");
        }
    }

    print_summary(&result, cli.verbose);
    exit_codes::for_result(&result)
}

fn execute(session: &Session, verbose: bool) -> Result<RunResult, TddError> {
    let agent = CommandAgent::new(&session.config, &session.workspace, session.agent.clone())
        .map_err(|err| TddError::configuration(&err))?;
    let verifier = CommandVerifier::new(&session.config, session.workspace.root());
    let committer = GitCommitter::new(Git::new(session.workspace.root()));
    let supervisor = Supervisor::new(
        &session.workspace,
        &agent,
        &verifier,
        &committer,
        session.supervisor.clone(),
    );
    Ok(supervisor.run(&session.requirements, |event| {
        if verbose {
            println!("{event}");
        }
    }))
}

fn fail_setup(err: &TddError) -> i32 {
    eprintln!("error: {err}");
    exit_codes::INVALID
}

fn print_summary(result: &RunResult, verbose: bool) {
    match &result.stop {
        StopReason::Aborted { error } => eprintln!("aborted: {error}"),
        StopReason::CycleFailed { cycle } => eprintln!("stopped: cycle {cycle} failed"),
        StopReason::DryRun => {
            if verbose {
                println!("dry run: setup is valid, no cycle was run");
            }
            return;
        }
        StopReason::RequirementsSatisfied | StopReason::MaxCyclesReached => {}
    }
    for failure in &result.failed_cycles {
        eprintln!(
            "cycle {} failed at {} after {} attempt(s): {}",
            failure.cycle, failure.role, failure.attempts, failure.reason
        );
    }
    let stop = match &result.stop {
        StopReason::RequirementsSatisfied => "requirements satisfied",
        StopReason::MaxCyclesReached => "max cycles reached",
        StopReason::CycleFailed { .. } => "cycle failed",
        StopReason::Aborted { .. } => "aborted",
        StopReason::DryRun => "dry run",
    };
    println!(
        "{stop}: {} of {} cycle(s) completed, commits: {} test, {} implementation, {} refactor",
        result.cycles_completed,
        result.cycles_started,
        result.commits_of(CommitKind::Test).count(),
        result.commits_of(CommitKind::Implementation).count(),
        result.commits_of(CommitKind::Refactor).count(),
    );
    if verbose {
        println!(
            "agent invocations: {}, verifier runs: {}",
            result.agent_invocations, result.verifier_runs
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = Cli::try_parse_from(["agentic-tdd", "kata.md"]).expect("parse");
        assert_eq!(cli.kata, PathBuf::from("kata.md"));
        assert_eq!(cli.work_dir, PathBuf::from("."));
        assert!(!cli.dry_run);
    }

    #[test]
    fn parses_full_flag_set() {
        let cli = Cli::try_parse_from([
            "agentic-tdd",
            "kata.md",
            "--model",
            "qwen3-coder-plus",
            "--provider",
            "perplexity",
            "--api-key",
            "k",
            "--work-dir",
            "/tmp/kata",
            "--max-cycles",
            "3",
            "--max-retries",
            "1",
            "--fail-fast",
            "--dry-run",
            "--verbose",
        ])
        .expect("parse");
        let opts = cli.session_options();
        assert_eq!(opts.max_cycles, 3);
        assert_eq!(opts.max_retries, Some(1));
        assert_eq!(opts.model, "qwen3-coder-plus");
        assert_eq!(opts.provider.as_deref(), Some("perplexity"));
        assert!(opts.fail_fast && opts.dry_run && cli.verbose);
    }

    #[test]
    fn kata_is_required() {
        assert!(Cli::try_parse_from(["agentic-tdd"]).is_err());
    }
}
