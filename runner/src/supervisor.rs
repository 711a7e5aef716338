//! Cycle state machine: Tester → verify red → Implementer → verify green →
//! Refactorer → verify still green, with a checkpoint after every verified step.
//!
//! The supervisor is the sole writer of the workspace. Agents only propose
//! patches; the supervisor applies them, runs the verifier, asks the gate what to
//! do next and records or rolls back through the committer. All mutable run
//! state lives in an explicit [`RunContext`], so the machine runs unchanged
//! against scripted collaborators in tests.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, error, info, instrument, warn};

use crate::core::commits::{CommitSequence, commit_message};
use crate::core::gate::{GateDecision, gate, on_failure};
use crate::core::patch::validate_patch;
use crate::core::types::{
    CommitKind, CommitRecord, CycleFailure, Role, RunResult, StopReason, VerifyReport,
};
use crate::error::TddError;
use crate::io::agent::{Agent, AgentRequest};
use crate::io::committer::Committer;
use crate::io::cycle_log::{AttemptMeta, AttemptOutcome, VerifySummary, write_attempt_meta};
use crate::io::kata::Requirements;
use crate::io::process::tail;
use crate::io::verifier::{VerifyRequest, Verifier};
use crate::io::workspace::Workspace;

/// Bytes of verifier output fed back to an agent on retry.
const FEEDBACK_DETAIL_BYTES: usize = 2_000;

/// Run-level knobs for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Hard upper bound on the cycle index.
    pub max_cycles: u32,
    /// Retries after the first attempt for the Tester and Implementer steps.
    pub max_retries: u32,
    /// Stop after the first failed cycle.
    pub fail_fast: bool,
    /// Return before the first cycle without touching any collaborator.
    pub dry_run: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_cycles: 10,
            max_retries: 3,
            fail_fast: false,
            dry_run: false,
        }
    }
}

/// Progress notifications emitted while a run advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    CycleStarted {
        cycle: u32,
    },
    StepStarted {
        cycle: u32,
        role: Role,
        attempt: u32,
    },
    AgentFailed {
        cycle: u32,
        role: Role,
        attempt: u32,
        reason: String,
    },
    Verified {
        cycle: u32,
        role: Role,
        attempt: u32,
        passed: bool,
        decision: GateDecision,
        reason: Option<String>,
    },
    Committed {
        record: CommitRecord,
        message: String,
    },
    RefactorSkipped {
        cycle: u32,
    },
    RefactorDiscarded {
        cycle: u32,
        reason: String,
    },
    CycleFailed {
        failure: CycleFailure,
    },
    RequirementsSatisfied {
        cycle: u32,
        summary: String,
    },
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::CycleStarted { cycle } => write!(f, "cycle {cycle}: started"),
            RunEvent::StepStarted {
                cycle,
                role,
                attempt,
            } => write!(f, "cycle {cycle}: {role} attempt {attempt}"),
            RunEvent::AgentFailed {
                cycle,
                role,
                attempt,
                reason,
            } => write!(f, "cycle {cycle}: {role} attempt {attempt} failed: {reason}"),
            RunEvent::Verified {
                cycle,
                role,
                attempt,
                passed,
                decision,
                reason,
            } => {
                let suite = if *passed { "green" } else { "red" };
                write!(
                    f,
                    "cycle {cycle}: {role} attempt {attempt} verified ({suite}) -> {decision:?}"
                )?;
                if let Some(reason) = reason {
                    write!(f, ": {reason}")?;
                }
                Ok(())
            }
            RunEvent::Committed { record, message } => {
                let short = record.id.get(..8).unwrap_or(&record.id);
                write!(f, "cycle {}: committed {short} {message}", record.cycle)
            }
            RunEvent::RefactorSkipped { cycle } => {
                write!(f, "cycle {cycle}: refactorer proposed no change")
            }
            RunEvent::RefactorDiscarded { cycle, reason } => {
                write!(f, "cycle {cycle}: refactor discarded: {reason}")
            }
            RunEvent::CycleFailed { failure } => write!(
                f,
                "cycle {}: failed at {} after {} attempt(s): {}",
                failure.cycle, failure.role, failure.attempts, failure.reason
            ),
            RunEvent::RequirementsSatisfied { cycle, summary } => {
                write!(f, "cycle {cycle}: requirements satisfied: {summary}")
            }
        }
    }
}

/// Mutable state threaded through one run.
pub struct RunContext<'a> {
    pub result: RunResult,
    sequence: CommitSequence,
    /// Verifier report for the last checkpointed workspace state.
    baseline: Option<VerifyReport>,
    /// One line per checkpoint, handed to agents as prior-cycle context.
    history: Vec<String>,
    on_event: &'a mut dyn FnMut(&RunEvent),
}

impl<'a> RunContext<'a> {
    fn new(on_event: &'a mut dyn FnMut(&RunEvent)) -> Self {
        Self {
            result: RunResult::new(StopReason::MaxCyclesReached),
            sequence: CommitSequence::new(),
            baseline: None,
            history: Vec::new(),
            on_event,
        }
    }

    fn emit(&mut self, event: RunEvent) {
        debug!(event = %event, "run event");
        (self.on_event)(&event);
    }
}

/// Working record for the cycle in progress.
#[derive(Debug, Clone)]
struct CycleState {
    cycle: u32,
    step: Role,
    retries_used: u32,
    /// Tests the Tester turned red, handed to the Implementer.
    failing_tests: Vec<String>,
}

/// How a step ended once its retries were spent or it advanced.
#[derive(Debug)]
enum StepOutcome {
    Advanced {
        report: VerifyReport,
        files: Vec<PathBuf>,
        summary: String,
        new_failures: Vec<String>,
    },
    Satisfied {
        summary: String,
    },
    Skipped,
    Discarded {
        reason: String,
    },
    Exhausted {
        attempts: u32,
        reason: String,
    },
}

/// Result of a single agent attempt, before the retry policy is applied.
#[derive(Debug)]
enum Attempt {
    Passed {
        report: VerifyReport,
        files: Vec<PathBuf>,
        summary: String,
        new_failures: Vec<String>,
    },
    Satisfied {
        summary: String,
    },
    NoChange,
    Rejected {
        decision: GateDecision,
        reason: String,
    },
}

#[derive(Debug)]
enum CycleEnd {
    Completed,
    Satisfied,
    Failed(CycleFailure),
}

/// Drives cycles against injected collaborators.
pub struct Supervisor<'a, A, V, C> {
    workspace: &'a Workspace,
    agent: &'a A,
    verifier: &'a V,
    committer: &'a C,
    config: SupervisorConfig,
}

impl<'a, A: Agent, V: Verifier, C: Committer> Supervisor<'a, A, V, C> {
    pub fn new(
        workspace: &'a Workspace,
        agent: &'a A,
        verifier: &'a V,
        committer: &'a C,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            workspace,
            agent,
            verifier,
            committer,
            config,
        }
    }

    /// Run cycles until the requirements are satisfied, the budget is spent,
    /// fail-fast triggers or a fatal error occurs.
    ///
    /// Never fails: fatal errors end up in [`StopReason::Aborted`] next to the
    /// partial results.
    #[instrument(skip_all, fields(max_cycles = self.config.max_cycles, max_retries = self.config.max_retries))]
    pub fn run<F>(&self, requirements: &Requirements, mut on_event: F) -> RunResult
    where
        F: FnMut(&RunEvent),
    {
        if self.config.dry_run {
            info!("dry run: skipping cycles");
            return RunResult::new(StopReason::DryRun);
        }
        let mut ctx = RunContext::new(&mut on_event);

        for cycle in 1..=self.config.max_cycles {
            ctx.result.cycles_started = cycle;
            info!(cycle, "cycle started");
            ctx.emit(RunEvent::CycleStarted { cycle });

            match self.run_cycle(&mut ctx, requirements, cycle) {
                Ok(CycleEnd::Completed) => {}
                Ok(CycleEnd::Satisfied) => {
                    ctx.result.stop = StopReason::RequirementsSatisfied;
                    break;
                }
                Ok(CycleEnd::Failed(failure)) => {
                    warn!(error = %TddError::from(&failure), "cycle failed");
                    ctx.result.failed_cycles.push(failure.clone());
                    ctx.emit(RunEvent::CycleFailed { failure });
                    if self.config.fail_fast {
                        ctx.result.stop = StopReason::CycleFailed { cycle };
                        break;
                    }
                }
                Err(err) => {
                    error!(cycle, error = %err, "run aborted");
                    if let Err(restore) = self.committer.restore_checkpoint() {
                        warn!(error = %format!("{restore:#}"), "restore after abort failed");
                    }
                    ctx.result.stop = StopReason::Aborted { error: err };
                    break;
                }
            }
        }

        ctx.result.commits = ctx.sequence.records().to_vec();
        info!(
            stop = ?ctx.result.stop,
            cycles_completed = ctx.result.cycles_completed,
            commits = ctx.result.commits.len(),
            "run finished"
        );
        ctx.result
    }

    fn run_cycle(
        &self,
        ctx: &mut RunContext<'_>,
        requirements: &Requirements,
        cycle: u32,
    ) -> Result<CycleEnd, TddError> {
        let mut state = CycleState {
            cycle,
            step: Role::Tester,
            retries_used: 0,
            failing_tests: Vec::new(),
        };

        match self.run_step(ctx, &mut state, requirements)? {
            StepOutcome::Advanced {
                report,
                files,
                summary,
                new_failures,
            } => {
                state.failing_tests = if new_failures.is_empty() {
                    report.failing().map(str::to_string).collect()
                } else {
                    new_failures
                };
                self.checkpoint(ctx, cycle, CommitKind::Test, &files, &summary)?;
                ctx.baseline = Some(report);
            }
            StepOutcome::Satisfied { summary } => {
                info!(cycle, "tester reports requirements satisfied");
                ctx.emit(RunEvent::RequirementsSatisfied { cycle, summary });
                return Ok(CycleEnd::Satisfied);
            }
            StepOutcome::Exhausted { attempts, reason } => {
                return Ok(CycleEnd::Failed(failure(cycle, Role::Tester, attempts, reason)));
            }
            other => {
                return Err(TddError::Workspace(format!(
                    "unexpected tester outcome {other:?}"
                )));
            }
        }

        state.step = Role::Implementer;
        state.retries_used = 0;
        match self.run_step(ctx, &mut state, requirements)? {
            StepOutcome::Advanced {
                report,
                files,
                summary,
                ..
            } => {
                self.checkpoint(ctx, cycle, CommitKind::Implementation, &files, &summary)?;
                ctx.baseline = Some(report);
                ctx.result.cycles_completed += 1;
            }
            StepOutcome::Exhausted { attempts, reason } => {
                return Ok(CycleEnd::Failed(failure(
                    cycle,
                    Role::Implementer,
                    attempts,
                    reason,
                )));
            }
            other => {
                return Err(TddError::Workspace(format!(
                    "unexpected implementer outcome {other:?}"
                )));
            }
        }

        state.step = Role::Refactorer;
        state.retries_used = 0;
        match self.run_step(ctx, &mut state, requirements)? {
            StepOutcome::Advanced {
                report,
                files,
                summary,
                ..
            } => {
                self.checkpoint(ctx, cycle, CommitKind::Refactor, &files, &summary)?;
                ctx.baseline = Some(report);
            }
            StepOutcome::Skipped => ctx.emit(RunEvent::RefactorSkipped { cycle }),
            StepOutcome::Discarded { reason } => {
                info!(cycle, reason = %reason, "refactor discarded");
                ctx.emit(RunEvent::RefactorDiscarded { cycle, reason });
            }
            other => {
                return Err(TddError::Workspace(format!(
                    "unexpected refactorer outcome {other:?}"
                )));
            }
        }
        Ok(CycleEnd::Completed)
    }

    /// Run one step with its retry policy. Rejected attempts are rolled back
    /// before the next attempt and when the step gives up.
    fn run_step(
        &self,
        ctx: &mut RunContext<'_>,
        state: &mut CycleState,
        requirements: &Requirements,
    ) -> Result<StepOutcome, TddError> {
        let role = state.step;
        let mut feedback: Option<String> = None;
        loop {
            let attempt = state.retries_used + 1;
            ctx.emit(RunEvent::StepStarted {
                cycle: state.cycle,
                role,
                attempt,
            });
            let request = AgentRequest {
                role,
                cycle: state.cycle,
                attempt,
                requirements: requirements.clone(),
                failing_tests: if role == Role::Implementer {
                    state.failing_tests.clone()
                } else {
                    Vec::new()
                },
                feedback: feedback.take(),
                history: ctx.history.clone(),
                log_dir: self.workspace.step_dir(state.cycle, role, attempt),
            };

            let mut meta = AttemptMeta::start(state.cycle, role, attempt);
            let outcome = self.attempt(ctx, state, &request, &mut meta);
            meta.finish();
            if let Err(err) = write_attempt_meta(&request.log_dir, &meta) {
                warn!(error = %format!("{err:#}"), "failed to write attempt log");
            }

            match outcome? {
                Attempt::Passed {
                    report,
                    files,
                    summary,
                    new_failures,
                } => {
                    return Ok(StepOutcome::Advanced {
                        report,
                        files,
                        summary,
                        new_failures,
                    });
                }
                Attempt::Satisfied { summary } => return Ok(StepOutcome::Satisfied { summary }),
                Attempt::NoChange => return Ok(StepOutcome::Skipped),
                Attempt::Rejected { decision, reason } => {
                    self.committer
                        .restore_checkpoint()
                        .map_err(|err| TddError::workspace(&err))?;
                    match decision {
                        GateDecision::Retry => {
                            debug!(role = %role, attempt, "retrying step");
                            state.retries_used += 1;
                            feedback = Some(reason);
                        }
                        GateDecision::Discard => return Ok(StepOutcome::Discarded { reason }),
                        GateDecision::Abort | GateDecision::Advance => {
                            return Ok(StepOutcome::Exhausted {
                                attempts: attempt,
                                reason,
                            });
                        }
                    }
                }
            }
        }
    }

    fn attempt(
        &self,
        ctx: &mut RunContext<'_>,
        state: &CycleState,
        request: &AgentRequest,
        meta: &mut AttemptMeta,
    ) -> Result<Attempt, TddError> {
        let role = request.role;
        let reject = |reason: String| Attempt::Rejected {
            decision: on_failure(role, state.retries_used, self.config.max_retries),
            reason,
        };

        ctx.result.agent_invocations += 1;
        let reply = match self.agent.run(request) {
            Ok(reply) => reply,
            Err(err) => {
                let err = TddError::Agent {
                    role,
                    reason: format!("{err:#}"),
                };
                warn!(role = %role, attempt = request.attempt, error = %err, "agent failed");
                meta.outcome = AttemptOutcome::AgentFailed;
                meta.reason = Some(err.to_string());
                ctx.emit(RunEvent::AgentFailed {
                    cycle: state.cycle,
                    role,
                    attempt: request.attempt,
                    reason: err.to_string(),
                });
                return Ok(reject(err.to_string()));
            }
        };
        meta.summary = Some(reply.summary.clone());

        if role == Role::Tester && reply.requirements_satisfied {
            meta.outcome = AttemptOutcome::Satisfied;
            return Ok(Attempt::Satisfied {
                summary: reply.summary,
            });
        }

        let mut problems = validate_patch(&reply.patch);
        if problems.is_empty() {
            problems = self.workspace.conflicts(&reply.patch);
        }
        if !problems.is_empty() {
            let err = TddError::Agent {
                role,
                reason: format!("invalid patch: {}", problems.join("; ")),
            };
            meta.outcome = AttemptOutcome::AgentFailed;
            meta.reason = Some(err.to_string());
            ctx.emit(RunEvent::AgentFailed {
                cycle: state.cycle,
                role,
                attempt: request.attempt,
                reason: err.to_string(),
            });
            return Ok(reject(err.to_string()));
        }
        if reply.patch.is_empty() {
            match role {
                Role::Refactorer => {
                    meta.outcome = AttemptOutcome::Skipped;
                    return Ok(Attempt::NoChange);
                }
                Role::Tester => {
                    let reason = "tester proposed no changes".to_string();
                    meta.reason = Some(reason.clone());
                    return Ok(reject(reason));
                }
                Role::Implementer => {}
            }
        }

        let files = self
            .workspace
            .apply(&reply.patch)
            .map_err(|err| TddError::workspace(&err))?;
        meta.files = files.iter().map(|p| p.display().to_string()).collect();

        ctx.result.verifier_runs += 1;
        let report = self
            .verifier
            .verify(&VerifyRequest {
                log_dir: request.log_dir.clone(),
            })
            .map_err(|err| TddError::verifier(&err))?;
        meta.verify = Some(VerifySummary::from(&report));

        let verdict = gate(
            role,
            ctx.baseline.as_ref(),
            &report,
            state.retries_used,
            self.config.max_retries,
        );
        ctx.emit(RunEvent::Verified {
            cycle: state.cycle,
            role,
            attempt: request.attempt,
            passed: report.passed,
            decision: verdict.decision,
            reason: verdict.reason.clone(),
        });

        match verdict.reason {
            None => {
                meta.outcome = AttemptOutcome::Advanced;
                Ok(Attempt::Passed {
                    report,
                    files,
                    summary: reply.summary,
                    new_failures: verdict.new_failures,
                })
            }
            Some(reason) => {
                meta.outcome = AttemptOutcome::Rejected;
                meta.reason = Some(reason.clone());
                let detail = tail(&report.detail, FEEDBACK_DETAIL_BYTES);
                let feedback = if detail.is_empty() {
                    reason
                } else {
                    format!("{reason}\n\nTest output (tail):\n{detail}")
                };
                Ok(Attempt::Rejected {
                    decision: verdict.decision,
                    reason: feedback,
                })
            }
        }
    }

    fn checkpoint(
        &self,
        ctx: &mut RunContext<'_>,
        cycle: u32,
        kind: CommitKind,
        files: &[PathBuf],
        summary: &str,
    ) -> Result<(), TddError> {
        ctx.sequence
            .check_next(cycle, kind)
            .map_err(|reason| TddError::Commit {
                cycle,
                kind,
                reason,
            })?;
        let message = commit_message(kind, cycle);
        let id = self
            .committer
            .commit(files, &message)
            .map_err(|err| TddError::Commit {
                cycle,
                kind,
                reason: format!("{err:#}"),
            })?;
        let record = CommitRecord { cycle, kind, id };
        ctx.sequence.record(record.clone());
        ctx.history.push(format!("cycle {cycle} {kind}: {}", summary.trim()));
        ctx.emit(RunEvent::Committed { record, message });
        Ok(())
    }
}

fn failure(cycle: u32, role: Role, attempts: u32, reason: String) -> CycleFailure {
    CycleFailure {
        cycle,
        role,
        attempts,
        reason,
    }
}
