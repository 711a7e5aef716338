//! Error taxonomy surfaced by the supervisor.
//!
//! Adapters return `anyhow::Result` with context; the supervisor classifies those
//! failures into [`TddError`] at the point where it decides between retrying a
//! step, reporting a failed cycle, and aborting the run.

use thiserror::Error;

use crate::core::types::{CommitKind, CycleFailure, Role};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TddError {
    /// Missing or unreadable kata file, invalid work dir, missing credential, bad config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A step kept failing its gate after exhausting its retries.
    #[error("cycle {cycle}: {role} violated its verification gate after {attempts} attempt(s): {reason}")]
    PolicyViolation {
        cycle: u32,
        role: Role,
        attempts: u32,
        reason: String,
    },

    /// The agent call failed or returned an unusable reply.
    #[error("{role} agent failed: {reason}")]
    Agent { role: Role, reason: String },

    /// A verified state could not be recorded.
    #[error("cycle {cycle}: {kind} commit failed: {reason}")]
    Commit {
        cycle: u32,
        kind: CommitKind,
        reason: String,
    },

    /// The workspace could not be mutated or restored.
    #[error("workspace error: {0}")]
    Workspace(String),

    /// The test suite could not be executed at all.
    #[error("verifier error: {0}")]
    Verifier(String),
}

impl TddError {
    /// Build a configuration error from an `anyhow` chain.
    pub fn configuration(err: &anyhow::Error) -> Self {
        TddError::Configuration(format!("{err:#}"))
    }

    pub fn workspace(err: &anyhow::Error) -> Self {
        TddError::Workspace(format!("{err:#}"))
    }

    pub fn verifier(err: &anyhow::Error) -> Self {
        TddError::Verifier(format!("{err:#}"))
    }

    /// Fatal errors end the run; the others are handled at step or cycle granularity.
    pub fn is_fatal(&self) -> bool {
        match self {
            TddError::Configuration(_)
            | TddError::Commit { .. }
            | TddError::Workspace(_)
            | TddError::Verifier(_) => true,
            TddError::PolicyViolation { .. } | TddError::Agent { .. } => false,
        }
    }
}

impl From<&CycleFailure> for TddError {
    fn from(failure: &CycleFailure) -> Self {
        TddError::PolicyViolation {
            cycle: failure.cycle,
            role: failure.role,
            attempts: failure.attempts,
            reason: failure.reason.clone(),
        }
    }
}
