//! Commit sequencing and message templates.
//!
//! Within a cycle a test checkpoint must come first, an implementation
//! checkpoint second and an optional refactor checkpoint last. Cycles never
//! interleave: once a later cycle records a checkpoint, earlier cycles are closed.

use crate::core::types::{CommitKind, CommitRecord};

/// Conventional commit message for a checkpoint.
pub fn commit_message(kind: CommitKind, cycle: u32) -> String {
    match kind {
        CommitKind::Test => format!("test: add failing test for cycle {cycle}"),
        CommitKind::Implementation => format!("feat: implement code to pass test in cycle {cycle}"),
        CommitKind::Refactor => format!("refactor: improve code quality after cycle {cycle}"),
    }
}

/// Tracks recorded checkpoints and rejects out-of-order ones.
#[derive(Debug, Clone, Default)]
pub struct CommitSequence {
    records: Vec<CommitRecord>,
}

impl CommitSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `kind` may be recorded next for `cycle`.
    pub fn check_next(&self, cycle: u32, kind: CommitKind) -> Result<(), String> {
        let Some(last) = self.records.last() else {
            return match kind {
                CommitKind::Test => Ok(()),
                other => Err(format!(
                    "cycle {cycle}: {other} checkpoint before any test checkpoint"
                )),
            };
        };
        if cycle < last.cycle {
            return Err(format!(
                "cycle {cycle} checkpoint after cycle {} was recorded",
                last.cycle
            ));
        }
        if cycle > last.cycle {
            return match kind {
                CommitKind::Test => Ok(()),
                other => Err(format!(
                    "cycle {cycle}: {other} checkpoint must follow a test checkpoint"
                )),
            };
        }
        let expected = match last.kind {
            CommitKind::Test => CommitKind::Implementation,
            CommitKind::Implementation => CommitKind::Refactor,
            CommitKind::Refactor => {
                return Err(format!("cycle {cycle} already closed by its refactor checkpoint"));
            }
        };
        if kind == expected {
            Ok(())
        } else {
            Err(format!(
                "cycle {cycle}: expected {expected} checkpoint after {}, got {kind}",
                last.kind
            ))
        }
    }

    /// Record a checkpoint that was accepted by [`CommitSequence::check_next`].
    pub fn record(&mut self, record: CommitRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[CommitRecord] {
        &self.records
    }
}
