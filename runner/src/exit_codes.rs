//! Stable exit codes for the `agentic-tdd` CLI.

use crate::core::types::{RunResult, StopReason};

/// Requirements satisfied, cycle budget reached, or dry run validated.
pub const OK: i32 = 0;
/// Configuration or setup failed before any cycle started.
pub const INVALID: i32 = 1;
/// A fatal error aborted the run.
pub const ABORTED: i32 = 2;
/// Fail-fast stopped the run after a failed cycle.
pub const CYCLE_FAILED: i32 = 3;

/// Exit code for a finished run.
pub fn for_result(result: &RunResult) -> i32 {
    match result.stop {
        StopReason::RequirementsSatisfied | StopReason::MaxCyclesReached | StopReason::DryRun => OK,
        StopReason::CycleFailed { .. } => CYCLE_FAILED,
        StopReason::Aborted { .. } => ABORTED,
    }
}
