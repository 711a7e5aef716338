//! Verification gate: decides whether a step may advance.
//!
//! | role        | success condition                      | failure, retries left | exhausted |
//! |-------------|----------------------------------------|-----------------------|-----------|
//! | tester      | a new test fails, others unaffected    | retry                 | abort     |
//! | implementer | full suite passes, red tests now pass  | retry                 | abort     |
//! | refactorer  | full suite still passes                | discard (no retry)    | discard   |
//!
//! `before` is the report for the last checkpointed state, if one exists.
//! No step may remove a test that passed at the checkpoint, and the
//! implementer may not remove the tests it was asked to turn green. When the
//! checkpoint has no per-test results the gate falls back to the suite-level
//! outcome.

use crate::core::types::{Role, TestStatus, VerifyReport};

/// What the supervisor does next with a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Advance,
    Retry,
    Discard,
    Abort,
}

/// Gate decision plus the facts the supervisor needs to act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: GateDecision,
    /// Why the success condition was not met (None on advance).
    pub reason: Option<String>,
    /// Tests that fail now and did not fail at the checkpoint.
    pub new_failures: Vec<String>,
}

/// Evaluate a step's verifier result.
///
/// `retries_used` counts the retries already spent on this step (0 on the first attempt).
pub fn gate(
    role: Role,
    before: Option<&VerifyReport>,
    after: &VerifyReport,
    retries_used: u32,
    max_retries: u32,
) -> Verdict {
    let new_failures = new_failures(before, after);
    match check(role, before, after, &new_failures) {
        Ok(()) => Verdict {
            decision: GateDecision::Advance,
            reason: None,
            new_failures,
        },
        Err(reason) => Verdict {
            decision: on_failure(role, retries_used, max_retries),
            reason: Some(reason),
            new_failures,
        },
    }
}

/// Decision for a failed attempt, whether it failed the gate or never reached it.
pub fn on_failure(role: Role, retries_used: u32, max_retries: u32) -> GateDecision {
    match role {
        Role::Refactorer => GateDecision::Discard,
        Role::Tester | Role::Implementer if retries_used < max_retries => GateDecision::Retry,
        Role::Tester | Role::Implementer => GateDecision::Abort,
    }
}

fn check(
    role: Role,
    before: Option<&VerifyReport>,
    after: &VerifyReport,
    new_failures: &[String],
) -> Result<(), String> {
    if after.timed_out {
        return Err("test suite timed out".to_string());
    }
    match role {
        Role::Tester => check_red(before, after, new_failures),
        Role::Implementer => {
            check_green(after)?;
            check_nothing_removed(before, after)?;
            check_turned_green(before, after)
        }
        Role::Refactorer => {
            check_green(after)?;
            check_nothing_removed(before, after)
        }
    }
}

fn check_red(
    before: Option<&VerifyReport>,
    after: &VerifyReport,
    new_failures: &[String],
) -> Result<(), String> {
    if after.passed {
        return Err(
            "the new test already passes; write a test for behavior that is missing".to_string(),
        );
    }
    check_nothing_removed(before, after)?;
    if after.tests.is_empty() {
        // No per-test results: the suite failing is all the evidence we get.
        return Ok(());
    }
    if new_failures.is_empty() {
        return Err("no newly failing test was introduced".to_string());
    }
    let regressions = regressions(before, after);
    if !regressions.is_empty() {
        return Err(format!(
            "previously passing tests now fail: {}",
            regressions.join(", ")
        ));
    }
    Ok(())
}

fn check_green(after: &VerifyReport) -> Result<(), String> {
    if after.passed {
        return Ok(());
    }
    let failing: Vec<&str> = after.failing().collect();
    if failing.is_empty() {
        Err("test suite failed".to_string())
    } else {
        Err(format!("failing tests: {}", failing.join(", ")))
    }
}

/// Every test passing at the checkpoint must still be reported.
///
/// An empty `after` list counts as removal: the checkpoint proves the output
/// carries per-test lines.
fn check_nothing_removed(before: Option<&VerifyReport>, after: &VerifyReport) -> Result<(), String> {
    let Some(before) = before else {
        return Ok(());
    };
    let missing: Vec<&str> = before
        .passing()
        .filter(|test| after.status_of(test).is_none())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("tests were removed: {}", missing.join(", ")))
    }
}

/// Every test failing at the checkpoint must now be reported as passed.
fn check_turned_green(before: Option<&VerifyReport>, after: &VerifyReport) -> Result<(), String> {
    let Some(before) = before else {
        return Ok(());
    };
    let missing: Vec<&str> = before
        .failing()
        .filter(|test| after.status_of(test) != Some(TestStatus::Passed))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "tests that had to pass are missing or not passing: {}",
            missing.join(", ")
        ))
    }
}

fn new_failures(before: Option<&VerifyReport>, after: &VerifyReport) -> Vec<String> {
    after
        .failing()
        .filter(|test| {
            before.and_then(|b| b.status_of(test)) != Some(TestStatus::Failed)
        })
        .map(str::to_string)
        .collect()
}

fn regressions(before: Option<&VerifyReport>, after: &VerifyReport) -> Vec<String> {
    let Some(before) = before else {
        return Vec::new();
    };
    before
        .passing()
        .filter(|test| after.status_of(test) == Some(TestStatus::Failed))
        .map(str::to_string)
        .collect()
}
