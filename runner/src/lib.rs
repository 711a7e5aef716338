//! Agentic test-driven development cycle orchestrator.
//!
//! A run drives role-specialized agents through red → green → refactor cycles
//! against a kata workspace, gating every step on the test suite and recording
//! every verified state as a git checkpoint. The crate is split the same way
//! throughout:
//!
//! - **[`core`]**: pure, deterministic logic (gate, commit sequencing, patch
//!   validation, test-output parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: side-effecting adapters (filesystem, git, child processes, agent
//!   and verifier backends). Isolated behind traits so tests can script them.
//!
//! [`supervisor`] owns the cycle state machine; [`setup`] turns CLI options into
//! a validated session and prepares the workspace.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod setup;
pub mod supervisor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
