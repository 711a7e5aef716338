//! Side-effecting adapters: filesystem, git, child processes and agent backends.

pub mod agent;
pub mod committer;
pub mod config;
pub mod cycle_log;
pub mod git;
pub mod kata;
pub mod process;
pub mod prompt;
pub mod verifier;
pub mod workspace;
