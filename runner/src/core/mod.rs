//! Deterministic, pure logic shared by the supervisor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod commits;
pub mod gate;
pub mod patch;
pub mod test_output;
pub mod types;
