//! Extraction of per-test results from common test runner output.
//!
//! Recognized line formats:
//! - `cargo test`: `test math::adds ... ok`
//! - `pytest -v`: `tests/test_add.py::test_add PASSED [ 50%]`
//! - `go test -v`: `--- FAIL: TestAdd (0.00s)`
//!
//! Unrecognized lines are ignored, so unknown runners yield an empty map and
//! the gate falls back to the suite exit status.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::TestStatus;

static CARGO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^test (\S+) \.\.\. (ok|FAILED|ignored)\b").expect("cargo test pattern")
});
static PYTEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+::\S+) (PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\b").expect("pytest pattern")
});
static GO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*--- (PASS|FAIL|SKIP): (\S+)").expect("go test pattern")
});

/// Parse per-test results. A test reported more than once keeps its worst status.
pub fn parse_test_results(output: &str) -> BTreeMap<String, TestStatus> {
    let mut results = BTreeMap::new();
    for line in output.lines() {
        let line = line.trim_end();
        if let Some((name, status)) = parse_line(line) {
            results
                .entry(name)
                .and_modify(|existing| *existing = worst(*existing, status))
                .or_insert(status);
        }
    }
    results
}

fn parse_line(line: &str) -> Option<(String, TestStatus)> {
    if let Some(caps) = CARGO_RE.captures(line) {
        let status = match &caps[2] {
            "ok" => TestStatus::Passed,
            "FAILED" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        };
        return Some((caps[1].to_string(), status));
    }
    if let Some(caps) = PYTEST_RE.captures(line) {
        let status = match &caps[2] {
            "PASSED" | "XFAIL" => TestStatus::Passed,
            "SKIPPED" => TestStatus::Skipped,
            _ => TestStatus::Failed,
        };
        return Some((caps[1].to_string(), status));
    }
    if let Some(caps) = GO_RE.captures(line) {
        let status = match &caps[1] {
            "PASS" => TestStatus::Passed,
            "FAIL" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        };
        return Some((caps[2].to_string(), status));
    }
    None
}

fn worst(a: TestStatus, b: TestStatus) -> TestStatus {
    match (a, b) {
        (TestStatus::Failed, _) | (_, TestStatus::Failed) => TestStatus::Failed,
        (TestStatus::Passed, _) | (_, TestStatus::Passed) => TestStatus::Passed,
        _ => TestStatus::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cargo_test_output() {
        let out = "\
running 3 tests
test math::adds ... ok
test math::subtracts ... FAILED
test math::slow ... ignored

test result: FAILED. 1 passed; 1 failed; 1 ignored";
        let results = parse_test_results(out);
        assert_eq!(results.len(), 3);
        assert_eq!(results["math::adds"], TestStatus::Passed);
        assert_eq!(results["math::subtracts"], TestStatus::Failed);
        assert_eq!(results["math::slow"], TestStatus::Skipped);
    }

    #[test]
    fn parses_pytest_verbose_output() {
        let out = "\
tests/test_add.py::test_add_two PASSED                                   [ 50%]
tests/test_add.py::test_add_many FAILED                                  [100%]
tests/test_io.py::test_broken ERROR";
        let results = parse_test_results(out);
        assert_eq!(results["tests/test_add.py::test_add_two"], TestStatus::Passed);
        assert_eq!(results["tests/test_add.py::test_add_many"], TestStatus::Failed);
        assert_eq!(results["tests/test_io.py::test_broken"], TestStatus::Failed);
    }

    #[test]
    fn parses_go_verbose_output_including_subtests() {
        let out = "\
=== RUN   TestAdd
--- PASS: TestAdd (0.00s)
=== RUN   TestSplit
    --- FAIL: TestSplit/empty (0.00s)
--- FAIL: TestSplit (0.00s)";
        let results = parse_test_results(out);
        assert_eq!(results["TestAdd"], TestStatus::Passed);
        assert_eq!(results["TestSplit/empty"], TestStatus::Failed);
        assert_eq!(results["TestSplit"], TestStatus::Failed);
    }

    #[test]
    fn repeated_test_keeps_failure() {
        let out = "test a ... FAILED\ntest a ... ok";
        assert_eq!(parse_test_results(out)["a"], TestStatus::Failed);
    }

    #[test]
    fn unknown_output_yields_no_results() {
        assert!(parse_test_results("Ran 2 tests in 0.001s\n\nOK").is_empty());
    }
}
