// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test statuses and per-status counters.

use crate::errors::StatusParseError;
use std::{fmt, str::FromStr};

/// The kind of a [`TestStatus`].
///
/// The order of the variants is the display order used by counter summaries.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TestStatusKind {
    /// The test ran to completion and passed.
    Passed,
    /// The test ran to completion and failed.
    Failed,
    /// The test could not be run to completion.
    Error,
    /// The test has not been run.
    NotRun,
}

impl TestStatusKind {
    /// All kinds, in display order.
    pub const ALL: [TestStatusKind; 4] = [
        TestStatusKind::Passed,
        TestStatusKind::Failed,
        TestStatusKind::Error,
        TestStatusKind::NotRun,
    ];

    /// Returns the leading keyword used in the one-line serialized form.
    pub fn keyword(self) -> &'static str {
        match self {
            TestStatusKind::Passed => "Passed",
            TestStatusKind::Failed => "Failed",
            TestStatusKind::Error => "Error",
            TestStatusKind::NotRun => "Not_run",
        }
    }
}

impl fmt::Display for TestStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// The final status of a test or section: a kind plus a free-form reason.
///
/// A status is serialized as the kind's keyword, a period, and the reason
/// text: `Passed. OK`. The reason never contains newlines.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestStatus {
    /// The status kind.
    pub kind: TestStatusKind,
    /// Free-form explanation, possibly empty.
    pub reason: String,
}

impl TestStatus {
    /// Creates a new status, flattening any newlines in the reason.
    pub fn new(kind: TestStatusKind, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.contains(['\n', '\r']) {
            reason = reason
                .chars()
                .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
                .collect();
        }
        Self { kind, reason }
    }

    /// Creates a passed status.
    pub fn passed(reason: impl Into<String>) -> Self {
        Self::new(TestStatusKind::Passed, reason)
    }

    /// Creates a failed status.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(TestStatusKind::Failed, reason)
    }

    /// Creates an error status.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(TestStatusKind::Error, reason)
    }

    /// Creates a not-run status.
    pub fn not_run(reason: impl Into<String>) -> Self {
        Self::new(TestStatusKind::NotRun, reason)
    }

    /// Returns true if `self` and `other` have the same kind, ignoring the
    /// reason text.
    pub fn same_kind(&self, other: &TestStatus) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}.", self.kind.keyword())
        } else {
            write!(f, "{}. {}", self.kind.keyword(), self.reason)
        }
    }
}

impl FromStr for TestStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (keyword, rest) = match s.split_once('.') {
            Some((keyword, rest)) => (keyword, rest.strip_prefix(' ').unwrap_or(rest)),
            None => return Err(StatusParseError::new(s)),
        };
        let kind = match keyword {
            "Passed" => TestStatusKind::Passed,
            "Failed" => TestStatusKind::Failed,
            "Error" => TestStatusKind::Error,
            "Not_run" => TestStatusKind::NotRun,
            _ => return Err(StatusParseError::new(s)),
        };
        Ok(TestStatus::new(kind, rest))
    }
}

/// Aggregate per-status counts for a subtree.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatusCounters {
    /// Number of passed tests.
    pub passed: usize,
    /// Number of failed tests.
    pub failed: usize,
    /// Number of errored tests.
    pub error: usize,
    /// Number of tests that have not run (including records with no status
    /// set yet).
    pub not_run: usize,
}

impl StatusCounters {
    /// Records one test with the given status kind.
    pub fn record(&mut self, kind: TestStatusKind) {
        match kind {
            TestStatusKind::Passed => self.passed += 1,
            TestStatusKind::Failed => self.failed += 1,
            TestStatusKind::Error => self.error += 1,
            TestStatusKind::NotRun => self.not_run += 1,
        }
    }

    /// Returns the count for one kind.
    pub fn count(&self, kind: TestStatusKind) -> usize {
        match kind {
            TestStatusKind::Passed => self.passed,
            TestStatusKind::Failed => self.failed,
            TestStatusKind::Error => self.error,
            TestStatusKind::NotRun => self.not_run,
        }
    }

    /// Returns the sum of all counts.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.error + self.not_run
    }

    /// Adds another set of counters into this one.
    pub fn add(&mut self, other: &StatusCounters) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.error += other.error;
        self.not_run += other.not_run;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(TestStatus::passed("OK"), "Passed. OK"; "passed with reason")]
    #[test_case(TestStatus::failed(""), "Failed."; "failed without reason")]
    #[test_case(TestStatus::not_run("new test"), "Not_run. new test"; "not run")]
    fn display_round_trip(status: TestStatus, expected: &str) {
        assert_eq!(status.to_string(), expected);
        let parsed: TestStatus = expected.parse().unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn parse_rejects_unknown_keyword() {
        let err = "Skipped. whatever".parse::<TestStatus>().unwrap_err();
        assert!(err.to_string().contains("Skipped"));
        "no keyword at all".parse::<TestStatus>().unwrap_err();
    }

    #[test]
    fn reason_newlines_are_flattened() {
        let status = TestStatus::failed("line one\nline two");
        assert_eq!(status.reason, "line one line two");
    }

    #[test]
    fn counters_sum() {
        let mut counters = StatusCounters::default();
        counters.record(TestStatusKind::Passed);
        counters.record(TestStatusKind::Passed);
        counters.record(TestStatusKind::Failed);
        counters.record(TestStatusKind::NotRun);
        assert_eq!(counters.total(), 4);
        assert_eq!(counters.count(TestStatusKind::Passed), 2);

        let mut other = StatusCounters::default();
        other.record(TestStatusKind::Error);
        counters.add(&other);
        assert_eq!(counters.total(), 5);
        assert_eq!(counters.error, 1);
    }
}
