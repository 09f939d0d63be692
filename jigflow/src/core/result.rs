//! Test result type with factory methods.

use crate::errors::{ErrorCode, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pass/fail outcome of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The case passed.
    Pass,
    /// The case failed; the result carries a code and kind.
    Fail,
}

/// The outcome of one test case execution.
///
/// `TestResult` is immutable once created. Failed results always carry a
/// display [`ErrorCode`] and an [`ErrorKind`]; passing results carry neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Pass or fail.
    pub outcome: Outcome,

    /// Display code for failed results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,

    /// Taxonomy kind for failed results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,

    /// Free-text message shown in logs and remote records.
    pub message: String,

    /// Structured per-step data (measured averages, selected ids, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// When the result was produced.
    pub at: DateTime<Utc>,
}

impl TestResult {
    /// Creates a passing result.
    #[must_use]
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Pass,
            code: None,
            kind: None,
            message: message.into(),
            data: None,
            at: Utc::now(),
        }
    }

    /// Creates a failing result with the code's default kind.
    #[must_use]
    pub fn fail(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::fail_with_kind(code, code.kind(), message)
    }

    /// Creates a failing result with an explicit kind.
    ///
    /// Used where a single display code covers several taxonomy kinds, e.g.
    /// a communication failure that was a timeout rather than a malformed
    /// frame.
    #[must_use]
    pub fn fail_with_kind(code: ErrorCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Fail,
            code: Some(code),
            kind: Some(kind),
            message: message.into(),
            data: None,
            at: Utc::now(),
        }
    }

    /// Attaches structured step data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// True if the case passed.
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    /// The numeric display code, `0` for passing results.
    #[must_use]
    pub fn code_value(&self) -> u16 {
        self.code.map_or(0, ErrorCode::value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_carries_no_code() {
        let r = TestResult::pass("ok");
        assert!(r.is_pass());
        assert_eq!(r.code, None);
        assert_eq!(r.kind, None);
        assert_eq!(r.code_value(), 0);
    }

    #[test]
    fn fail_defaults_kind_from_code() {
        let r = TestResult::fail(ErrorCode::GATEWAY_NOT_FOUND, "no gateway");
        assert!(!r.is_pass());
        assert_eq!(r.kind, Some(ErrorKind::HardwareAbsence));
        assert_eq!(r.code_value(), 9);
    }

    #[test]
    fn explicit_kind_overrides_default() {
        let r = TestResult::fail_with_kind(
            ErrorCode::DEVICE_COMMUNICATION_FAIL,
            ErrorKind::ProtocolMismatch,
            "bad frame",
        );
        assert_eq!(r.kind, Some(ErrorKind::ProtocolMismatch));
    }
}
