//! Phase-scoped aggregation of step results.

use super::{Outcome, TestResult};
use crate::config::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which phase a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Hardware self-test after boot or fail-acknowledge.
    SelfTest,
    /// Button-triggered production sequence.
    Sequence,
}

impl Phase {
    /// Label used in remote records: `"self"` for the self-test, the stage
    /// name (`"stage1"`…) for the sequence.
    #[must_use]
    pub fn label(self, stage: StageId) -> String {
        match self {
            Self::SelfTest => "self".to_string(),
            Self::Sequence => stage.label().to_string(),
        }
    }
}

/// One step's entry inside an aggregate, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Configured case name.
    pub case: String,
    /// The immutable step result.
    pub result: TestResult,
}

/// Boot context captured once per process, attached to the first self-test
/// aggregate rather than pushed on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootRecord {
    /// Jig identifier.
    pub jig_id: String,
    /// Expected device vendor.
    pub vendor: String,
    /// Expected device product.
    pub product: String,
    /// Configured timezone policy.
    pub timezone: String,
    /// Per-channel ADC scale calibration in effect.
    pub adc_scales: [f64; 4],
    /// UTC time the boot completed.
    pub booted_at: DateTime<Utc>,
}

/// Sealed, phase-scoped collection of step outcomes.
///
/// Produced by [`ResultAggregator::seal`](crate::report::ResultAggregator::seal)
/// exactly once per phase run and handed to the log sink as a single unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// The phase this record covers.
    pub phase: Phase,
    /// Stage the jig was configured for.
    pub stage: StageId,
    /// Overall display code: `0` on pass, the first failing step's code
    /// otherwise.
    pub code: u16,
    /// Lower 4-byte device id (8 hex chars) when a target was bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Upper 2-byte id learned from the info response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_id: Option<u16>,
    /// Step records in configured execution order.
    pub steps: Vec<StepRecord>,
    /// Boot context, present on the first self-test aggregate only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot: Option<BootRecord>,
}

impl AggregatedResult {
    /// True if every recorded step passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.code == 0
    }

    /// The first failing step, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.result.outcome == Outcome::Fail)
    }

    /// `"Success"` or `"Failed(<first failing case>)"`.
    #[must_use]
    pub fn message(&self) -> String {
        match self.first_failure() {
            None => "Success".to_string(),
            Some(step) => format!("Failed({})", step.case),
        }
    }

    /// Combined 12-hex-char device id: upper 2 bytes + lower 4 bytes.
    ///
    /// Falls back to the zero-padded lower id when the upper id was never
    /// learned (e.g. a stage-1 run that failed before the info response).
    #[must_use]
    pub fn combined_device_id(&self) -> String {
        let lower = self
            .device_id
            .as_deref()
            .unwrap_or("")
            .trim_start_matches("0x")
            .trim_start_matches("0X")
            .to_uppercase();
        match self.upper_id {
            Some(upper) => format!("{upper:04X}{lower:0>8}"),
            None => format!("{lower:0>12}"),
        }
    }

    /// Serialises the record into the remote sink's log shape.
    #[must_use]
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({
            "test": self.phase.label(self.stage),
            "code": self.code,
            "details": self.steps.iter().map(|s| serde_json::json!({
                "case": s.case,
                "code": s.result.code_value(),
                "parameter": s.result.data.clone().unwrap_or_else(
                    || serde_json::json!({ "log": s.result.message })),
            })).collect::<Vec<_>>(),
            "boot_data": self.boot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use pretty_assertions::assert_eq;

    fn sealed(steps: Vec<StepRecord>, code: u16) -> AggregatedResult {
        AggregatedResult {
            phase: Phase::Sequence,
            stage: StageId::Three,
            code,
            device_id: Some("0xAABBCCDD".to_string()),
            upper_id: Some(0x0102),
            steps,
            boot: None,
        }
    }

    #[test]
    fn message_names_first_failing_case() {
        let steps = vec![
            StepRecord { case: "a".into(), result: TestResult::pass("ok") },
            StepRecord {
                case: "b".into(),
                result: TestResult::fail(ErrorCode::ADC_VERIFICATION_FAIL, "bad"),
            },
        ];
        let agg = sealed(steps, 107);
        assert_eq!(agg.message(), "Failed(b)");
        assert!(!agg.passed());
    }

    #[test]
    fn combined_id_prefixes_upper_bytes() {
        let agg = sealed(Vec::new(), 0);
        assert_eq!(agg.combined_device_id(), "0102AABBCCDD");
    }

    #[test]
    fn combined_id_pads_without_upper() {
        let mut agg = sealed(Vec::new(), 0);
        agg.upper_id = None;
        assert_eq!(agg.combined_device_id(), "0000AABBCCDD");
    }

    #[test]
    fn phase_labels() {
        assert_eq!(Phase::SelfTest.label(StageId::One), "self");
        assert_eq!(Phase::Sequence.label(StageId::Two), "stage2");
    }
}
