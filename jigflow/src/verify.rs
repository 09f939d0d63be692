//! Threshold verification of raw measurements.

use crate::config::{StageId, ThresholdRange, ThresholdTable};
use crate::errors::ErrorKind;
use std::sync::Arc;
use thiserror::Error;

/// Verification failure.
///
/// A missing table entry is a configuration fault, surfaced distinctly from
/// a measurement that is simply out of range; it must never read as a
/// silent pass.
#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    /// No range configured for the key.
    #[error("no threshold configured for {stage}/{test}/{signal}")]
    MissingEntry {
        /// Stage label.
        stage: &'static str,
        /// Test id.
        test: String,
        /// Signal name.
        signal: String,
    },

    /// The value fell outside the configured range.
    #[error("{signal} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        /// Signal name.
        signal: String,
        /// Measured raw value.
        value: i64,
        /// Configured lower bound.
        min: i64,
        /// Configured upper bound.
        max: i64,
    },
}

impl VerifyError {
    /// Taxonomy kind for this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingEntry { .. } => ErrorKind::ConfigurationFault,
            Self::OutOfRange { .. } => ErrorKind::MeasurementOutOfRange,
        }
    }
}

/// Judges raw measurements against the configured limit table.
///
/// A pure function of configuration and input: identical arguments always
/// produce the identical outcome. Comparisons operate on raw counts only;
/// unit conversion is a display concern outside the verification decision.
#[derive(Clone)]
pub struct ThresholdVerifier {
    table: Arc<ThresholdTable>,
}

impl ThresholdVerifier {
    /// Creates a verifier over a shared table.
    #[must_use]
    pub fn new(table: Arc<ThresholdTable>) -> Self {
        Self { table }
    }

    /// Checks one raw value against `{stage, test, signal}`.
    pub fn check(
        &self,
        stage: StageId,
        test: &str,
        signal: &str,
        value: i64,
    ) -> Result<(), VerifyError> {
        let range = self.range(stage, test, signal)?;
        if range.contains(value) {
            Ok(())
        } else {
            Err(VerifyError::OutOfRange {
                signal: signal.to_string(),
                value,
                min: range.min,
                max: range.max,
            })
        }
    }

    /// Looks up the configured range for `{stage, test, signal}`.
    pub fn range(
        &self,
        stage: StageId,
        test: &str,
        signal: &str,
    ) -> Result<ThresholdRange, VerifyError> {
        self.table.lookup(stage, test, signal).ok_or_else(|| VerifyError::MissingEntry {
            stage: stage.label(),
            test: test.to_string(),
            signal: signal.to_string(),
        })
    }

    /// All configured signals for `{stage, test}`, in stable order.
    #[must_use]
    pub fn signals(&self, stage: StageId, test: &str) -> Vec<String> {
        self.table.signals_for(stage, test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> ThresholdVerifier {
        let mut table = ThresholdTable::new();
        table.insert(
            StageId::Three,
            "guard_2_1/before_relay",
            "vout",
            ThresholdRange { min: 1000, max: 2000 },
        );
        ThresholdVerifier::new(Arc::new(table))
    }

    #[test]
    fn in_range_passes() {
        let v = verifier();
        assert!(v.check(StageId::Three, "guard_2_1/before_relay", "vout", 1500).is_ok());
    }

    #[test]
    fn out_of_range_is_a_measurement_fault() {
        let v = verifier();
        let err = v.check(StageId::Three, "guard_2_1/before_relay", "vout", 2500).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MeasurementOutOfRange);
    }

    #[test]
    fn missing_entry_is_a_configuration_fault() {
        let v = verifier();
        let err = v.check(StageId::Three, "guard_2_1/rsd1", "vout", 1500).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationFault);
    }

    #[test]
    fn verification_is_idempotent() {
        let v = verifier();
        let first = v.check(StageId::Three, "guard_2_1/before_relay", "vout", 1999).is_ok();
        let second = v.check(StageId::Three, "guard_2_1/before_relay", "vout", 1999).is_ok();
        assert_eq!(first, second);

        let first = v.check(StageId::Three, "guard_2_1/before_relay", "vout", 2001).is_err();
        let second = v.check(StageId::Three, "guard_2_1/before_relay", "vout", 2001).is_err();
        assert_eq!(first, second);
    }
}
