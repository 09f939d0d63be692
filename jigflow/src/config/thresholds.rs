//! Threshold table: named raw-count limit ranges.
//!
//! All limits are expressed in raw ADC counts. Unit conversion never happens
//! here; if a value is ever shown in volts, that conversion is a display
//! concern downstream of the verification decision.

use super::StageId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inclusive `[min, max]` range in raw counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdRange {
    /// Lower bound, inclusive.
    pub min: i64,
    /// Upper bound, inclusive.
    pub max: i64,
}

impl ThresholdRange {
    /// True if `value` lies within the range.
    #[must_use]
    pub const fn contains(self, value: i64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Limit ranges keyed by `{stage, test id, signal}`.
///
/// The JSON shape mirrors the jig configuration file:
///
/// ```json
/// { "stage3": { "guard_2_1/before_relay": { "vout": { "min": 100, "max": 900 } } } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable {
    stages: HashMap<String, HashMap<String, HashMap<String, ThresholdRange>>>,
}

impl ThresholdTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one range.
    pub fn insert(
        &mut self,
        stage: StageId,
        test: impl Into<String>,
        signal: impl Into<String>,
        range: ThresholdRange,
    ) {
        self.stages
            .entry(stage.label().to_string())
            .or_default()
            .entry(test.into())
            .or_default()
            .insert(signal.into(), range);
    }

    /// Looks up the range for `{stage, test, signal}`.
    #[must_use]
    pub fn lookup(&self, stage: StageId, test: &str, signal: &str) -> Option<ThresholdRange> {
        self.stages
            .get(stage.label())?
            .get(test)?
            .get(signal)
            .copied()
    }

    /// All configured signal names for `{stage, test}`, sorted for stable
    /// verification order.
    #[must_use]
    pub fn signals_for(&self, stage: StageId, test: &str) -> Vec<String> {
        let mut signals: Vec<String> = self
            .stages
            .get(stage.label())
            .and_then(|tests| tests.get(test))
            .map(|ranges| ranges.keys().cloned().collect())
            .unwrap_or_default();
        signals.sort();
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_roundtrip() {
        let mut table = ThresholdTable::new();
        table.insert(StageId::Three, "guard_2_1/rsd1", "vout", ThresholdRange { min: 10, max: 20 });

        let range = table.lookup(StageId::Three, "guard_2_1/rsd1", "vout");
        assert_eq!(range, Some(ThresholdRange { min: 10, max: 20 }));
        assert_eq!(table.lookup(StageId::Two, "guard_2_1/rsd1", "vout"), None);
        assert_eq!(table.lookup(StageId::Three, "guard_2_1/rsd1", "vin1"), None);
    }

    #[test]
    fn signals_are_sorted() {
        let mut table = ThresholdTable::new();
        table.insert(StageId::One, "jig_supply", "v3v3", ThresholdRange { min: 0, max: 1 });
        table.insert(StageId::One, "jig_supply", "v12", ThresholdRange { min: 0, max: 1 });
        assert_eq!(table.signals_for(StageId::One, "jig_supply"), vec!["v12", "v3v3"]);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = ThresholdRange { min: -5, max: 5 };
        assert!(range.contains(-5));
        assert!(range.contains(5));
        assert!(!range.contains(6));
    }
}
