//! Stage configuration: the data that makes stages differ.
//!
//! The state machine itself is stage-agnostic. Everything stage-specific
//! (which self-test cases run, which sequence cases run, how the target is
//! selected, which thresholds apply) arrives through [`StageConfig`].

mod thresholds;

pub use thresholds::{ThresholdRange, ThresholdTable};

use crate::device::{DeviceExpectation, SignalPreference, TargetPolicy};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The three production stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StageId {
    /// Bare-board bring-up (wired programming connection).
    One,
    /// Post-assembly verification (over-the-air).
    Two,
    /// Final check before shipping (over-the-air).
    Three,
}

impl StageId {
    /// Stage number, 1–3.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Stage label used in logs, records and threshold keys.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::One => "stage1",
            Self::Two => "stage2",
            Self::Three => "stage3",
        }
    }
}

impl TryFrom<u8> for StageId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(format!("stage must be 1-3, got {other}")),
        }
    }
}

impl From<StageId> for u8 {
    fn from(stage: StageId) -> Self {
        stage.number()
    }
}

/// Jig peripherals whose presence a self-test case can assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peripheral {
    /// Jig-side ADC sensor.
    AdcSensor,
    /// Debug probe used for wired flashing.
    DebugProbe,
    /// Bridge gateway ("stick").
    Gateway,
    /// Label printer.
    LabelPrinter,
}

/// One configured unit of verification work.
///
/// Case lists are pure data: a stage's behavior is the ordered sequence of
/// these variants, not stage-specific branches inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "case", rename_all = "snake_case")]
pub enum CaseSpec {
    /// GPIO subsystem availability.
    GpioAvailability,
    /// Presence of a jig peripheral.
    PeripheralPresence {
        /// Which peripheral to probe.
        peripheral: Peripheral,
    },
    /// Jig identity matches the configured id.
    JigIdentity,
    /// Jig supply rails against thresholds.
    SupplyVoltage,
    /// Select and bind the unit under test for this sequence run.
    BindTarget,
    /// Fetch latest bootloader + application artifacts.
    FirmwareDownload,
    /// Erase and flash the bound device.
    FirmwareUpload,
    /// Liveness/info round-trip with the bound device.
    CommunicationCheck,
    /// Switch the jig power relay.
    RelayControl {
        /// Desired relay state.
        on: bool,
    },
    /// Command the device's RSD channels into a mask state.
    OutputState {
        /// RSD channel 1 state.
        rsd1: bool,
        /// RSD channel 2 state.
        rsd2: bool,
    },
    /// Dump raw ADC samples and verify them against thresholds.
    AdcVerification {
        /// Check label; combined with the board type to form the threshold
        /// test id (e.g. `guard_2_1/before_relay`).
        check: String,
    },
    /// Pin the duty to fractions of max and verify output tracks baseline.
    DutyRamp,
    /// Command and verify the shipping mesh configuration.
    MeshFinalize,
    /// Emit the product label.
    LabelEmit,
}

/// Label fields carried in configuration; rendering is external.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Model designation printed on the label.
    pub model: String,
    /// Certifying company name.
    pub authenticator: String,
    /// Certification number (may contain a newline for two-line layouts).
    pub kc_no: String,
    /// Base URL for the QR payload; the combined device id is appended.
    pub qr_base_url: String,
    /// Printer queue name.
    #[serde(default)]
    pub printer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStageConfig {
    jig_id: String,
    vendor: String,
    product: String,
    stage: u8,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    adc_scales: Option<[f64; 4]>,
    discovery_window_ms: Option<u64>,
    protocol_timeout_ms: Option<u64>,
    #[serde(default)]
    adc_dump_window_ms: Option<u64>,
    #[serde(default)]
    config_poll_interval_ms: Option<u64>,
    #[serde(default)]
    self_test: Option<Vec<CaseSpec>>,
    #[serde(default)]
    sequence: Option<Vec<CaseSpec>>,
    #[serde(default)]
    policy: Option<TargetPolicy>,
    #[serde(default)]
    thresholds: ThresholdTable,
    #[serde(default)]
    label: Option<LabelConfig>,
}

/// Everything the engine needs to run one stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Jig identifier (also the remote record relation).
    pub jig_id: String,
    /// Expected device vendor name.
    pub vendor: String,
    /// Expected device product name.
    pub product: String,
    /// Which stage this jig runs.
    pub stage: StageId,
    /// Timezone policy recorded at boot.
    pub timezone: String,
    /// Per-channel ADC scale calibration, carried for downstream display
    /// only; every verification decision stays in raw counts.
    pub adc_scales: [f64; 4],
    /// Ordered self-test case list.
    pub self_test: Vec<CaseSpec>,
    /// Ordered production sequence case list.
    pub sequence: Vec<CaseSpec>,
    /// Device-targeting policy for the sequence.
    pub policy: TargetPolicy,
    /// Raw-count limit ranges.
    pub thresholds: ThresholdTable,
    /// Beacon discovery window. Required; no compiled-in default.
    pub discovery_window: Duration,
    /// Per-round-trip protocol timeout. Required; no compiled-in default.
    pub protocol_timeout: Duration,
    /// Raw ADC collection window.
    pub adc_dump_window: Duration,
    /// Remote configuration poll interval for the watcher.
    pub config_poll_interval: Duration,
    /// Label fields, when the stage emits labels.
    pub label: Option<LabelConfig>,
}

impl StageConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        let parsed: RawStageConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::InvalidJson {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_raw(parsed)
    }

    /// Parses and validates a configuration document.
    ///
    /// Discovery window and protocol timeout must be present and non-zero;
    /// case lists and the targeting policy fall back to the stage's
    /// documented defaults when omitted.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawStageConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::InvalidValue {
                key: "<root>".to_string(),
                reason: e.to_string(),
            })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawStageConfig) -> Result<Self, ConfigError> {
        let stage = StageId::try_from(raw.stage).map_err(|reason| ConfigError::InvalidValue {
            key: "stage".to_string(),
            reason,
        })?;

        let discovery_window_ms = raw
            .discovery_window_ms
            .ok_or_else(|| ConfigError::MissingKey("discovery_window_ms".to_string()))?;
        let protocol_timeout_ms = raw
            .protocol_timeout_ms
            .ok_or_else(|| ConfigError::MissingKey("protocol_timeout_ms".to_string()))?;
        if protocol_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "protocol_timeout_ms".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }

        Ok(Self {
            self_test: raw.self_test.unwrap_or_else(|| default_self_test(stage)),
            sequence: raw.sequence.unwrap_or_else(|| default_sequence(stage)),
            policy: raw.policy.unwrap_or_else(|| default_policy(stage)),
            jig_id: raw.jig_id,
            vendor: raw.vendor,
            product: raw.product,
            stage,
            timezone: raw.timezone.unwrap_or_else(|| "Asia/Seoul".to_string()),
            adc_scales: raw.adc_scales.unwrap_or([6.0, 2.0, 1.0, 1.0]),
            thresholds: raw.thresholds,
            discovery_window: Duration::from_millis(discovery_window_ms),
            protocol_timeout: Duration::from_millis(protocol_timeout_ms),
            adc_dump_window: Duration::from_millis(raw.adc_dump_window_ms.unwrap_or(1000)),
            config_poll_interval: Duration::from_millis(
                raw.config_poll_interval_ms.unwrap_or(3000),
            ),
            label: raw.label,
        })
    }

    /// The board type used in threshold test ids and device filtering.
    ///
    /// In-house vendors key thresholds by product alone; third-party boards
    /// use `vendor_product`.
    #[must_use]
    pub fn board_type(&self) -> String {
        if matches!(self.vendor.as_str(), "conalog" | "nanoom") {
            self.product.clone()
        } else {
            format!("{}_{}", self.vendor, self.product)
        }
    }

    /// The vendor/product expectation used to filter beacon candidates.
    #[must_use]
    pub fn expectation(&self) -> DeviceExpectation {
        DeviceExpectation {
            vendor: self.vendor.clone(),
            product: self.product.clone(),
        }
    }
}

/// Documented self-test list for a stage.
#[must_use]
pub fn default_self_test(stage: StageId) -> Vec<CaseSpec> {
    match stage {
        StageId::One => vec![
            CaseSpec::GpioAvailability,
            CaseSpec::PeripheralPresence { peripheral: Peripheral::AdcSensor },
            CaseSpec::JigIdentity,
            CaseSpec::PeripheralPresence { peripheral: Peripheral::DebugProbe },
            CaseSpec::PeripheralPresence { peripheral: Peripheral::Gateway },
        ],
        StageId::Two => vec![
            CaseSpec::GpioAvailability,
            CaseSpec::JigIdentity,
            CaseSpec::PeripheralPresence { peripheral: Peripheral::Gateway },
        ],
        StageId::Three => vec![
            CaseSpec::GpioAvailability,
            CaseSpec::JigIdentity,
            CaseSpec::PeripheralPresence { peripheral: Peripheral::Gateway },
            CaseSpec::PeripheralPresence { peripheral: Peripheral::LabelPrinter },
        ],
    }
}

/// Documented production sequence for a stage.
#[must_use]
pub fn default_sequence(stage: StageId) -> Vec<CaseSpec> {
    match stage {
        StageId::One => vec![
            CaseSpec::SupplyVoltage,
            CaseSpec::BindTarget,
            CaseSpec::FirmwareDownload,
            CaseSpec::FirmwareUpload,
            CaseSpec::CommunicationCheck,
            CaseSpec::AdcVerification { check: "initial".to_string() },
        ],
        StageId::Two => vec![
            CaseSpec::BindTarget,
            CaseSpec::CommunicationCheck,
            CaseSpec::RelayControl { on: true },
            CaseSpec::AdcVerification { check: "before_relay".to_string() },
            CaseSpec::DutyRamp,
            CaseSpec::OutputState { rsd1: true, rsd2: false },
            CaseSpec::AdcVerification { check: "rsd1".to_string() },
            CaseSpec::OutputState { rsd1: false, rsd2: true },
            CaseSpec::AdcVerification { check: "rsd2".to_string() },
            CaseSpec::OutputState { rsd1: true, rsd2: true },
            CaseSpec::AdcVerification { check: "rsd1_2".to_string() },
            CaseSpec::OutputState { rsd1: false, rsd2: false },
            CaseSpec::RelayControl { on: false },
        ],
        StageId::Three => vec![
            CaseSpec::BindTarget,
            CaseSpec::CommunicationCheck,
            CaseSpec::RelayControl { on: true },
            CaseSpec::AdcVerification { check: "before_relay".to_string() },
            CaseSpec::OutputState { rsd1: true, rsd2: false },
            CaseSpec::AdcVerification { check: "rsd1".to_string() },
            CaseSpec::OutputState { rsd1: false, rsd2: true },
            CaseSpec::AdcVerification { check: "rsd2".to_string() },
            CaseSpec::OutputState { rsd1: false, rsd2: false },
            CaseSpec::AdcVerification { check: "after_relay".to_string() },
            CaseSpec::MeshFinalize,
            CaseSpec::LabelEmit,
            CaseSpec::RelayControl { on: false },
        ],
    }
}

/// Documented targeting policy for a stage.
///
/// Stage 1 programs over the wire. Stage 2 selects the weakest matching
/// beacon, stage 3 the strongest; the asymmetry is intentional and must not
/// be unified.
#[must_use]
pub fn default_policy(stage: StageId) -> TargetPolicy {
    match stage {
        StageId::One => TargetPolicy::Wired,
        StageId::Two => TargetPolicy::Beacon { preference: SignalPreference::Weakest },
        StageId::Three => TargetPolicy::Beacon { preference: SignalPreference::Strongest },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"{
        "jig_id": "jig-07",
        "vendor": "conalog",
        "product": "guard_2_1",
        "stage": 3,
        "discovery_window_ms": 1000,
        "protocol_timeout_ms": 3000
    }"#;

    #[test]
    fn minimal_config_fills_stage_defaults() {
        let cfg = StageConfig::from_json(MINIMAL).unwrap();
        assert_eq!(cfg.stage, StageId::Three);
        assert_eq!(cfg.policy, default_policy(StageId::Three));
        assert_eq!(cfg.self_test, default_self_test(StageId::Three));
        assert_eq!(cfg.sequence, default_sequence(StageId::Three));
        assert_eq!(cfg.discovery_window, Duration::from_millis(1000));
        assert_eq!(cfg.protocol_timeout, Duration::from_millis(3000));
    }

    #[test]
    fn discovery_window_is_required() {
        let raw = r#"{
            "jig_id": "jig-07", "vendor": "conalog", "product": "guard_2_1",
            "stage": 2, "protocol_timeout_ms": 3000
        }"#;
        let err = StageConfig::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("discovery_window_ms"));
    }

    #[test]
    fn protocol_timeout_is_required() {
        let raw = r#"{
            "jig_id": "jig-07", "vendor": "conalog", "product": "guard_2_1",
            "stage": 2, "discovery_window_ms": 1000
        }"#;
        let err = StageConfig::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("protocol_timeout_ms"));
    }

    #[test]
    fn stage_out_of_range_rejected() {
        let raw = r#"{
            "jig_id": "j", "vendor": "conalog", "product": "guard_2_1",
            "stage": 4, "discovery_window_ms": 1, "protocol_timeout_ms": 1
        }"#;
        assert!(StageConfig::from_json(raw).is_err());
    }

    #[test]
    fn board_type_folds_third_party_vendor() {
        let mut cfg = StageConfig::from_json(MINIMAL).unwrap();
        assert_eq!(cfg.board_type(), "guard_2_1");
        cfg.vendor = "stick".to_string();
        assert_eq!(cfg.board_type(), "stick_guard_2_1");
    }

    #[test]
    fn case_specs_deserialize_tagged() {
        let spec: CaseSpec =
            serde_json::from_str(r#"{"case": "output_state", "rsd1": true, "rsd2": false}"#)
                .unwrap();
        assert_eq!(spec, CaseSpec::OutputState { rsd1: true, rsd2: false });
    }

    #[test]
    fn stage2_and_stage3_policies_stay_asymmetric() {
        assert_eq!(
            default_policy(StageId::Two),
            TargetPolicy::Beacon { preference: SignalPreference::Weakest }
        );
        assert_eq!(
            default_policy(StageId::Three),
            TargetPolicy::Beacon { preference: SignalPreference::Strongest }
        );
    }
}
