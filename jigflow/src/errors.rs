//! Error taxonomy and display codes for the stage test engine.
//!
//! Two layers live here. [`ErrorKind`] is the coarse taxonomy the engine
//! reasons about (connectivity vs. protocol timeout vs. out-of-range, and so
//! on). [`ErrorCode`] is the stable numeric code shown on the jig's 7-segment
//! display and pushed with every failed step record; operators read these
//! codes off the fixture, so the numbering is frozen.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure classification used across the engine.
///
/// Every failed [`TestResult`](crate::core::TestResult) carries exactly one
/// kind; the kind decides nothing about control flow (the runner is fail-fast
/// regardless) but keeps remote records queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or remote server unreachable.
    Connectivity,
    /// An expected peripheral was not detected.
    HardwareAbsence,
    /// Jig ID or device type was not the expected one.
    IdentityMismatch,
    /// No protocol response within the configured bound.
    ProtocolTimeout,
    /// A response arrived but was malformed or unexpected.
    ProtocolMismatch,
    /// A measured value fell outside its configured threshold.
    MeasurementOutOfRange,
    /// A required configuration entry (threshold, label data, …) is missing.
    ConfigurationFault,
    /// No matching advertised device within the discovery window.
    DiscoveryFailure,
    /// Flashing or probe operation failed.
    ToolchainFailure,
    /// Printer, artifact store or log sink I/O failed.
    DownstreamIo,
    /// Unanticipated fault caught at the runner boundary.
    Internal,
}

/// Stable numeric code shown on the jig display.
///
/// The numbering mirrors the factory documentation: 1–10 are self-test
/// codes, 1xx are stage-1 sequence codes, 2xx stage-2, 3xx stage-3. 9xx are
/// reserved engine codes that never appear in the stage documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    /// Display/7-segment communication failure.
    pub const DISPLAY_NOT_FOUND: Self = Self(1);
    /// Jig relay failed to initialise or switch.
    pub const RELAY_FAIL: Self = Self(2);
    /// GPIO subsystem unavailable.
    pub const GPIO_UNAVAILABLE: Self = Self(3);
    /// Jig identity missing or not the configured one.
    pub const JIG_ID_MISMATCH: Self = Self(4);
    /// Jig-side ADC sensor not responding.
    pub const ADC_SENSOR_NOT_FOUND: Self = Self(5);
    /// No network connectivity.
    pub const INTERNET_NOT_FOUND: Self = Self(6);
    /// Remote log/config server unreachable.
    pub const LOG_SERVER_UNREACHABLE: Self = Self(7);
    /// Debug probe (flashing adapter) not found.
    pub const DEBUG_PROBE_NOT_FOUND: Self = Self(8);
    /// No bridge gateway ("stick") connected.
    pub const GATEWAY_NOT_FOUND: Self = Self(9);
    /// Label printer not found.
    pub const PRINTER_NOT_FOUND: Self = Self(10);

    /// 12 V supply rail out of range.
    pub const SUPPLY_12V_OUT_OF_RANGE: Self = Self(101);
    /// 3.3 V supply rail out of range.
    pub const SUPPLY_3V3_OUT_OF_RANGE: Self = Self(102);
    /// Unit under test not recognised by the wired probe.
    pub const DEVICE_RECOGNITION_FAIL: Self = Self(103);
    /// Firmware artifact download failed.
    pub const FIRMWARE_DOWNLOAD_FAIL: Self = Self(104);
    /// Firmware flash failed.
    pub const FIRMWARE_UPLOAD_FAIL: Self = Self(105);
    /// Device did not answer (or answered wrongly) over the bridge.
    pub const DEVICE_COMMUNICATION_FAIL: Self = Self(106);
    /// Raw ADC verification against thresholds failed.
    pub const ADC_VERIFICATION_FAIL: Self = Self(107);
    /// Mesh configuration command failed.
    pub const MESH_CONFIG_FAIL: Self = Self(108);

    /// No matching advertised neighbor within the discovery window.
    pub const NEIGHBOR_NOT_FOUND: Self = Self(201);
    /// Duty-ramp output verification failed.
    pub const DUTY_RAMP_FAIL: Self = Self(202);

    /// Final mesh configuration echo mismatch.
    pub const FINAL_MESH_CONFIG_FAIL: Self = Self(301);
    /// Label emit failed.
    pub const LABEL_PRINT_FAIL: Self = Self(302);

    /// A required configuration entry was missing at run time.
    pub const CONFIG_FAULT: Self = Self(901);
    /// Reserved code for faults caught at the runner boundary.
    pub const INTERNAL_ERROR: Self = Self(999);

    /// Returns the raw numeric code.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// The default taxonomy kind for this code.
    ///
    /// Callers that know better (for example, a 106 produced by a timeout
    /// rather than a malformed frame) override the kind on the result.
    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self.0 {
            6 | 7 => ErrorKind::Connectivity,
            4 => ErrorKind::IdentityMismatch,
            1 | 2 | 3 | 5 | 8 | 9 | 10 => ErrorKind::HardwareAbsence,
            101 | 102 | 107 | 202 => ErrorKind::MeasurementOutOfRange,
            103 | 105 => ErrorKind::ToolchainFailure,
            104 | 302 => ErrorKind::DownstreamIo,
            106 => ErrorKind::ProtocolTimeout,
            108 | 301 => ErrorKind::ProtocolMismatch,
            201 => ErrorKind::DiscoveryFailure,
            901 => ErrorKind::ConfigurationFault,
            _ => ErrorKind::Internal,
        }
    }

    /// Short mnemonic used in logs and remote records.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            1 => "DISPLAY_NOT_FOUND",
            2 => "RELAY_FAIL",
            3 => "GPIO_UNAVAILABLE",
            4 => "JIG_ID_MISMATCH",
            5 => "ADC_SENSOR_NOT_FOUND",
            6 => "INTERNET_NOT_FOUND",
            7 => "LOG_SERVER_UNREACHABLE",
            8 => "DEBUG_PROBE_NOT_FOUND",
            9 => "GATEWAY_NOT_FOUND",
            10 => "PRINTER_NOT_FOUND",
            101 => "SUPPLY_12V_OUT_OF_RANGE",
            102 => "SUPPLY_3V3_OUT_OF_RANGE",
            103 => "DEVICE_RECOGNITION_FAIL",
            104 => "FIRMWARE_DOWNLOAD_FAIL",
            105 => "FIRMWARE_UPLOAD_FAIL",
            106 => "DEVICE_COMMUNICATION_FAIL",
            107 => "ADC_VERIFICATION_FAIL",
            108 => "MESH_CONFIG_FAIL",
            201 => "NEIGHBOR_NOT_FOUND",
            202 => "DUTY_RAMP_FAIL",
            301 => "FINAL_MESH_CONFIG_FAIL",
            302 => "LABEL_PRINT_FAIL",
            901 => "CONFIG_FAULT",
            999 => "INTERNAL_ERROR",
            _ => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{:03} {}", self.0, self.name())
    }
}

/// Configuration loading/validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("config not found: {0}")]
    NotFound(String),

    /// Configuration file was not valid JSON.
    #[error("invalid json in {path}: {source}")]
    InvalidJson {
        /// Path of the offending file.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A required key is absent.
    #[error("missing config key: {0}")]
    MissingKey(String),

    /// A key is present but has the wrong shape or an invalid value.
    #[error("invalid config value for {key}: {reason}")]
    InvalidValue {
        /// Dotted key path.
        key: String,
        /// Human-readable reason.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_kinds_follow_the_taxonomy() {
        assert_eq!(ErrorCode::INTERNET_NOT_FOUND.kind(), ErrorKind::Connectivity);
        assert_eq!(ErrorCode::GATEWAY_NOT_FOUND.kind(), ErrorKind::HardwareAbsence);
        assert_eq!(ErrorCode::NEIGHBOR_NOT_FOUND.kind(), ErrorKind::DiscoveryFailure);
        assert_eq!(ErrorCode::ADC_VERIFICATION_FAIL.kind(), ErrorKind::MeasurementOutOfRange);
        assert_eq!(ErrorCode::CONFIG_FAULT.kind(), ErrorKind::ConfigurationFault);
        assert_eq!(ErrorCode::INTERNAL_ERROR.kind(), ErrorKind::Internal);
    }

    #[test]
    fn display_includes_code_and_name() {
        assert_eq!(
            ErrorCode::DEVICE_COMMUNICATION_FAIL.to_string(),
            "E106 DEVICE_COMMUNICATION_FAIL"
        );
    }
}
