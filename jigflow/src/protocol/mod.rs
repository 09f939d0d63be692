//! Typed command/response protocol spoken over the message bridge.
//!
//! The frames here are transport-agnostic; [`bridge::MessageBridge`]
//! implementations map them onto the wire. All ADC payloads stay in raw
//! counts end to end.

mod bridge;
mod client;
pub mod mqtt;

pub use bridge::{BridgeError, MessageBridge};
pub use client::{DeviceProtocolClient, ProtocolError};
pub use mqtt::MqttBridge;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bit-mask state for the device's remotely-switchable disconnect channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsdMask {
    /// RSD channel 1.
    pub rsd1: bool,
    /// RSD channel 2.
    pub rsd2: bool,
}

impl RsdMask {
    /// Both channels off.
    pub const ALL_OFF: Self = Self { rsd1: false, rsd2: false };

    /// Creates a mask.
    #[must_use]
    pub const fn new(rsd1: bool, rsd2: bool) -> Self {
        Self { rsd1, rsd2 }
    }
}

impl std::fmt::Display for RsdMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RSD1={}, RSD2={}", self.rsd1, self.rsd2)
    }
}

/// A request addressed to the bound target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandFrame {
    /// Query firmware version, upper id, uptime; confirms liveness.
    ReqGetInfo,
    /// Start a raw ADC dump for the given window.
    ReqDumpRawAdc {
        /// Collection window, milliseconds.
        window_ms: u64,
    },
    /// Command the RSD channels into a mask state.
    ReqShutdown {
        /// RSD channel 1.
        rsd1: bool,
        /// RSD channel 2.
        rsd2: bool,
    },
    /// Command the shipping mesh configuration.
    ReqSetMeshConfig {
        /// Advertisement (ASP) interval, milliseconds.
        asp_interval_ms: u32,
        /// Transmit power, dBm.
        tx_power_dbm: i8,
    },
    /// Query the MPPT controller status.
    ReqGetMpptStatus,
    /// Pin or restore the MPPT duty limits.
    ReqSetMpptConfig {
        /// Lower duty limit.
        min_limit: u32,
        /// Upper duty limit.
        max_limit: u32,
        /// Bypass the tracking condition.
        bypass: bool,
    },
    /// Enable or disable the MPPT controller.
    ReqEnableMppt {
        /// Desired state.
        enable: bool,
    },
}

impl CommandFrame {
    /// Wire name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReqGetInfo => "REQ_GET_INFO",
            Self::ReqDumpRawAdc { .. } => "DUMP_RAW_ADC",
            Self::ReqShutdown { .. } => "REQ_SHUTDOWN",
            Self::ReqSetMeshConfig { .. } => "REQ_SET_MESH_CONFIG",
            Self::ReqGetMpptStatus => "REQ_GET_MPPT_STATUS",
            Self::ReqSetMpptConfig { .. } => "REQ_SET_MPPT_CONFIG",
            Self::ReqEnableMppt { .. } => "REQ_ENABLE_MPPT",
        }
    }
}

/// Raw info payload as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoFrame {
    /// Packed version word: vendor, product and semantic version bits.
    pub version: u32,
    /// Upper 2-byte id, when programmed.
    #[serde(default)]
    pub upper_id: Option<u16>,
    /// Device uptime, seconds.
    #[serde(default)]
    pub uptime: Option<u64>,
}

/// Decoded device identity and liveness info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Vendor id from the packed version word.
    pub vendor_id: u8,
    /// Product id from the packed version word.
    pub product_id: u8,
    /// Firmware version, `major.minor.patch`.
    pub version: String,
    /// Upper 2-byte id, when programmed.
    pub upper_id: Option<u16>,
    /// Device uptime, seconds.
    pub uptime: Option<u64>,
}

impl DeviceInfo {
    /// Unpacks the wire info frame.
    ///
    /// The version word packs vendor in bits 28–31, product in 20–23, and
    /// the semantic version as major/minor/patch in bits 16–19 / 8–15 / 0–7.
    #[must_use]
    pub fn from_frame(frame: &InfoFrame) -> Self {
        let v = frame.version;
        let major = (v >> 16) & 0x0F;
        let minor = (v >> 8) & 0xFF;
        let patch = v & 0xFF;
        Self {
            vendor_id: ((v >> 28) & 0x0F) as u8,
            product_id: ((v >> 20) & 0x0F) as u8,
            version: format!("{major}.{minor}.{patch}"),
            upper_id: frame.upper_id,
            uptime: frame.uptime,
        }
    }
}

/// One raw ADC sample: named sense channels to raw counts.
///
/// Channel names vary per board (`vin1`, `vin2`, `vout`, …); firmware may
/// suffix raw fields with `_raw`, so lookups try the suffixed name first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdcSample(pub HashMap<String, i64>);

impl AdcSample {
    /// Raw count for a signal, preferring the `_raw`-suffixed field.
    #[must_use]
    pub fn raw(&self, signal: &str) -> Option<i64> {
        self.0
            .get(&format!("{signal}_raw"))
            .or_else(|| self.0.get(signal))
            .copied()
    }
}

/// Echoed mesh configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshConfigFrame {
    /// Echoed transmit power, dBm.
    #[serde(default)]
    pub tx_power_dbm: Option<i8>,
    /// Echoed ASP interval, milliseconds.
    #[serde(default)]
    pub asp_interval_ms: Option<u32>,
}

/// MPPT controller status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpptStatusFrame {
    /// Whether tracking is enabled.
    pub enabled: bool,
    /// Current lower duty limit.
    #[serde(default)]
    pub min_limit: Option<u32>,
    /// Current upper duty limit.
    #[serde(default)]
    pub max_limit: Option<u32>,
    /// Hardware maximum duty.
    #[serde(default)]
    pub max_duty: Option<u32>,
    /// Whether the tracking condition is bypassed.
    #[serde(default)]
    pub bypass: bool,
}

/// A correlated response from the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ResponseFrame {
    /// Info response.
    Info(InfoFrame),
    /// Collected ADC dump.
    AdcDump(Vec<AdcSample>),
    /// Bare acknowledgement for state-changing commands.
    Ack {
        /// Acknowledged command wire name.
        command: String,
    },
    /// Mesh configuration echo.
    Mesh(MeshConfigFrame),
    /// MPPT status.
    MpptStatus(MpptStatusFrame),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_word_unpacks() {
        // vendor 1, product 2, version 1.2.3
        let word: u32 = (1 << 28) | (2 << 20) | (1 << 16) | (2 << 8) | 3;
        let info = DeviceInfo::from_frame(&InfoFrame {
            version: word,
            upper_id: Some(0x0102),
            uptime: Some(42),
        });
        assert_eq!(info.vendor_id, 1);
        assert_eq!(info.product_id, 2);
        assert_eq!(info.version, "1.2.3");
        assert_eq!(info.upper_id, Some(0x0102));
    }

    #[test]
    fn sample_prefers_raw_suffixed_field() {
        let mut fields = HashMap::new();
        fields.insert("vout".to_string(), 100_i64);
        fields.insert("vout_raw".to_string(), 2048_i64);
        let sample = AdcSample(fields);
        assert_eq!(sample.raw("vout"), Some(2048));
        assert_eq!(sample.raw("vin1"), None);
    }

    #[test]
    fn command_names_match_the_wire() {
        assert_eq!(CommandFrame::ReqGetInfo.name(), "REQ_GET_INFO");
        assert_eq!(CommandFrame::ReqShutdown { rsd1: true, rsd2: false }.name(), "REQ_SHUTDOWN");
        assert_eq!(CommandFrame::ReqDumpRawAdc { window_ms: 1000 }.name(), "DUMP_RAW_ADC");
    }
}
