//! Identity of the unit under test and of the bridge gateway.

mod selector;

pub use selector::{
    DeviceTargetSelector, SelectError, SignalPreference, TargetPolicy,
};

use crate::protocol::DeviceInfo;
use serde::{Deserialize, Serialize};

/// Lower 4-byte device id, canonicalised to `0x`-prefixed upper-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Canonicalises an id string (`aabbccdd`, `0xAABBCCDD`, …).
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let hex = raw.trim_start_matches("0x").trim_start_matches("0X");
        Self(format!("0x{}", hex.to_uppercase()))
    }

    /// The canonical `0x`-prefixed form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare hex digits without the prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.0[2..]
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bridge gateway ("stick") unique id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayId(pub String);

impl std::fmt::Display for GatewayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connected gateway as reported by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInfo {
    /// Gateway unique id.
    pub uid: GatewayId,
    /// Reported gateway firmware version, when known.
    #[serde(default)]
    pub version: Option<String>,
}

/// One passive advertisement observation collected during discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconObservation {
    /// Advertised device id.
    pub id: DeviceId,
    /// Received signal strength, dBm (negative; closer to zero is stronger).
    pub rssi: i32,
    /// Advertised vendor name.
    pub vendor: String,
    /// Advertised product name.
    pub product: String,
    /// Advertised firmware version, when decoded.
    #[serde(default)]
    pub version: Option<String>,
}

/// Factory-programmed identifiers read over the wired probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryIds {
    /// Full 6-byte device address, 12 hex chars.
    pub device_addr: String,
}

impl FactoryIds {
    /// The lower 4 bytes of the device address as the device id.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        let hex = &self.device_addr[self.device_addr.len().saturating_sub(8)..];
        DeviceId::new(hex)
    }
}

/// The vendor/product a jig expects to see advertised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceExpectation {
    /// Expected vendor name (matched case-insensitively).
    pub vendor: String,
    /// Expected product name (matched case-insensitively).
    pub product: String,
}

impl DeviceExpectation {
    /// True if an observation advertises the expected vendor and product.
    #[must_use]
    pub fn matches(&self, observation: &BeaconObservation) -> bool {
        observation.vendor.eq_ignore_ascii_case(&self.vendor)
            && observation.product.eq_ignore_ascii_case(&self.product)
    }
}

/// The bound unit under test.
///
/// Created fresh at the start of every sequence run and discarded at the
/// end; a stale address from a previous run is a correctness hazard, so the
/// type is deliberately not persisted anywhere.
#[derive(Debug, Clone)]
pub struct TargetDevice {
    /// Lower device id.
    pub id: DeviceId,
    /// Gateway the device is reachable through, for over-the-air targets.
    pub gateway: Option<GatewayId>,
    /// Signal strength at selection time, for over-the-air targets.
    pub rssi: Option<i32>,
    /// Factory identifiers, for wired targets.
    pub factory: Option<FactoryIds>,
    /// Cached info response, filled by the communication check.
    pub info: Option<DeviceInfo>,
}

impl TargetDevice {
    /// Binds a target from factory identifiers read over the wire.
    #[must_use]
    pub fn from_factory(factory: FactoryIds) -> Self {
        Self {
            id: factory.device_id(),
            gateway: None,
            rssi: None,
            factory: Some(factory),
            info: None,
        }
    }

    /// Binds a target from a selected beacon observation.
    #[must_use]
    pub fn from_beacon(observation: &BeaconObservation, gateway: GatewayId) -> Self {
        Self {
            id: observation.id.clone(),
            gateway: Some(gateway),
            rssi: Some(observation.rssi),
            factory: None,
            info: None,
        }
    }

    /// Upper 2-byte id learned from the info response, if any.
    #[must_use]
    pub fn upper_id(&self) -> Option<u16> {
        self.info.as_ref().and_then(|info| info.upper_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_canonicalises() {
        assert_eq!(DeviceId::new("aabbccdd").as_str(), "0xAABBCCDD");
        assert_eq!(DeviceId::new("0xAABBCCDD").hex(), "AABBCCDD");
    }

    #[test]
    fn factory_id_takes_lower_four_bytes() {
        let factory = FactoryIds { device_addr: "F1F2AABBCCDD".to_string() };
        assert_eq!(factory.device_id().as_str(), "0xAABBCCDD");
    }

    #[test]
    fn expectation_matching_is_case_insensitive() {
        let expectation = DeviceExpectation {
            vendor: "conalog".to_string(),
            product: "guard_2_1".to_string(),
        };
        let observation = BeaconObservation {
            id: DeviceId::new("01020304"),
            rssi: -50,
            vendor: "Conalog".to_string(),
            product: "Guard_2_1".to_string(),
            version: None,
        };
        assert!(expectation.matches(&observation));
    }
}
