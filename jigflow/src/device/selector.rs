//! Device-targeting policies and the selector.

use super::{BeaconObservation, DeviceExpectation, GatewayId, TargetDevice};
use crate::hal::FirmwareToolchain;
use crate::protocol::{BridgeError, MessageBridge};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Which end of the RSSI ordering a beacon policy prefers.
///
/// Stage 3 takes the strongest signal (the unit on the jig, final check
/// before shipping). Stage 2 takes the weakest. The documentation states the
/// asymmetry without justifying it; it is a deliberate per-stage policy, so
/// it is surfaced here as a parameter rather than buried as a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPreference {
    /// Highest RSSI among matches.
    Strongest,
    /// Lowest RSSI among matches.
    Weakest,
}

/// How the unit under test is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TargetPolicy {
    /// Single directly-attached device, identity read over the probe.
    Wired,
    /// Passive advertisement discovery with an RSSI tie-break.
    Beacon {
        /// RSSI preference among type matches.
        preference: SignalPreference,
    },
}

/// Target selection failure.
#[derive(Debug, Error)]
pub enum SelectError {
    /// No gateway connected to scan through.
    #[error("no bridge gateway connected")]
    NoGateway,

    /// Nothing advertised within the discovery window.
    #[error("no neighbors observed within the discovery window")]
    NoCandidates,

    /// Neighbors were observed but none advertised the expected type.
    #[error("no device matching {vendor}/{product} among {observed} neighbors")]
    NoMatch {
        /// Expected vendor.
        vendor: String,
        /// Expected product.
        product: String,
        /// How many neighbors were observed in total.
        observed: usize,
    },

    /// The wired probe could not identify the attached device.
    #[error("wired probe failed: {0}")]
    Probe(String),

    /// Bridge transport failure during discovery.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Selects the unit under test for one sequence run.
///
/// Selection is re-run fresh at the start of every sequence attempt; the
/// selector never caches a previous run's result.
pub struct DeviceTargetSelector {
    policy: TargetPolicy,
    expectation: DeviceExpectation,
    window: Duration,
}

impl DeviceTargetSelector {
    /// Creates a selector for one stage's policy.
    #[must_use]
    pub fn new(policy: TargetPolicy, expectation: DeviceExpectation, window: Duration) -> Self {
        Self { policy, expectation, window }
    }

    /// Runs the configured policy and binds a fresh target.
    pub async fn select(
        &self,
        bridge: &dyn MessageBridge,
        toolchain: &dyn FirmwareToolchain,
    ) -> Result<(TargetDevice, Option<GatewayId>), SelectError> {
        match self.policy {
            TargetPolicy::Wired => {
                let factory = toolchain
                    .read_factory_ids()
                    .map_err(|e| SelectError::Probe(e.to_string()))?;
                let target = TargetDevice::from_factory(factory);
                debug!(device = %target.id, "wired target bound");
                Ok((target, None))
            }
            TargetPolicy::Beacon { preference } => self.discover(bridge, preference).await,
        }
    }

    async fn discover(
        &self,
        bridge: &dyn MessageBridge,
        preference: SignalPreference,
    ) -> Result<(TargetDevice, Option<GatewayId>), SelectError> {
        let gateways = bridge.list_gateways().await?;
        let gateway = gateways.first().ok_or(SelectError::NoGateway)?.uid.clone();

        // A stale list from the previous run must not leak into this one.
        if let Err(e) = bridge.clear_neighbors(&gateway).await {
            warn!(gateway = %gateway, error = %e, "failed to clear neighbor list");
        }

        tokio::time::sleep(self.window).await;

        let observations = bridge.neighbors(&gateway).await?;
        if observations.is_empty() {
            return Err(SelectError::NoCandidates);
        }
        debug!(
            gateway = %gateway,
            observed = observations.len(),
            "discovery window closed"
        );

        let selected = pick(&observations, &self.expectation, preference).ok_or_else(|| {
            SelectError::NoMatch {
                vendor: self.expectation.vendor.clone(),
                product: self.expectation.product.clone(),
                observed: observations.len(),
            }
        })?;

        debug!(device = %selected.id, rssi = selected.rssi, "beacon target selected");
        Ok((TargetDevice::from_beacon(selected, gateway.clone()), Some(gateway)))
    }
}

/// Filters observations to the expected type and applies the preference.
///
/// Stable: among equal RSSI values the earliest observation wins, so the
/// same input always yields the same target.
fn pick<'a>(
    observations: &'a [BeaconObservation],
    expectation: &DeviceExpectation,
    preference: SignalPreference,
) -> Option<&'a BeaconObservation> {
    let matches = observations.iter().filter(|o| expectation.matches(o));
    match preference {
        SignalPreference::Strongest => {
            matches.fold(None, |best: Option<&BeaconObservation>, o| match best {
                Some(b) if b.rssi >= o.rssi => Some(b),
                _ => Some(o),
            })
        }
        SignalPreference::Weakest => {
            matches.fold(None, |best: Option<&BeaconObservation>, o| match best {
                Some(b) if b.rssi <= o.rssi => Some(b),
                _ => Some(o),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;

    fn obs(id: &str, vendor: &str, product: &str, rssi: i32) -> BeaconObservation {
        BeaconObservation {
            id: DeviceId::new(id),
            rssi,
            vendor: vendor.to_string(),
            product: product.to_string(),
            version: None,
        }
    }

    fn expectation() -> DeviceExpectation {
        DeviceExpectation { vendor: "conalog".to_string(), product: "guard_2_1".to_string() }
    }

    #[test]
    fn strongest_picks_highest_rssi_among_matches() {
        let observations = vec![
            obs("00000001", "conalog", "guard_2_1", -40),
            obs("00000002", "nanoom", "booster_1_1", -30),
            obs("00000003", "conalog", "guard_2_1", -60),
        ];
        let picked = pick(&observations, &expectation(), SignalPreference::Strongest).unwrap();
        assert_eq!(picked.id.as_str(), "0x00000001");
        assert_eq!(picked.rssi, -40);
    }

    #[test]
    fn weakest_picks_lowest_rssi_among_matches() {
        let observations = vec![
            obs("00000001", "conalog", "guard_2_1", -40),
            obs("00000002", "nanoom", "booster_1_1", -30),
            obs("00000003", "conalog", "guard_2_1", -60),
        ];
        let picked = pick(&observations, &expectation(), SignalPreference::Weakest).unwrap();
        assert_eq!(picked.id.as_str(), "0x00000003");
        assert_eq!(picked.rssi, -60);
    }

    #[test]
    fn no_type_match_yields_none() {
        let observations = vec![obs("00000002", "nanoom", "booster_1_1", -30)];
        assert!(pick(&observations, &expectation(), SignalPreference::Strongest).is_none());
    }

    #[test]
    fn equal_rssi_prefers_first_observed() {
        let observations = vec![
            obs("000000AA", "conalog", "guard_2_1", -50),
            obs("000000BB", "conalog", "guard_2_1", -50),
        ];
        let strongest = pick(&observations, &expectation(), SignalPreference::Strongest).unwrap();
        let weakest = pick(&observations, &expectation(), SignalPreference::Weakest).unwrap();
        assert_eq!(strongest.id.as_str(), "0x000000AA");
        assert_eq!(weakest.id.as_str(), "0x000000AA");
    }
}
