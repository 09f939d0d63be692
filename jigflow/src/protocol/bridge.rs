//! Message bridge trait: the transport seam under the protocol client.

use super::{AdcSample, CommandFrame, ResponseFrame};
use crate::device::{BeaconObservation, DeviceId, GatewayId, GatewayInfo};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Transport-level bridge failure.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// The underlying transport failed.
    #[error("bridge transport error: {0}")]
    Transport(String),

    /// The bridge reported a command failure.
    #[error("bridge rejected {command}: {status}")]
    Rejected {
        /// Command wire name.
        command: String,
        /// Bridge-reported status.
        status: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("bridge payload error: {0}")]
    Payload(String),
}

/// Publish/subscribe transport to the device network.
///
/// Implementations correlate responses to requests; they do **not** bound
/// waiting time. Timeout policy belongs to the caller: the protocol client
/// wraps every call in the configured per-round-trip timeout, and the
/// selector bounds the discovery window itself.
#[async_trait]
pub trait MessageBridge: Send + Sync {
    /// Enumerates connected gateways ("sticks").
    async fn list_gateways(&self) -> Result<Vec<GatewayInfo>, BridgeError>;

    /// Resets a gateway's neighbor observation list.
    async fn clear_neighbors(&self, gateway: &GatewayId) -> Result<(), BridgeError>;

    /// Snapshot of the advertisements a gateway has observed.
    async fn neighbors(&self, gateway: &GatewayId) -> Result<Vec<BeaconObservation>, BridgeError>;

    /// Publishes a command addressed to `target` and waits for the
    /// correlated response.
    async fn exchange(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        command: CommandFrame,
    ) -> Result<ResponseFrame, BridgeError>;

    /// Starts a raw ADC dump and collects samples for `window`.
    async fn collect_adc(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        window: Duration,
    ) -> Result<Vec<AdcSample>, BridgeError>;
}
