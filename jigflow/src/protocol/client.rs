//! Device protocol client: typed operations with bounded round-trips.

use super::{
    AdcSample, BridgeError, CommandFrame, DeviceInfo, MeshConfigFrame, MessageBridge,
    MpptStatusFrame, ResponseFrame, RsdMask,
};
use crate::device::{DeviceId, GatewayId};
use crate::errors::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Protocol-level failure, distinct from a threshold failure.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No correlated response within the configured bound.
    #[error("no response to {command} within {timeout_ms} ms")]
    Timeout {
        /// Command wire name.
        command: &'static str,
        /// The bound that elapsed, milliseconds.
        timeout_ms: u64,
    },

    /// A response arrived but did not match the request.
    #[error("unexpected response to {command}: {got}")]
    Mismatch {
        /// Command wire name.
        command: &'static str,
        /// Short description of what arrived.
        got: String,
    },

    /// Transport failure underneath the protocol.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ProtocolError {
    /// Taxonomy kind for this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::ProtocolTimeout,
            Self::Mismatch { .. } => ErrorKind::ProtocolMismatch,
            Self::Bridge(_) => ErrorKind::DownstreamIo,
        }
    }
}

/// Long-lived protocol client over a message bridge.
///
/// Created once at process start and passed by handle; never reached through
/// ambient globals. Every operation publishes one request to the bound
/// target and blocks the calling test case until the correlated response
/// arrives or the timeout elapses. A response that arrives before the timer
/// fires counts; `tokio::time::timeout` semantics are the single tie-break.
///
/// The client never retries. Retry policy, where it exists at all, belongs
/// to the calling test case: a firmware upload must not be silently retried
/// mid-stream, while a liveness check may poll a few times.
pub struct DeviceProtocolClient {
    bridge: Arc<dyn MessageBridge>,
    timeout: Duration,
}

impl DeviceProtocolClient {
    /// Creates a client with the configured per-round-trip timeout.
    #[must_use]
    pub fn new(bridge: Arc<dyn MessageBridge>, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    /// The underlying bridge handle.
    #[must_use]
    pub fn bridge(&self) -> &Arc<dyn MessageBridge> {
        &self.bridge
    }

    /// Queries firmware version, upper id and uptime; confirms liveness.
    pub async fn get_info(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
    ) -> Result<DeviceInfo, ProtocolError> {
        match self.call(gateway, target, CommandFrame::ReqGetInfo, Duration::ZERO).await? {
            ResponseFrame::Info(frame) => Ok(DeviceInfo::from_frame(&frame)),
            other => Err(mismatch("REQ_GET_INFO", &other)),
        }
    }

    /// Dumps raw ADC samples collected over `window`.
    ///
    /// The round-trip bound is the window plus the configured timeout, since
    /// the device streams for the whole window before the dump completes.
    pub async fn dump_raw_adc(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        window: Duration,
    ) -> Result<Vec<AdcSample>, ProtocolError> {
        let bound = self.timeout + window;
        let collect = self.bridge.collect_adc(gateway, target, window);
        match tokio::time::timeout(bound, collect).await {
            Ok(samples) => {
                let samples = samples?;
                debug!(target = %target, samples = samples.len(), "adc dump complete");
                Ok(samples)
            }
            Err(_) => Err(ProtocolError::Timeout {
                command: "DUMP_RAW_ADC",
                timeout_ms: bound.as_millis() as u64,
            }),
        }
    }

    /// Commands the RSD channels into `mask` and waits for acknowledgement.
    pub async fn set_output_state(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        mask: RsdMask,
    ) -> Result<(), ProtocolError> {
        let command = CommandFrame::ReqShutdown { rsd1: mask.rsd1, rsd2: mask.rsd2 };
        match self.call(gateway, target, command, Duration::ZERO).await? {
            ResponseFrame::Ack { .. } => Ok(()),
            other => Err(mismatch("REQ_SHUTDOWN", &other)),
        }
    }

    /// Commands the shipping mesh configuration and returns the echo.
    pub async fn set_mesh_config(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        asp_interval_ms: u32,
        tx_power_dbm: i8,
    ) -> Result<MeshConfigFrame, ProtocolError> {
        let command = CommandFrame::ReqSetMeshConfig { asp_interval_ms, tx_power_dbm };
        match self.call(gateway, target, command, Duration::ZERO).await? {
            ResponseFrame::Mesh(frame) => Ok(frame),
            other => Err(mismatch("REQ_SET_MESH_CONFIG", &other)),
        }
    }

    /// Queries the MPPT controller status.
    pub async fn get_mppt_status(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
    ) -> Result<MpptStatusFrame, ProtocolError> {
        match self.call(gateway, target, CommandFrame::ReqGetMpptStatus, Duration::ZERO).await? {
            ResponseFrame::MpptStatus(frame) => Ok(frame),
            other => Err(mismatch("REQ_GET_MPPT_STATUS", &other)),
        }
    }

    /// Pins or restores the MPPT duty limits.
    pub async fn set_mppt_config(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        min_limit: u32,
        max_limit: u32,
        bypass: bool,
    ) -> Result<(), ProtocolError> {
        let command = CommandFrame::ReqSetMpptConfig { min_limit, max_limit, bypass };
        match self.call(gateway, target, command, Duration::ZERO).await? {
            ResponseFrame::Ack { .. } => Ok(()),
            other => Err(mismatch("REQ_SET_MPPT_CONFIG", &other)),
        }
    }

    /// Enables or disables the MPPT controller.
    pub async fn enable_mppt(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        enable: bool,
    ) -> Result<(), ProtocolError> {
        let command = CommandFrame::ReqEnableMppt { enable };
        match self.call(gateway, target, command, Duration::ZERO).await? {
            ResponseFrame::Ack { .. } => Ok(()),
            other => Err(mismatch("REQ_ENABLE_MPPT", &other)),
        }
    }

    async fn call(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        command: CommandFrame,
        extra: Duration,
    ) -> Result<ResponseFrame, ProtocolError> {
        let name = command.name();
        let bound = self.timeout + extra;
        debug!(command = name, target = %target, "protocol round-trip");
        match tokio::time::timeout(bound, self.bridge.exchange(gateway, target, command)).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(ProtocolError::Timeout {
                command: name,
                timeout_ms: bound.as_millis() as u64,
            }),
        }
    }
}

fn mismatch(command: &'static str, got: &ResponseFrame) -> ProtocolError {
    ProtocolError::Mismatch { command, got: format!("{got:?}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::InfoFrame;
    use crate::testing::MockBridge;
    use tokio_test::assert_ok;

    fn client(bridge: &Arc<MockBridge>, timeout_ms: u64) -> DeviceProtocolClient {
        DeviceProtocolClient::new(bridge.clone(), Duration::from_millis(timeout_ms))
    }

    fn ids() -> (GatewayId, DeviceId) {
        (GatewayId("gw-1".to_string()), DeviceId::new("AABBCCDD"))
    }

    #[tokio::test]
    async fn get_info_decodes_the_frame() {
        let bridge = Arc::new(MockBridge::new());
        let word: u32 = (1 << 28) | (2 << 20) | (1 << 16) | 1;
        bridge.respond_with(ResponseFrame::Info(InfoFrame {
            version: word,
            upper_id: Some(7),
            uptime: Some(10),
        }));
        let (gw, dev) = ids();

        let info = client(&bridge, 100).get_info(&gw, &dev).await.unwrap();
        assert_eq!(info.vendor_id, 1);
        assert_eq!(info.product_id, 2);
        assert_eq!(info.upper_id, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_is_a_timeout() {
        let bridge = Arc::new(MockBridge::new());
        bridge.respond_with(ResponseFrame::Ack { command: "REQ_SHUTDOWN".to_string() });
        bridge.delay_responses(Duration::from_millis(500));
        let (gw, dev) = ids();

        let err = client(&bridge, 100)
            .set_output_state(&gw, &dev, RsdMask::ALL_OFF)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout { command: "REQ_SHUTDOWN", .. }));
        assert_eq!(err.kind(), ErrorKind::ProtocolTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn response_before_the_bound_counts() {
        let bridge = Arc::new(MockBridge::new());
        bridge.respond_with(ResponseFrame::Ack { command: "REQ_SHUTDOWN".to_string() });
        bridge.delay_responses(Duration::from_millis(99));
        let (gw, dev) = ids();

        let result = client(&bridge, 100).set_output_state(&gw, &dev, RsdMask::ALL_OFF).await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn wrong_frame_is_a_mismatch() {
        let bridge = Arc::new(MockBridge::new());
        bridge.respond_with(ResponseFrame::Ack { command: "?".to_string() });
        let (gw, dev) = ids();

        let err = client(&bridge, 100).get_info(&gw, &dev).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Mismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
    }

    #[tokio::test(start_paused = true)]
    async fn adc_dump_bound_includes_the_window() {
        let bridge = Arc::new(MockBridge::new());
        bridge.set_adc_samples(vec![AdcSample::default()]);
        // Collection itself takes the window; the bound must absorb it.
        let (gw, dev) = ids();

        let samples = client(&bridge, 100)
            .dump_raw_adc(&gw, &dev, Duration::from_millis(1000))
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
    }
}
