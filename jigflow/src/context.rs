//! Shared mutable state for one phase run.

use crate::config::StageId;
use crate::device::{GatewayId, TargetDevice};
use crate::protocol::DeviceProtocolClient;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Downloaded firmware artifacts, staged for flashing.
#[derive(Debug, Clone)]
pub struct FirmwareArtifacts {
    /// Bootloader image bytes.
    pub bootloader: Vec<u8>,
    /// Bootloader version label.
    pub bootloader_version: String,
    /// Application image bytes.
    pub application: Vec<u8>,
    /// Application version label.
    pub application_version: String,
}

/// The one piece of explicitly shared, mutable state for a phase run.
///
/// Owned exclusively by the state machine's current run; at most one phase
/// executes at a time, so nothing here is synchronised. A fresh context is
/// created at every phase start; in particular the bound [`TargetDevice`] is
/// never carried across sequence runs.
pub struct RunContext {
    /// Unique id of this phase run.
    pub run_id: Uuid,
    /// Stage the run belongs to.
    pub stage: StageId,
    /// The bound unit under test, set by the bind-target case.
    pub target: Option<TargetDevice>,
    /// Gateway the target is reachable through, for over-the-air stages.
    pub gateway: Option<GatewayId>,
    /// Staged firmware artifacts, set by the download case.
    pub artifacts: Option<FirmwareArtifacts>,
    /// Cross-step intermediate values, e.g. the baseline output voltage
    /// referenced by the duty-ramp check. Raw counts, keyed by signal.
    pub baselines: HashMap<String, f64>,
    client: Arc<DeviceProtocolClient>,
}

impl RunContext {
    /// Creates a fresh context for one phase run.
    #[must_use]
    pub fn new(stage: StageId, client: Arc<DeviceProtocolClient>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stage,
            target: None,
            gateway: None,
            artifacts: None,
            baselines: HashMap::new(),
            client,
        }
    }

    /// The protocol client handle.
    #[must_use]
    pub fn client(&self) -> &DeviceProtocolClient {
        &self.client
    }

    /// Binds the selected target (and its gateway) for this run.
    pub fn bind_target(&mut self, target: TargetDevice, gateway: Option<GatewayId>) {
        self.gateway = gateway.or_else(|| target.gateway.clone());
        self.target = Some(target);
    }

    /// The bound target and gateway, or `None` if binding has not happened.
    #[must_use]
    pub fn bound(&self) -> Option<(&TargetDevice, &GatewayId)> {
        match (&self.target, &self.gateway) {
            (Some(target), Some(gateway)) => Some((target, gateway)),
            _ => None,
        }
    }
}
