//! Ready-made configuration and environment fixtures.

use super::{MockArtifacts, MockBridge, MockHardware, MockPrinter, MockToolchain};
use crate::cases::CaseEnv;
use crate::config::{
    default_policy, default_self_test, default_sequence, LabelConfig, StageConfig, StageId,
    ThresholdTable,
};
use crate::context::RunContext;
use crate::protocol::DeviceProtocolClient;
use crate::verify::ThresholdVerifier;
use std::sync::Arc;
use std::time::Duration;

/// A valid stage configuration with fast test-friendly timings.
#[must_use]
pub fn stage_config(stage: StageId) -> StageConfig {
    StageConfig {
        jig_id: "jig-01".to_string(),
        vendor: "conalog".to_string(),
        product: "guard_2_1".to_string(),
        stage,
        timezone: "Asia/Seoul".to_string(),
        adc_scales: [6.0, 2.0, 1.0, 1.0],
        self_test: default_self_test(stage),
        sequence: default_sequence(stage),
        policy: default_policy(stage),
        thresholds: ThresholdTable::new(),
        discovery_window: Duration::ZERO,
        protocol_timeout: Duration::from_millis(100),
        adc_dump_window: Duration::ZERO,
        config_poll_interval: Duration::from_millis(10),
        label: Some(LabelConfig {
            model: "SG-100".to_string(),
            authenticator: "Conalog".to_string(),
            kc_no: "R-R-CNL-SG100".to_string(),
            qr_base_url: "https://v.example.com/d".to_string(),
            printer: None,
        }),
    }
}

/// A complete case environment wired from mocks.
pub struct TestEnv {
    /// The environment handed to cases.
    pub env: CaseEnv,
    /// The mock bridge behind it.
    pub bridge: Arc<MockBridge>,
    /// The mock hardware behind it.
    pub hardware: Arc<MockHardware>,
    /// The mock toolchain behind it.
    pub toolchain: Arc<MockToolchain>,
    /// The mock artifact store behind it.
    pub artifacts: Arc<MockArtifacts>,
    /// The mock printer behind it.
    pub printer: Arc<MockPrinter>,
    /// Protocol client over the mock bridge.
    pub client: Arc<DeviceProtocolClient>,
}

impl TestEnv {
    /// A fresh run context for the configured stage.
    #[must_use]
    pub fn fresh_context(&self) -> RunContext {
        RunContext::new(self.env.config.stage, self.client.clone())
    }
}

/// Starts building a [`TestEnv`]; defaults to a stage-3 configuration.
#[must_use]
pub fn test_env() -> TestEnvBuilder {
    TestEnvBuilder {
        config: stage_config(StageId::Three),
        bridge: None,
        hardware: None,
        toolchain: None,
        artifacts: None,
        printer: None,
    }
}

/// Builder for [`TestEnv`].
pub struct TestEnvBuilder {
    config: StageConfig,
    bridge: Option<Arc<MockBridge>>,
    hardware: Option<Arc<MockHardware>>,
    toolchain: Option<Arc<MockToolchain>>,
    artifacts: Option<Arc<MockArtifacts>>,
    printer: Option<Arc<MockPrinter>>,
}

impl TestEnvBuilder {
    /// Replaces the stage configuration.
    #[must_use]
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the mock bridge.
    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<MockBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Replaces the mock hardware.
    #[must_use]
    pub fn with_hardware(mut self, hardware: Arc<MockHardware>) -> Self {
        self.hardware = Some(hardware);
        self
    }

    /// Replaces the mock toolchain.
    #[must_use]
    pub fn with_toolchain(mut self, toolchain: Arc<MockToolchain>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    /// Replaces the mock artifact store.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<MockArtifacts>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Replaces the mock printer.
    #[must_use]
    pub fn with_printer(mut self, printer: Arc<MockPrinter>) -> Self {
        self.printer = Some(printer);
        self
    }

    /// Wires everything together.
    #[must_use]
    pub fn build(self) -> TestEnv {
        let bridge = self.bridge.unwrap_or_else(|| Arc::new(MockBridge::new()));
        let hardware = self.hardware.unwrap_or_else(|| Arc::new(MockHardware::healthy()));
        let toolchain = self.toolchain.unwrap_or_else(|| Arc::new(MockToolchain::new()));
        let artifacts = self.artifacts.unwrap_or_else(|| Arc::new(MockArtifacts::new()));
        let printer = self.printer.unwrap_or_else(|| Arc::new(MockPrinter::new()));

        let config = Arc::new(self.config);
        let client = Arc::new(DeviceProtocolClient::new(
            bridge.clone(),
            config.protocol_timeout,
        ));
        let verifier = ThresholdVerifier::new(Arc::new(config.thresholds.clone()));

        let env = CaseEnv {
            config,
            verifier,
            hardware: hardware.clone(),
            toolchain: toolchain.clone(),
            artifacts: artifacts.clone(),
            printer: printer.clone(),
            bridge: bridge.clone(),
        };

        TestEnv { env, bridge, hardware, toolchain, artifacts, printer, client }
    }
}
