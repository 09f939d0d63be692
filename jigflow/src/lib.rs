//! # Jigflow
//!
//! The stage test engine for MLPE production jigs.
//!
//! A jig qualifies boards through three production stages. Each stage is the
//! same machine (boot readiness wait, hardware self-test, idle-ready,
//! button-triggered verification sequence, result reporting) configured
//! with a different ordered list of test cases and a different
//! device-targeting policy:
//!
//! - **Stage 1** programs the bare board over a wired probe.
//! - **Stage 2** discovers the assembled unit over the air and selects the
//!   weakest matching beacon.
//! - **Stage 3** runs the final pre-shipping check and selects the
//!   strongest matching beacon.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use jigflow::prelude::*;
//!
//! let config = Arc::new(StageConfig::from_json(&raw)?);
//! let bridge = Arc::new(MqttBridge::connect("localhost", 1883, "jig").await?);
//! let client = Arc::new(DeviceProtocolClient::new(bridge.clone(), config.protocol_timeout));
//!
//! let pending = Arc::new(PendingStageCell::new());
//! ConfigWatcher::new(sink.clone(), &config.jig_id, config.stage,
//!                    config.config_poll_interval, pending.clone()).spawn();
//!
//! let mut machine = StageStateMachine::new(env, client, sink, indicator,
//!                                          button, connectivity, pending);
//! let next_stage = machine.run().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cases;
pub mod config;
pub mod context;
pub mod core;
pub mod device;
pub mod errors;
pub mod hal;
pub mod machine;
pub mod protocol;
pub mod report;
pub mod telemetry;
pub mod testing;
pub mod verify;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cases::{build_cases, CaseEnv, CaseRunner, TestCase};
    pub use crate::config::{
        CaseSpec, LabelConfig, Peripheral, StageConfig, StageId, ThresholdRange, ThresholdTable,
    };
    pub use crate::context::RunContext;
    pub use crate::core::{AggregatedResult, BootRecord, Outcome, Phase, TestResult};
    pub use crate::device::{
        BeaconObservation, DeviceExpectation, DeviceId, DeviceTargetSelector, GatewayId,
        SignalPreference, TargetDevice, TargetPolicy,
    };
    pub use crate::errors::{ErrorCode, ErrorKind};
    pub use crate::hal::{
        ButtonInput, Connectivity, FirmwareToolchain, IndicatorPanel, IndicatorState,
        JigHardware, LabelPrinter,
    };
    pub use crate::machine::{ConfigWatcher, JigState, PendingStageCell, StageStateMachine};
    pub use crate::protocol::{
        DeviceProtocolClient, MessageBridge, MqttBridge, ProtocolError, RsdMask,
    };
    pub use crate::report::{
        ArtifactStore, HttpArtifactStore, HttpLogSink, LogSink, ResultAggregator,
    };
    pub use crate::verify::ThresholdVerifier;
}
