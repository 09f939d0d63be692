//! Mock collaborators and fixtures for tests.
//!
//! Hand-written mocks for the hardware, bridge and sink seams, plus a
//! builder that wires a complete [`CaseEnv`](crate::cases::CaseEnv) from
//! them. Used by the crate's own tests and available to downstream
//! integration tests.

mod fixtures;
mod mocks;

pub use fixtures::{stage_config, test_env, TestEnv, TestEnvBuilder};
pub use mocks::{
    CallCount, MockArtifacts, MockBridge, MockButton, MockConnectivity, MockHardware,
    MockIndicator, MockPrinter, MockSink, MockToolchain, PanickingCase, ScriptedCase,
};
