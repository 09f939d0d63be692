//! Test case abstraction and the per-stage case catalogue.
//!
//! A test case is one unit of verification work over the capability
//! `run(context) -> TestResult`. Cases are stateless between invocations;
//! everything they share across steps lives in the [`RunContext`]. Which
//! cases run, and in which order, is pure configuration ([`CaseSpec`]).

mod runner;
mod self_test;
mod sequence;

pub use runner::CaseRunner;
pub use self_test::{GpioCase, JigIdentityCase, PeripheralCase};
pub use sequence::{
    AdcVerificationCase, BindTargetCase, CommunicationCheckCase, DutyRampCase,
    FirmwareDownloadCase, FirmwareUploadCase, LabelEmitCase, MeshFinalizeCase, OutputStateCase,
    RelayControlCase, SupplyVoltageCase,
};

use crate::config::{CaseSpec, StageConfig};
use crate::context::RunContext;
use crate::core::TestResult;
use crate::hal::{FirmwareToolchain, JigHardware, LabelPrinter};
use crate::protocol::{MessageBridge, RsdMask};
use crate::report::ArtifactStore;
use crate::verify::ThresholdVerifier;
use async_trait::async_trait;
use std::sync::Arc;

/// Immutable collaborators shared by every case in a phase.
///
/// The mutable counterpart is the [`RunContext`]; this split keeps the one
/// piece of shared mutable state explicit and exclusively owned.
#[derive(Clone)]
pub struct CaseEnv {
    /// Active stage configuration.
    pub config: Arc<StageConfig>,
    /// Threshold verifier over the stage's limit table.
    pub verifier: ThresholdVerifier,
    /// Jig-side hardware drivers.
    pub hardware: Arc<dyn JigHardware>,
    /// Wired flashing toolchain.
    pub toolchain: Arc<dyn FirmwareToolchain>,
    /// Firmware artifact store.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Label printer driver.
    pub printer: Arc<dyn LabelPrinter>,
    /// Message bridge transport.
    pub bridge: Arc<dyn MessageBridge>,
}

/// One unit of verification work.
#[async_trait]
pub trait TestCase: Send + Sync {
    /// Configured case name, used in step records and logs.
    fn name(&self) -> &str;

    /// Executes the case.
    ///
    /// Failures are reported through the returned [`TestResult`]; a case
    /// should not panic, and if it does anyway the runner maps the fault to
    /// the internal-error code.
    async fn run(&self, env: &CaseEnv, ctx: &mut RunContext) -> TestResult;
}

/// Instantiates the configured case list.
///
/// Cases are stateless, so the same instances are safely reused across
/// phase runs.
#[must_use]
pub fn build_cases(specs: &[CaseSpec]) -> Vec<Arc<dyn TestCase>> {
    specs.iter().map(build_case).collect()
}

fn build_case(spec: &CaseSpec) -> Arc<dyn TestCase> {
    match spec {
        CaseSpec::GpioAvailability => Arc::new(GpioCase),
        CaseSpec::PeripheralPresence { peripheral } => Arc::new(PeripheralCase::new(*peripheral)),
        CaseSpec::JigIdentity => Arc::new(JigIdentityCase),
        CaseSpec::SupplyVoltage => Arc::new(sequence::SupplyVoltageCase),
        CaseSpec::BindTarget => Arc::new(BindTargetCase),
        CaseSpec::FirmwareDownload => Arc::new(FirmwareDownloadCase),
        CaseSpec::FirmwareUpload => Arc::new(FirmwareUploadCase),
        CaseSpec::CommunicationCheck => Arc::new(CommunicationCheckCase),
        CaseSpec::RelayControl { on } => Arc::new(RelayControlCase::new(*on)),
        CaseSpec::OutputState { rsd1, rsd2 } => {
            Arc::new(OutputStateCase::new(RsdMask::new(*rsd1, *rsd2)))
        }
        CaseSpec::AdcVerification { check } => Arc::new(AdcVerificationCase::new(check)),
        CaseSpec::DutyRamp => Arc::new(DutyRampCase),
        CaseSpec::MeshFinalize => Arc::new(MeshFinalizeCase),
        CaseSpec::LabelEmit => Arc::new(LabelEmitCase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_sequence, default_self_test, StageId};

    #[test]
    fn every_documented_spec_builds() {
        for stage in [StageId::One, StageId::Two, StageId::Three] {
            let self_test = build_cases(&default_self_test(stage));
            let sequence = build_cases(&default_sequence(stage));
            assert_eq!(self_test.len(), default_self_test(stage).len());
            assert_eq!(sequence.len(), default_sequence(stage).len());
        }
    }

    #[test]
    fn output_state_names_encode_the_mask() {
        let case = build_case(&CaseSpec::OutputState { rsd1: true, rsd2: true });
        assert_eq!(case.name(), "RSD1+2 On");
        let case = build_case(&CaseSpec::OutputState { rsd1: false, rsd2: false });
        assert_eq!(case.name(), "RSD All Off");
    }
}
