//! Result aggregation and remote reporting.

mod artifacts;
mod sink;

pub use artifacts::{ArtifactStore, FirmwareKind, FirmwareImage, HttpArtifactStore};
pub use sink::{HttpLogSink, LogSink, SinkError};

use crate::core::{AggregatedResult, BootRecord, Phase, StepRecord, TestResult};
use crate::config::StageId;
use crate::context::RunContext;

/// Accumulates step results for the active phase.
///
/// One aggregator lives per phase run. [`seal`](Self::seal) consumes it, so
/// a phase can be sealed exactly once by construction; the sealed record is
/// what gets pushed to the sink; step results are never pushed
/// individually.
pub struct ResultAggregator {
    phase: Phase,
    stage: StageId,
    steps: Vec<StepRecord>,
    boot: Option<BootRecord>,
    device_id: Option<String>,
    upper_id: Option<u16>,
}

impl ResultAggregator {
    /// Opens an aggregator for one phase run.
    #[must_use]
    pub fn new(phase: Phase, stage: StageId) -> Self {
        Self {
            phase,
            stage,
            steps: Vec::new(),
            boot: None,
            device_id: None,
            upper_id: None,
        }
    }

    /// Attaches the one-time boot record (first self-test aggregate only).
    pub fn attach_boot(&mut self, boot: BootRecord) {
        self.boot = Some(boot);
    }

    /// Appends one step result, in arrival order.
    pub fn record(&mut self, case: &str, result: TestResult) {
        self.steps.push(StepRecord { case: case.to_string(), result });
    }

    /// Number of recorded steps so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Name of the most recently recorded case, if any.
    #[must_use]
    pub fn last_case(&self) -> Option<&str> {
        self.steps.last().map(|s| s.case.as_str())
    }

    /// Copies device identity out of the run context before sealing.
    pub fn note_device(&mut self, ctx: &RunContext) {
        if let Some(target) = &ctx.target {
            self.device_id = Some(target.id.hex().to_string());
            self.upper_id = target.upper_id();
        }
    }

    /// Seals the phase into its aggregated record.
    ///
    /// Overall code is `0` when every step passed, otherwise the first
    /// failing step's code. Consumes the aggregator.
    #[must_use]
    pub fn seal(self) -> AggregatedResult {
        let code = self
            .steps
            .iter()
            .find(|s| !s.result.is_pass())
            .map_or(0, |s| s.result.code_value());
        AggregatedResult {
            phase: self.phase,
            stage: self.stage,
            code,
            device_id: self.device_id,
            upper_id: self.upper_id,
            steps: self.steps,
            boot: self.boot,
        }
    }
}
