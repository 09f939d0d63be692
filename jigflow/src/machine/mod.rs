//! The stage state machine.
//!
//! One skeleton for all three stages:
//!
//! ```text
//! BOOT_WAIT → SELF_TEST → READY → SEQUENCE → DONE → READY
//!                 ↑  ↓ fail          ↓ fail
//!                 FAIL_WAIT ←────────┘
//! ```
//!
//! Stages differ only in configuration: which cases run and how the target
//! is selected. The machine itself contains no stage-specific branches.

mod watcher;

pub use watcher::{ConfigWatcher, PendingStageCell};

use crate::cases::{build_cases, CaseEnv, CaseRunner, TestCase};
use crate::config::StageId;
use crate::context::RunContext;
use crate::core::{AggregatedResult, BootRecord, Phase};
use crate::errors::ErrorCode;
use crate::hal::{ButtonInput, Connectivity, IndicatorPanel, IndicatorState};
use crate::protocol::{DeviceProtocolClient, RsdMask};
use crate::report::{LogSink, ResultAggregator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Observable machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JigState {
    /// Waiting for network and server reachability.
    BootWait,
    /// Running the self-test case list.
    SelfTest,
    /// Idle, awaiting the trigger button.
    Ready,
    /// Running the production sequence.
    Sequence,
    /// A phase failed; awaiting acknowledgement.
    FailWait,
    /// Transient routing state back to ready.
    Done,
}

/// The top-level controller for one stage.
///
/// Driven by a single sequential worker: case execution is synchronous and
/// blocking from the machine's point of view, and at most one phase is in
/// flight. The only concurrent task is the [`ConfigWatcher`], which
/// communicates exclusively through the [`PendingStageCell`]; the machine
/// honors a pending change at phase boundaries only, never mid-case.
pub struct StageStateMachine {
    env: CaseEnv,
    client: Arc<DeviceProtocolClient>,
    sink: Arc<dyn LogSink>,
    indicator: Arc<dyn IndicatorPanel>,
    button: Arc<dyn ButtonInput>,
    connectivity: Arc<dyn Connectivity>,
    pending: Arc<PendingStageCell>,
    self_test_cases: Vec<Arc<dyn TestCase>>,
    sequence_cases: Vec<Arc<dyn TestCase>>,
    state: JigState,
    boot_logged: bool,
}

impl StageStateMachine {
    /// Wires a machine from its collaborators; case lists come from the
    /// environment's stage configuration.
    #[must_use]
    pub fn new(
        env: CaseEnv,
        client: Arc<DeviceProtocolClient>,
        sink: Arc<dyn LogSink>,
        indicator: Arc<dyn IndicatorPanel>,
        button: Arc<dyn ButtonInput>,
        connectivity: Arc<dyn Connectivity>,
        pending: Arc<PendingStageCell>,
    ) -> Self {
        let self_test_cases = build_cases(&env.config.self_test);
        let sequence_cases = build_cases(&env.config.sequence);
        Self {
            env,
            client,
            sink,
            indicator,
            button,
            connectivity,
            pending,
            self_test_cases,
            sequence_cases,
            state: JigState::BootWait,
            boot_logged: false,
        }
    }

    /// Current observable state.
    #[must_use]
    pub fn state(&self) -> JigState {
        self.state
    }

    /// Runs the machine until the watcher requests a stage switch.
    ///
    /// Returns the stage to reconfigure for. The caller rebuilds the
    /// machine with the new stage's configuration and calls `run` again.
    pub async fn run(&mut self) -> StageId {
        let stage = self.env.config.stage;
        self.boot_wait().await;

        // Self-test loop: repeat until all checks pass. A failure waits for
        // acknowledgement and restarts the self-test only, not the boot.
        loop {
            let aggregate = self.self_test_phase().await;
            self.push(&aggregate).await;
            if let Some(next) = self.pending.take() {
                info!(to = next.number(), "stage switch honored after self-test");
                return next;
            }
            if aggregate.passed() {
                self.indicator.show_code(0);
                self.indicator.set_indicator(IndicatorState::Ready);
                info!(stage = stage.label(), "self-test passed; ready");
                break;
            }
            self.state = JigState::FailWait;
            self.indicator.set_indicator(IndicatorState::Fail);
            self.indicator.show_code(aggregate.code);
            error!(code = aggregate.code, "self-test failed; awaiting acknowledgement");
            self.button.wait_for_press().await;
            info!("self-test restart requested");
        }

        // Ready loop: one button press, one sequence run.
        loop {
            self.state = JigState::Ready;
            tokio::select! {
                () = self.button.wait_for_press() => {}
                next = self.pending.changed() => {
                    let _ = self.pending.take();
                    info!(to = next.number(), "stage switch honored while idle");
                    return next;
                }
            }

            info!(stage = stage.label(), "sequence triggered");
            let aggregate = self.sequence_phase().await;
            self.push(&aggregate).await;

            // Phase boundary: the switch is read once, after the in-flight
            // phase has fully completed.
            let pending = self.pending.take();

            if aggregate.passed() {
                self.indicator.show_code(0);
                self.indicator.set_indicator(IndicatorState::Ready);
                info!(stage = stage.label(), "sequence complete");
            } else {
                self.state = JigState::FailWait;
                self.indicator.set_indicator(IndicatorState::Fail);
                self.indicator.show_code(aggregate.code);
                error!(code = aggregate.code, "sequence failed; awaiting acknowledgement");
                if pending.is_none() {
                    // Acknowledge returns to ready without re-running the
                    // self-test.
                    self.button.wait_for_press().await;
                }
            }
            self.state = JigState::Done;

            if let Some(next) = pending {
                info!(to = next.number(), "stage switch honored after sequence");
                return next;
            }
        }
    }

    /// Blocks until both the network and the log server are reachable.
    ///
    /// Distinct display codes for the two failure modes; polls indefinitely
    /// rather than failing hard.
    async fn boot_wait(&mut self) {
        self.state = JigState::BootWait;
        self.indicator.set_indicator(IndicatorState::Loading);
        loop {
            if !self.connectivity.network_reachable() {
                self.indicator.show_code(ErrorCode::INTERNET_NOT_FOUND.value());
                warn!(code = %ErrorCode::INTERNET_NOT_FOUND, "no network; retrying");
                tokio::time::sleep(BOOT_POLL_INTERVAL).await;
                continue;
            }
            if !self.sink.health_check().await {
                self.indicator.show_code(ErrorCode::LOG_SERVER_UNREACHABLE.value());
                warn!(code = %ErrorCode::LOG_SERVER_UNREACHABLE, "log server unreachable; retrying");
                tokio::time::sleep(BOOT_POLL_INTERVAL).await;
                continue;
            }
            break;
        }
        info!(stage = self.env.config.stage.label(), "connectivity confirmed; leaving boot-wait");
    }

    /// Runs the self-test case list once.
    async fn self_test_phase(&mut self) -> AggregatedResult {
        let stage = self.env.config.stage;
        self.state = JigState::SelfTest;
        self.indicator.set_indicator(IndicatorState::Loading);
        info!(stage = stage.label(), "self-test started");

        let mut ctx = RunContext::new(stage, self.client.clone());
        let mut aggregator = ResultAggregator::new(Phase::SelfTest, stage);
        // The boot event rides on the first self-test aggregate; re-entries
        // after a failure acknowledgement do not repeat it.
        if !self.boot_logged {
            aggregator.attach_boot(self.boot_record());
            self.boot_logged = true;
        }

        let runner = CaseRunner::new(self.self_test_cases.clone());
        let _ = runner.run(&self.env, &mut ctx, &mut aggregator).await;
        aggregator.seal()
    }

    /// Runs the production sequence once, against a fresh run context.
    async fn sequence_phase(&mut self) -> AggregatedResult {
        let stage = self.env.config.stage;
        self.state = JigState::Sequence;
        self.indicator.set_indicator(IndicatorState::Busy);
        info!(stage = stage.label(), "sequence started");

        let mut ctx = RunContext::new(stage, self.client.clone());
        let mut aggregator = ResultAggregator::new(Phase::Sequence, stage);
        let runner = CaseRunner::new(self.sequence_cases.clone());
        let outcome = runner.run(&self.env, &mut ctx, &mut aggregator).await;

        if outcome == crate::core::Outcome::Fail {
            self.deenergise_after_failure(&ctx, &aggregator).await;
        }

        aggregator.note_device(&ctx);
        aggregator.seal()
    }

    /// Best-effort cleanup after a failed powered step: RSD all off, relay
    /// off. Skipped when the failing step was itself a de-energise step.
    async fn deenergise_after_failure(&self, ctx: &RunContext, aggregator: &ResultAggregator) {
        let failing = aggregator.last_case().unwrap_or("");
        if failing == "RSD All Off" || failing == "Relay Off" {
            return;
        }

        if let Some((target, gateway)) = ctx.bound() {
            let (device, gateway) = (target.id.clone(), gateway.clone());
            if let Err(e) =
                self.client.set_output_state(&gateway, &device, RsdMask::ALL_OFF).await
            {
                warn!(error = %e, "cleanup: failed to drop RSD outputs");
            }
        }
        if let Err(e) = self.env.hardware.set_relay(false) {
            warn!(error = %e, "cleanup: failed to open relay");
        }
    }

    /// Pushes one sealed phase record; transient sink failures are logged,
    /// not fatal.
    async fn push(&self, aggregate: &AggregatedResult) {
        if let Err(e) = self.sink.push(aggregate).await {
            warn!(error = %e, "failed to push phase record");
        }
    }

    fn boot_record(&self) -> BootRecord {
        let config = &self.env.config;
        BootRecord {
            jig_id: config.jig_id.clone(),
            vendor: config.vendor.clone(),
            product: config.product.clone(),
            timezone: config.timezone.clone(),
            adc_scales: config.adc_scales,
            booted_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        stage_config, test_env, MockButton, MockConnectivity, MockIndicator, MockSink,
        ScriptedCase, TestEnv,
    };
    use pretty_assertions::assert_eq;

    struct Harness {
        machine: StageStateMachine,
        sink: Arc<MockSink>,
        indicator: Arc<MockIndicator>,
        button: Arc<MockButton>,
        pending: Arc<PendingStageCell>,
    }

    fn harness(env: TestEnv, button: MockButton, connectivity: MockConnectivity) -> Harness {
        let sink = Arc::new(MockSink::online());
        let indicator = Arc::new(MockIndicator::new());
        let button = Arc::new(button);
        let pending = Arc::new(PendingStageCell::new());
        let machine = StageStateMachine::new(
            env.env.clone(),
            env.client.clone(),
            sink.clone(),
            indicator.clone(),
            button.clone(),
            Arc::new(connectivity),
            pending.clone(),
        );
        Harness { machine, sink, indicator, button, pending }
    }

    fn scripted(
        harness: &mut Harness,
        self_test: Vec<Arc<dyn TestCase>>,
        sequence: Vec<Arc<dyn TestCase>>,
    ) {
        harness.machine.self_test_cases = self_test;
        harness.machine.sequence_cases = sequence;
    }

    #[tokio::test(start_paused = true)]
    async fn boot_wait_shows_distinct_codes_then_proceeds() {
        let env = test_env().build();
        let mut h = harness(
            env,
            MockButton::always(),
            MockConnectivity::script(vec![false], true),
        );
        h.sink = Arc::new(MockSink::with_health(vec![false], true));
        h.machine.sink = h.sink.clone();

        h.machine.boot_wait().await;

        let codes = h.indicator.codes();
        assert_eq!(codes, vec![6, 7]);
    }

    #[tokio::test]
    async fn boot_record_rides_on_first_self_test_only() {
        let env = test_env().build();
        let mut h = harness(env, MockButton::always(), MockConnectivity::online());
        scripted(&mut h, vec![Arc::new(ScriptedCase::pass("check"))], Vec::new());

        let first = h.machine.self_test_phase().await;
        let second = h.machine.self_test_phase().await;
        assert!(first.boot.is_some());
        assert!(second.boot.is_none());
    }

    #[tokio::test]
    async fn pending_switch_preempts_ready_wait() {
        let env = test_env().build();
        let mut h = harness(env, MockButton::limited(0), MockConnectivity::online());
        scripted(&mut h, vec![Arc::new(ScriptedCase::pass("check"))], Vec::new());
        h.pending.set(StageId::Two);

        let next = h.machine.run().await;
        assert_eq!(next, StageId::Two);
        // Exactly the self-test aggregate was pushed; the sequence never ran.
        assert_eq!(h.sink.pushes().len(), 1);
        assert_eq!(h.button.presses(), 0);
    }

    #[tokio::test]
    async fn stage_switch_waits_for_the_inflight_phase() {
        let env = test_env().build();
        let mut h = harness(env, MockButton::always(), MockConnectivity::online());
        let pending = h.pending.clone();
        let first = ScriptedCase::pass("first")
            .with_hook(move || pending.set(StageId::One));
        let second = ScriptedCase::pass("second");
        let second_calls = second.calls();
        scripted(
            &mut h,
            vec![Arc::new(ScriptedCase::pass("check"))],
            vec![Arc::new(first) as Arc<dyn TestCase>, Arc::new(second)],
        );

        let next = h.machine.run().await;
        assert_eq!(next, StageId::One);
        // The case after the signal still ran: the switch was honored only
        // at the phase boundary.
        assert_eq!(second_calls.get(), 1);
        // Self-test and the completed sequence were both pushed.
        let pushes = h.sink.pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[1].steps.len(), 2);
    }

    #[tokio::test]
    async fn sequence_failure_shows_code_and_needs_ack() {
        let env = test_env().build();
        // Press 1 triggers the sequence, press 2 acknowledges the failure.
        let mut h = harness(env, MockButton::limited(2), MockConnectivity::online());
        scripted(
            &mut h,
            vec![Arc::new(ScriptedCase::pass("check"))],
            vec![Arc::new(ScriptedCase::fail(
                "bad step",
                ErrorCode::ADC_VERIFICATION_FAIL,
            ))],
        );

        let sink = h.sink.clone();
        let indicator = h.indicator.clone();
        let button = h.button.clone();
        let runner = tokio::spawn(async move { h.machine.run().await });

        // Press 1 starts the sequence; its failure is pushed and displayed,
        // then press 2 acknowledges and the machine idles in ready with no
        // presses left.
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.pushes().len() < 2 || button.presses() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let pushes = sink.pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[1].code, ErrorCode::ADC_VERIFICATION_FAIL.value());
        assert!(indicator.codes().contains(&ErrorCode::ADC_VERIFICATION_FAIL.value()));
        runner.abort();
    }

    #[tokio::test]
    async fn self_test_failure_restarts_self_test_after_ack() {
        let env = test_env().build();
        let mut h = harness(env, MockButton::limited(1), MockConnectivity::online());
        let failing = ScriptedCase::fail("broken check", ErrorCode::GPIO_UNAVAILABLE);
        let failing_calls = failing.calls();
        scripted(&mut h, vec![Arc::new(failing)], Vec::new());

        let sink = h.sink.clone();
        let pending = h.pending.clone();
        let runner = tokio::spawn(async move { h.machine.run().await });

        // Two failed self-test aggregates: the initial run plus the rerun
        // triggered by the acknowledgement press.
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.pushes().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(failing_calls.get(), 2);
        assert!(sink.pushes().iter().all(|p| p.code == ErrorCode::GPIO_UNAVAILABLE.value()));

        // The machine is parked in fail-wait with no button presses left.
        pending.set(StageId::Three);
        runner.abort();
    }

    #[tokio::test]
    async fn sequence_runs_select_a_fresh_target_every_time() {
        let mut config = stage_config(StageId::Three);
        config.sequence = vec![crate::config::CaseSpec::BindTarget];
        config.self_test = vec![crate::config::CaseSpec::GpioAvailability];
        let env = test_env().with_config(config).build();
        env.bridge.set_neighbors(vec![("00000001", "conalog", "guard_2_1", -40)]);
        let bridge = env.bridge.clone();

        let h = harness(env, MockButton::limited(2), MockConnectivity::online());
        let sink = h.sink.clone();
        let mut machine = h.machine;
        let runner = tokio::spawn(async move { machine.run().await });

        // One self-test push plus two sequence pushes, one per press.
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.pushes().len() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // Even with the same device on the jig, every run re-discovers:
        // the neighbor list is reset and re-read once per sequence.
        assert_eq!(bridge.clear_calls(), 2);
        assert_eq!(bridge.neighbor_calls(), 2);
        runner.abort();
    }

    #[tokio::test]
    async fn failed_powered_step_triggers_deenergise_cleanup() {
        let env = test_env().build();
        let hardware = env.hardware.clone();
        let mut h = harness(env, MockButton::limited(2), MockConnectivity::online());
        scripted(
            &mut h,
            vec![Arc::new(ScriptedCase::pass("check"))],
            vec![Arc::new(ScriptedCase::fail(
                "ADC Check (rsd1)",
                ErrorCode::ADC_VERIFICATION_FAIL,
            ))],
        );

        let _ = h.machine.sequence_phase().await;
        // No target was bound, so only the relay cleanup applies.
        assert_eq!(hardware.relay_states(), vec![false]);
    }
}
