//! Mock implementations of the engine's collaborator traits.

use crate::cases::{CaseEnv, TestCase};
use crate::context::RunContext;
use crate::core::{AggregatedResult, TestResult};
use crate::device::{BeaconObservation, DeviceId, FactoryIds, GatewayId, GatewayInfo};
use crate::errors::ErrorCode;
use crate::hal::{
    ButtonInput, Connectivity, FirmwareToolchain, HalError, IndicatorPanel, IndicatorState,
    JigHardware, LabelData, LabelPrinter, SupplyReading,
};
use crate::protocol::{AdcSample, BridgeError, CommandFrame, MessageBridge, ResponseFrame};
use crate::report::{ArtifactStore, FirmwareImage, FirmwareKind, LogSink, SinkError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared call counter handed out by [`ScriptedCase::calls`].
#[derive(Clone, Default)]
pub struct CallCount(Arc<AtomicUsize>);

impl CallCount {
    /// Number of calls observed so far.
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// A case that returns a scripted result and records calls.
pub struct ScriptedCase {
    name: String,
    result: TestResult,
    calls: CallCount,
    hook: Mutex<Option<Hook>>,
}

impl ScriptedCase {
    /// A case that always passes.
    #[must_use]
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: TestResult::pass("scripted pass"),
            calls: CallCount::default(),
            hook: Mutex::new(None),
        }
    }

    /// A case that always fails with `code`.
    #[must_use]
    pub fn fail(name: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            name: name.into(),
            result: TestResult::fail(code, "scripted failure"),
            calls: CallCount::default(),
            hook: Mutex::new(None),
        }
    }

    /// Runs `hook` on every invocation (e.g. to signal a pending stage
    /// change mid-phase).
    #[must_use]
    pub fn with_hook(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        *self.hook.lock() = Some(Box::new(hook));
        self
    }

    /// Call counter handle.
    #[must_use]
    pub fn calls(&self) -> CallCount {
        self.calls.clone()
    }
}

#[async_trait]
impl TestCase for ScriptedCase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _env: &CaseEnv, _ctx: &mut RunContext) -> TestResult {
        self.calls.bump();
        if let Some(hook) = self.hook.lock().as_ref() {
            hook();
        }
        self.result.clone()
    }
}

/// A case that panics, for runner-boundary tests.
pub struct PanickingCase {
    message: String,
}

impl PanickingCase {
    /// Creates a case that panics with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[async_trait]
impl TestCase for PanickingCase {
    fn name(&self) -> &str {
        "Panicking Case"
    }

    async fn run(&self, _env: &CaseEnv, _ctx: &mut RunContext) -> TestResult {
        panic!("{}", self.message.clone());
    }
}

/// Scriptable in-memory [`MessageBridge`].
pub struct MockBridge {
    gateways: Mutex<Vec<GatewayInfo>>,
    neighbors: Mutex<Vec<BeaconObservation>>,
    adc: Mutex<Vec<AdcSample>>,
    response: Mutex<Option<ResponseFrame>>,
    delay: Mutex<Option<Duration>>,
    clear_calls: AtomicUsize,
    neighbor_calls: AtomicUsize,
    exchanged: Mutex<Vec<CommandFrame>>,
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBridge {
    /// A bridge with one gateway (`gw-1`) and nothing else scripted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            gateways: Mutex::new(vec![GatewayInfo {
                uid: GatewayId("gw-1".to_string()),
                version: Some("v1.0.0".to_string()),
            }]),
            neighbors: Mutex::new(Vec::new()),
            adc: Mutex::new(Vec::new()),
            response: Mutex::new(None),
            delay: Mutex::new(None),
            clear_calls: AtomicUsize::new(0),
            neighbor_calls: AtomicUsize::new(0),
            exchanged: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the gateway list.
    pub fn set_gateways(&self, uids: Vec<&str>) {
        *self.gateways.lock() = uids
            .into_iter()
            .map(|uid| GatewayInfo { uid: GatewayId(uid.to_string()), version: None })
            .collect();
    }

    /// Scripts the observations the next discovery returns, as
    /// `(id, vendor, product, rssi)` tuples.
    pub fn set_neighbors(&self, entries: Vec<(&str, &str, &str, i32)>) {
        *self.neighbors.lock() = entries
            .into_iter()
            .map(|(id, vendor, product, rssi)| BeaconObservation {
                id: DeviceId::new(id),
                rssi,
                vendor: vendor.to_string(),
                product: product.to_string(),
                version: None,
            })
            .collect();
    }

    /// Scripts the data response returned by subsequent exchanges.
    pub fn respond_with(&self, frame: ResponseFrame) {
        *self.response.lock() = Some(frame);
    }

    /// Delays every response by `delay` (for timeout tests).
    pub fn delay_responses(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Scripts the raw samples returned by ADC collection.
    pub fn set_adc_samples(&self, samples: Vec<AdcSample>) {
        *self.adc.lock() = samples;
    }

    /// Scripts one single-field sample per `(field, value)` entry.
    pub fn set_adc_fields(&self, entries: &[(&str, i64)]) {
        let samples = entries
            .iter()
            .map(|(field, value)| {
                AdcSample(std::iter::once(((*field).to_string(), *value)).collect())
            })
            .collect();
        self.set_adc_samples(samples);
    }

    /// How many times the neighbor list was cleared.
    #[must_use]
    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    /// How many neighbor snapshots were taken.
    #[must_use]
    pub fn neighbor_calls(&self) -> usize {
        self.neighbor_calls.load(Ordering::SeqCst)
    }

    /// Every command frame exchanged, in order.
    #[must_use]
    pub fn exchanged(&self) -> Vec<CommandFrame> {
        self.exchanged.lock().clone()
    }

    async fn apply_delay(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MessageBridge for MockBridge {
    async fn list_gateways(&self) -> Result<Vec<GatewayInfo>, BridgeError> {
        Ok(self.gateways.lock().clone())
    }

    async fn clear_neighbors(&self, _gateway: &GatewayId) -> Result<(), BridgeError> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn neighbors(
        &self,
        _gateway: &GatewayId,
    ) -> Result<Vec<BeaconObservation>, BridgeError> {
        self.neighbor_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.neighbors.lock().clone())
    }

    async fn exchange(
        &self,
        _gateway: &GatewayId,
        _target: &DeviceId,
        command: CommandFrame,
    ) -> Result<ResponseFrame, BridgeError> {
        self.exchanged.lock().push(command.clone());
        self.apply_delay().await;
        match command {
            CommandFrame::ReqShutdown { .. }
            | CommandFrame::ReqSetMpptConfig { .. }
            | CommandFrame::ReqEnableMppt { .. } => {
                Ok(ResponseFrame::Ack { command: command.name().to_string() })
            }
            _ => self
                .response
                .lock()
                .clone()
                .ok_or_else(|| BridgeError::Transport("no scripted response".to_string())),
        }
    }

    async fn collect_adc(
        &self,
        _gateway: &GatewayId,
        _target: &DeviceId,
        _window: Duration,
    ) -> Result<Vec<AdcSample>, BridgeError> {
        self.apply_delay().await;
        Ok(self.adc.lock().clone())
    }
}

/// Scriptable jig hardware.
pub struct MockHardware {
    gpio_error: Mutex<Option<String>>,
    adc_error: Mutex<Option<String>>,
    supply: Mutex<SupplyReading>,
    identity: Mutex<String>,
    relay_error: Mutex<Option<String>>,
    relay_states: Mutex<Vec<bool>>,
}

impl MockHardware {
    /// Hardware where everything works; identity is `jig-01`.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            gpio_error: Mutex::new(None),
            adc_error: Mutex::new(None),
            supply: Mutex::new(SupplyReading { v12_raw: 2400, v3v3_raw: 660 }),
            identity: Mutex::new("jig-01".to_string()),
            relay_error: Mutex::new(None),
            relay_states: Mutex::new(Vec::new()),
        }
    }

    /// Makes the GPIO check fail.
    pub fn fail_gpio(&self, message: &str) {
        *self.gpio_error.lock() = Some(message.to_string());
    }

    /// Makes the ADC status check fail.
    pub fn fail_adc(&self, message: &str) {
        *self.adc_error.lock() = Some(message.to_string());
    }

    /// Sets the supply reading.
    pub fn set_supply(&self, reading: SupplyReading) {
        *self.supply.lock() = reading;
    }

    /// Sets the reported jig identity.
    pub fn set_identity(&self, identity: &str) {
        *self.identity.lock() = identity.to_string();
    }

    /// Makes relay switching fail.
    pub fn fail_relay(&self, message: &str) {
        *self.relay_error.lock() = Some(message.to_string());
    }

    /// Every relay state commanded, in order.
    #[must_use]
    pub fn relay_states(&self) -> Vec<bool> {
        self.relay_states.lock().clone()
    }
}

impl JigHardware for MockHardware {
    fn gpio_available(&self) -> Result<(), HalError> {
        match self.gpio_error.lock().as_ref() {
            None => Ok(()),
            Some(message) => Err(HalError::new(message)),
        }
    }

    fn adc_status(&self) -> Result<(), HalError> {
        match self.adc_error.lock().as_ref() {
            None => Ok(()),
            Some(message) => Err(HalError::new(message)),
        }
    }

    fn read_supply_raw(&self) -> Result<SupplyReading, HalError> {
        Ok(*self.supply.lock())
    }

    fn set_relay(&self, on: bool) -> Result<(), HalError> {
        if let Some(message) = self.relay_error.lock().as_ref() {
            return Err(HalError::new(message));
        }
        self.relay_states.lock().push(on);
        Ok(())
    }

    fn read_identity(&self) -> Result<String, HalError> {
        Ok(self.identity.lock().clone())
    }
}

/// Scriptable flashing toolchain.
pub struct MockToolchain {
    present: AtomicBool,
    factory: Mutex<FactoryIds>,
    flash_error: Mutex<Option<String>>,
    flashes: AtomicUsize,
}

impl Default for MockToolchain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockToolchain {
    /// A toolchain with a probe attached and a fixed factory address.
    #[must_use]
    pub fn new() -> Self {
        Self {
            present: AtomicBool::new(true),
            factory: Mutex::new(FactoryIds { device_addr: "F1F2AABBCCDD".to_string() }),
            flash_error: Mutex::new(None),
            flashes: AtomicUsize::new(0),
        }
    }

    /// Detaches the probe.
    pub fn detach_probe(&self) {
        self.present.store(false, Ordering::SeqCst);
    }

    /// Makes flashing fail.
    pub fn fail_flash(&self, message: &str) {
        *self.flash_error.lock() = Some(message.to_string());
    }

    /// Number of flash invocations.
    #[must_use]
    pub fn flashes(&self) -> usize {
        self.flashes.load(Ordering::SeqCst)
    }
}

impl FirmwareToolchain for MockToolchain {
    fn probe_present(&self) -> Result<bool, HalError> {
        Ok(self.present.load(Ordering::SeqCst))
    }

    fn read_factory_ids(&self) -> Result<FactoryIds, HalError> {
        Ok(self.factory.lock().clone())
    }

    fn flash(&self, _bootloader: &[u8], _application: &[u8]) -> Result<(), HalError> {
        if let Some(message) = self.flash_error.lock().as_ref() {
            return Err(HalError::new(message));
        }
        self.flashes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scriptable artifact store.
pub struct MockArtifacts {
    error: Mutex<Option<String>>,
}

impl Default for MockArtifacts {
    fn default() -> Self {
        Self::new()
    }
}

impl MockArtifacts {
    /// A store that serves fixed images.
    #[must_use]
    pub fn new() -> Self {
        Self { error: Mutex::new(None) }
    }

    /// Makes every fetch fail.
    pub fn fail(&self, message: &str) {
        *self.error.lock() = Some(message.to_string());
    }
}

#[async_trait]
impl ArtifactStore for MockArtifacts {
    async fn fetch_latest(
        &self,
        _vendor: &str,
        _product: &str,
        kind: FirmwareKind,
    ) -> Result<FirmwareImage, SinkError> {
        if let Some(message) = self.error.lock().as_ref() {
            return Err(SinkError::Unreachable(message.clone()));
        }
        let (bytes, version) = match kind {
            FirmwareKind::Bootloader => (vec![0xB0; 16], "1.0.0"),
            FirmwareKind::Application => (vec![0xAB; 32], "2.3.0"),
        };
        Ok(FirmwareImage { bytes, version: version.to_string() })
    }
}

/// Scriptable label printer.
pub struct MockPrinter {
    available_error: Mutex<Option<String>>,
    print_error: Mutex<Option<String>>,
    printed: Mutex<Vec<LabelData>>,
}

impl Default for MockPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPrinter {
    /// A reachable printer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            available_error: Mutex::new(None),
            print_error: Mutex::new(None),
            printed: Mutex::new(Vec::new()),
        }
    }

    /// Makes the availability check fail.
    pub fn unavailable(&self, message: &str) {
        *self.available_error.lock() = Some(message.to_string());
    }

    /// Makes printing fail.
    pub fn fail_print(&self, message: &str) {
        *self.print_error.lock() = Some(message.to_string());
    }

    /// Every label printed, in order.
    #[must_use]
    pub fn printed(&self) -> Vec<LabelData> {
        self.printed.lock().clone()
    }
}

impl LabelPrinter for MockPrinter {
    fn available(&self) -> Result<(), HalError> {
        match self.available_error.lock().as_ref() {
            None => Ok(()),
            Some(message) => Err(HalError::new(message)),
        }
    }

    fn print(&self, label: &LabelData) -> Result<(), HalError> {
        if let Some(message) = self.print_error.lock().as_ref() {
            return Err(HalError::new(message));
        }
        self.printed.lock().push(label.clone());
        Ok(())
    }
}

/// Button that presses a scripted number of times, then stays silent.
pub struct MockButton {
    remaining: Mutex<Option<usize>>,
    presses: AtomicUsize,
}

impl MockButton {
    /// A button that presses on every wait.
    #[must_use]
    pub fn always() -> Self {
        Self { remaining: Mutex::new(None), presses: AtomicUsize::new(0) }
    }

    /// A button that presses `count` times, then never again.
    #[must_use]
    pub fn limited(count: usize) -> Self {
        Self { remaining: Mutex::new(Some(count)), presses: AtomicUsize::new(0) }
    }

    /// Number of waits that resolved.
    #[must_use]
    pub fn presses(&self) -> usize {
        self.presses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ButtonInput for MockButton {
    async fn wait_for_press(&self) {
        let allowed = {
            let mut remaining = self.remaining.lock();
            match remaining.as_mut() {
                None => true,
                Some(0) => false,
                Some(count) => {
                    *count -= 1;
                    true
                }
            }
        };
        if allowed {
            self.presses.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
        } else {
            futures::future::pending::<()>().await;
        }
    }
}

/// Indicator that records every write.
#[derive(Default)]
pub struct MockIndicator {
    codes: Mutex<Vec<u16>>,
    states: Mutex<Vec<IndicatorState>>,
}

impl MockIndicator {
    /// Creates a recording indicator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every code shown, in order.
    #[must_use]
    pub fn codes(&self) -> Vec<u16> {
        self.codes.lock().clone()
    }

    /// Every indicator state set, in order.
    #[must_use]
    pub fn states(&self) -> Vec<IndicatorState> {
        self.states.lock().clone()
    }
}

impl IndicatorPanel for MockIndicator {
    fn show_code(&self, code: u16) {
        self.codes.lock().push(code);
    }

    fn set_indicator(&self, state: IndicatorState) {
        self.states.lock().push(state);
    }
}

/// Connectivity probe with a scriptable prefix of outcomes.
pub struct MockConnectivity {
    script: Mutex<VecDeque<bool>>,
    default: bool,
}

impl MockConnectivity {
    /// Always online.
    #[must_use]
    pub fn online() -> Self {
        Self { script: Mutex::new(VecDeque::new()), default: true }
    }

    /// Returns the scripted outcomes first, then `default_after`.
    #[must_use]
    pub fn script(outcomes: Vec<bool>, default_after: bool) -> Self {
        Self { script: Mutex::new(outcomes.into()), default: default_after }
    }
}

impl Connectivity for MockConnectivity {
    fn network_reachable(&self) -> bool {
        self.script.lock().pop_front().unwrap_or(self.default)
    }
}

/// Recording log sink with scriptable health.
pub struct MockSink {
    health_script: Mutex<VecDeque<bool>>,
    default_healthy: bool,
    pushes: Mutex<Vec<AggregatedResult>>,
    config: Mutex<Option<serde_json::Value>>,
}

impl MockSink {
    /// A healthy sink.
    #[must_use]
    pub fn online() -> Self {
        Self {
            health_script: Mutex::new(VecDeque::new()),
            default_healthy: true,
            pushes: Mutex::new(Vec::new()),
            config: Mutex::new(None),
        }
    }

    /// Health checks return the scripted outcomes first, then
    /// `default_after`.
    #[must_use]
    pub fn with_health(outcomes: Vec<bool>, default_after: bool) -> Self {
        Self {
            health_script: Mutex::new(outcomes.into()),
            default_healthy: default_after,
            pushes: Mutex::new(Vec::new()),
            config: Mutex::new(None),
        }
    }

    /// Sets the jig configuration document the sink serves.
    pub fn set_config(&self, config: serde_json::Value) {
        *self.config.lock() = Some(config);
    }

    /// Every record pushed, in order.
    #[must_use]
    pub fn pushes(&self) -> Vec<AggregatedResult> {
        self.pushes.lock().clone()
    }
}

#[async_trait]
impl LogSink for MockSink {
    async fn health_check(&self) -> bool {
        self.health_script.lock().pop_front().unwrap_or(self.default_healthy)
    }

    async fn push(&self, record: &AggregatedResult) -> Result<(), SinkError> {
        self.pushes.lock().push(record.clone());
        Ok(())
    }

    async fn fetch_jig_config(
        &self,
        _jig_id: &str,
    ) -> Result<Option<serde_json::Value>, SinkError> {
        Ok(self.config.lock().clone())
    }
}
