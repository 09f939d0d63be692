//! Hardware abstraction seams.
//!
//! Everything here is an external collaborator: GPIO, jig ADC, indicator,
//! button, flashing toolchain, printer. The engine only ever sees these
//! traits; a driver failure becomes a failed [`TestResult`](crate::core::TestResult)
//! with a dedicated code, never a process fault.
//!
//! Calls are synchronous by contract: hardware I/O is expected to block the
//! single worker, since only one test may be in flight against the one
//! target at a time. The button is the exception: it is an edge the worker
//! awaits.

use crate::device::FactoryIds;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Driver-level failure, carried into a failed step result.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HalError(pub String);

impl HalError {
    /// Creates a driver error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Raw jig supply-rail reading, in ADC counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyReading {
    /// 12 V rail, raw counts.
    pub v12_raw: i64,
    /// 3.3 V rail, raw counts.
    pub v3v3_raw: i64,
}

/// Jig-side GPIO, ADC and relay drivers.
pub trait JigHardware: Send + Sync {
    /// Verifies the GPIO subsystem is usable.
    fn gpio_available(&self) -> Result<(), HalError>;

    /// Verifies the jig ADC sensor responds.
    fn adc_status(&self) -> Result<(), HalError>;

    /// Samples the jig supply rails.
    fn read_supply_raw(&self) -> Result<SupplyReading, HalError>;

    /// Switches the jig power relay.
    fn set_relay(&self, on: bool) -> Result<(), HalError>;

    /// Reads the jig's own identity (provisioned hostname or EEPROM id).
    fn read_identity(&self) -> Result<String, HalError>;
}

/// Operator-facing indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    /// Boot/self-test in progress.
    Loading,
    /// Idle, awaiting the trigger button.
    Ready,
    /// A phase is executing.
    Busy,
    /// A phase failed; awaiting acknowledgement.
    Fail,
}

/// Display and LED indicator.
///
/// Writes are fire-and-forget; a broken display must not stop the engine,
/// so implementations swallow their own errors.
pub trait IndicatorPanel: Send + Sync {
    /// Shows a numeric code on the 7-segment display (`0` clears).
    fn show_code(&self, code: u16);

    /// Sets the LED indicator.
    fn set_indicator(&self, state: IndicatorState);
}

/// The operator button.
///
/// Implementations must report only edges observed *after* the call;
/// presses that happened while nobody was waiting are not queued. The
/// engine awaits this only in the ready and fail-wait states.
#[async_trait]
pub trait ButtonInput: Send + Sync {
    /// Resolves on the next press edge.
    async fn wait_for_press(&self);
}

/// Network reachability probe, used only during boot-wait.
pub trait Connectivity: Send + Sync {
    /// True if the network is reachable; implementations bound their own
    /// probe time.
    fn network_reachable(&self) -> bool;
}

/// Wired flashing toolchain (debug probe).
///
/// Operations may take seconds and intentionally block the worker.
#[cfg_attr(test, mockall::automock)]
pub trait FirmwareToolchain: Send + Sync {
    /// True if a debug probe is attached.
    fn probe_present(&self) -> Result<bool, HalError>;

    /// Reads the factory-programmed identifiers from the attached device.
    fn read_factory_ids(&self) -> Result<FactoryIds, HalError>;

    /// Erases the device and flashes bootloader + application.
    fn flash(&self, bootloader: &[u8], application: &[u8]) -> Result<(), HalError>;
}

/// Structured label content; rendering and spooling are external.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelData {
    /// Combined 12-hex-char device id.
    pub device_id: String,
    /// Model designation.
    pub model: String,
    /// Certifying company.
    pub authenticator: String,
    /// Certification number.
    pub kc_no: String,
    /// Production year-month, `YYYY-MM`.
    pub yyyymm: String,
    /// QR payload.
    pub qr_text: String,
}

/// Label printer driver.
#[cfg_attr(test, mockall::automock)]
pub trait LabelPrinter: Send + Sync {
    /// True if the printer is reachable.
    fn available(&self) -> Result<(), HalError>;

    /// Renders and spools one label.
    fn print(&self, label: &LabelData) -> Result<(), HalError>;
}
