//! Self-test cases: jig hardware health, independent of any target device.

use super::{CaseEnv, TestCase};
use crate::config::Peripheral;
use crate::context::RunContext;
use crate::core::TestResult;
use crate::errors::{ErrorCode, ErrorKind};
use async_trait::async_trait;

/// GPIO subsystem availability.
pub struct GpioCase;

#[async_trait]
impl TestCase for GpioCase {
    fn name(&self) -> &str {
        "GPIO Check"
    }

    async fn run(&self, env: &CaseEnv, _ctx: &mut RunContext) -> TestResult {
        match env.hardware.gpio_available() {
            Ok(()) => TestResult::pass("GPIO is available"),
            Err(e) => TestResult::fail(ErrorCode::GPIO_UNAVAILABLE, format!("GPIO unavailable: {e}")),
        }
    }
}

/// Presence check for one jig peripheral.
pub struct PeripheralCase {
    peripheral: Peripheral,
    name: &'static str,
}

impl PeripheralCase {
    /// Creates a presence check for `peripheral`.
    #[must_use]
    pub fn new(peripheral: Peripheral) -> Self {
        let name = match peripheral {
            Peripheral::AdcSensor => "ADC Sensor Check",
            Peripheral::DebugProbe => "Debug Probe Check",
            Peripheral::Gateway => "Gateway Check",
            Peripheral::LabelPrinter => "Printer Check",
        };
        Self { peripheral, name }
    }
}

#[async_trait]
impl TestCase for PeripheralCase {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, env: &CaseEnv, _ctx: &mut RunContext) -> TestResult {
        match self.peripheral {
            Peripheral::AdcSensor => match env.hardware.adc_status() {
                Ok(()) => TestResult::pass("ADC sensor is connected"),
                Err(e) => TestResult::fail(ErrorCode::ADC_SENSOR_NOT_FOUND, e.to_string()),
            },
            Peripheral::DebugProbe => match env.toolchain.probe_present() {
                Ok(true) => TestResult::pass("Debug probe is connected"),
                Ok(false) => {
                    TestResult::fail(ErrorCode::DEBUG_PROBE_NOT_FOUND, "debug probe not found")
                }
                Err(e) => TestResult::fail(
                    ErrorCode::DEBUG_PROBE_NOT_FOUND,
                    format!("probe check error: {e}"),
                ),
            },
            Peripheral::Gateway => {
                let bound = env.config.protocol_timeout;
                match tokio::time::timeout(bound, env.bridge.list_gateways()).await {
                    Ok(Ok(gateways)) => match gateways.first() {
                        Some(gateway) => TestResult::pass(format!(
                            "Gateway connected. Version: {}",
                            gateway.version.as_deref().unwrap_or("unknown")
                        )),
                        None => TestResult::fail(
                            ErrorCode::GATEWAY_NOT_FOUND,
                            "no active gateway found",
                        ),
                    },
                    Ok(Err(e)) => TestResult::fail(
                        ErrorCode::GATEWAY_NOT_FOUND,
                        format!("gateway check error: {e}"),
                    ),
                    Err(_) => TestResult::fail_with_kind(
                        ErrorCode::GATEWAY_NOT_FOUND,
                        ErrorKind::ProtocolTimeout,
                        "gateway enumeration timed out",
                    ),
                }
            }
            Peripheral::LabelPrinter => match env.printer.available() {
                Ok(()) => TestResult::pass("Label printer is reachable"),
                Err(e) => TestResult::fail(ErrorCode::PRINTER_NOT_FOUND, e.to_string()),
            },
        }
    }
}

/// Jig identity matches the configured id.
pub struct JigIdentityCase;

#[async_trait]
impl TestCase for JigIdentityCase {
    fn name(&self) -> &str {
        "Jig ID Check"
    }

    async fn run(&self, env: &CaseEnv, _ctx: &mut RunContext) -> TestResult {
        match env.hardware.read_identity() {
            Ok(identity) if identity == env.config.jig_id => {
                TestResult::pass(format!("Jig ID is valid: {identity}"))
            }
            Ok(identity) => TestResult::fail(
                ErrorCode::JIG_ID_MISMATCH,
                format!("Jig ID mismatch (expected: {}, found: {identity})", env.config.jig_id),
            ),
            Err(e) => TestResult::fail(
                ErrorCode::JIG_ID_MISMATCH,
                format!("Jig ID check error: {e}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_env, MockHardware};
    use std::sync::Arc;

    #[tokio::test]
    async fn gpio_failure_maps_to_its_code() {
        let hardware = Arc::new(MockHardware::healthy());
        hardware.fail_gpio("no permission");
        let env = test_env().with_hardware(hardware).build();
        let mut ctx = env.fresh_context();

        let result = GpioCase.run(&env.env, &mut ctx).await;
        assert_eq!(result.code, Some(ErrorCode::GPIO_UNAVAILABLE));
    }

    #[tokio::test]
    async fn missing_gateway_fails_presence_check() {
        let env = test_env().build();
        env.bridge.set_gateways(Vec::new());
        let mut ctx = env.fresh_context();

        let result = PeripheralCase::new(Peripheral::Gateway).run(&env.env, &mut ctx).await;
        assert_eq!(result.code, Some(ErrorCode::GATEWAY_NOT_FOUND));
    }

    #[tokio::test]
    async fn identity_mismatch_reports_both_ids() {
        let hardware = Arc::new(MockHardware::healthy());
        hardware.set_identity("jig-99");
        let env = test_env().with_hardware(hardware).build();
        let mut ctx = env.fresh_context();

        let result = JigIdentityCase.run(&env.env, &mut ctx).await;
        assert_eq!(result.code, Some(ErrorCode::JIG_ID_MISMATCH));
        assert!(result.message.contains("jig-99"));
    }
}
