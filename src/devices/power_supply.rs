//! Power supply of the evaporator heater (slave 1)

use crate::devices::{ConnectFailure, ConnectStage, DeviceLink, POWER_SUPPLY_PROFILE};
use crate::error::EvaporatorError;
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::ModbusConnector;
use crate::status::PowerSupplyError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Holding register: current setpoint, raw units
pub const CURRENT_SETPOINT: u16 = 18;
/// Holding register: voltage setpoint in hundredths of a volt
pub const VOLTAGE_SETPOINT: u16 = 19;
/// Input register: measured current
pub const CURRENT_READBACK: u16 = 20;
/// Input register: measured voltage
pub const VOLTAGE_READBACK: u16 = 21;
/// Holding register: zero-point reset
pub const ZERO_POINT: u16 = 36;
/// Coil: output power
pub const POWER_COIL: u16 = 272;
/// Coil: work mode
pub const WORK_MODE_COIL: u16 = 273;

/// Setpoint register units per volt
pub const VOLTAGE_SCALE: u16 = 100;

pub struct PowerSupplyManager {
    link: DeviceLink,
    logger: StructuredLogger,
}

impl PowerSupplyManager {
    pub fn new(connector: Arc<dyn ModbusConnector>, response_timeout: Duration) -> Self {
        Self {
            link: DeviceLink::new(POWER_SUPPLY_PROFILE, connector, response_timeout),
            logger: get_logger("power_supply"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn port(&self) -> Option<&str> {
        self.link.port()
    }

    fn fail(&self, error: PowerSupplyError, cause: &EvaporatorError) -> PowerSupplyError {
        self.logger
            .error(&format!("{} (code {}): {}", error, error.code(), cause));
        error
    }

    /// Open the RTU line on `port` and address slave 1
    pub async fn connect(&mut self, port: &str) -> Result<(), PowerSupplyError> {
        self.logger.info(&format!("Connecting on {}", port));
        self.link
            .connect(port)
            .await
            .map_err(|ConnectFailure { stage, source }| {
                let error = match stage {
                    ConnectStage::Create => PowerSupplyError::InitConnection,
                    ConnectStage::SetSlave => PowerSupplyError::SetSlave,
                    ConnectStage::Establish => PowerSupplyError::Connect,
                };
                self.fail(error, &source)
            })?;
        self.logger.info(&format!("Connected on {}", port));
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if self.link.is_connected() {
            self.logger.info("Disconnecting");
        }
        self.link.release().await;
    }

    async fn write_register(
        &mut self,
        address: u16,
        value: u16,
        on_failure: PowerSupplyError,
    ) -> Result<(), PowerSupplyError> {
        self.link
            .write_register(address, value)
            .await
            .map_err(|e| self.fail(on_failure, &e))
    }

    async fn write_coil(
        &mut self,
        address: u16,
        value: bool,
        on_failure: PowerSupplyError,
    ) -> Result<(), PowerSupplyError> {
        self.link
            .write_bit(address, value)
            .await
            .map_err(|e| self.fail(on_failure, &e))
    }

    /// Write the current setpoint raw and the voltage setpoint in hundredths of a volt
    pub async fn set_current_voltage(
        &mut self,
        current: u16,
        voltage: u16,
    ) -> Result<(), PowerSupplyError> {
        self.logger
            .info(&format!("Setpoint current={} voltage={}V", current, voltage));
        self.write_register(CURRENT_SETPOINT, current, PowerSupplyError::SetCurrent)
            .await?;
        let Some(scaled) = voltage.checked_mul(VOLTAGE_SCALE) else {
            let cause = EvaporatorError::validation(
                "voltage".to_string(),
                format!("{}V does not fit the setpoint register", voltage),
            );
            return Err(self.fail(PowerSupplyError::SetVoltage, &cause));
        };
        self.write_register(VOLTAGE_SETPOINT, scaled, PowerSupplyError::SetVoltage)
            .await
    }

    pub async fn read_current(&mut self) -> Result<u16, PowerSupplyError> {
        self.link
            .read_input_register(CURRENT_READBACK)
            .await
            .map_err(|e| self.fail(PowerSupplyError::ReadCurrent, &e))
    }

    /// Raw voltage readback, hundredths of a volt
    pub async fn read_voltage(&mut self) -> Result<u16, PowerSupplyError> {
        self.link
            .read_input_register(VOLTAGE_READBACK)
            .await
            .map_err(|e| self.fail(PowerSupplyError::ReadVoltage, &e))
    }

    pub async fn turn_on(&mut self) -> Result<(), PowerSupplyError> {
        self.logger.info("Turning on");
        self.write_coil(POWER_COIL, true, PowerSupplyError::TurnOn)
            .await?;
        self.write_coil(WORK_MODE_COIL, true, PowerSupplyError::TurnOnWorkMode)
            .await
    }

    /// Zero both setpoints, then drop work mode and power. Stops at the first failure.
    pub async fn turn_off(&mut self) -> Result<(), PowerSupplyError> {
        self.logger.info("Turning off");
        self.write_register(CURRENT_SETPOINT, 0, PowerSupplyError::ResetCurrent)
            .await?;
        self.write_register(VOLTAGE_SETPOINT, 0, PowerSupplyError::ResetVoltage)
            .await?;
        self.write_coil(WORK_MODE_COIL, false, PowerSupplyError::ResetWorkMode)
            .await?;
        self.write_coil(POWER_COIL, false, PowerSupplyError::TurnOff)
            .await
    }

    pub async fn reset_zp(&mut self) -> Result<(), PowerSupplyError> {
        self.logger.info("Resetting zero point");
        self.write_register(ZERO_POINT, 0, PowerSupplyError::ResetZeroPoint)
            .await
    }

    /// Turn on, keep the output on for `minutes`, then turn off.
    ///
    /// Zero minutes only turns on. The caller is held for the whole interval.
    pub async fn turn_on_with_timer(&mut self, minutes: i32) -> Result<(), PowerSupplyError> {
        if minutes < 0 {
            self.logger
                .warn(&format!("Rejected timer of {} minutes", minutes));
            return Err(PowerSupplyError::UnsupportedTimerValue);
        }

        self.turn_on().await?;
        if minutes == 0 {
            return Ok(());
        }

        self.logger
            .info(&format!("Output on for {} min", minutes));
        sleep(Duration::from_secs(u64::from(minutes.unsigned_abs()) * 60)).await;
        self.turn_off().await
    }
}
