//! Shutter step motor (slave 3)

use crate::devices::{ConnectFailure, ConnectStage, DeviceLink, STEP_MOTOR_PROFILE};
use crate::error::EvaporatorError;
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::ModbusConnector;
use crate::status::StepMotorError;
use std::sync::Arc;
use std::time::Duration;

/// Forward-drive flag
pub const FORWARD_DRIVE: u16 = 512;
/// Reverse-drive flag
pub const REVERSE_DRIVE: u16 = 513;
/// Forward button state
pub const FORWARD_BUTTON: u16 = 514;
/// Reverse button state
pub const REVERSE_BUTTON: u16 = 515;

/// Button register value meaning "pressed"
const PRESSED: u16 = 1;

pub struct StepMotorManager {
    link: DeviceLink,
    logger: StructuredLogger,
}

impl StepMotorManager {
    pub fn new(connector: Arc<dyn ModbusConnector>, response_timeout: Duration) -> Self {
        Self {
            link: DeviceLink::new(STEP_MOTOR_PROFILE, connector, response_timeout),
            logger: get_logger("step_motor"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn port(&self) -> Option<&str> {
        self.link.port()
    }

    fn fail(&self, error: StepMotorError, cause: &EvaporatorError) -> StepMotorError {
        self.logger
            .error(&format!("{} (code {}): {}", error, error.code(), cause));
        error
    }

    /// Open the RTU line on `port` and address slave 3
    pub async fn connect(&mut self, port: &str) -> Result<(), StepMotorError> {
        self.logger.info(&format!("Connecting on {}", port));
        self.link
            .connect(port)
            .await
            .map_err(|ConnectFailure { stage, source }| {
                let error = match stage {
                    ConnectStage::Create => StepMotorError::InitConnection,
                    ConnectStage::SetSlave => StepMotorError::SetSlave,
                    ConnectStage::Establish => StepMotorError::Connect,
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

    pub async fn read_holding_register(&mut self, address: u16) -> Result<u16, StepMotorError> {
        self.link
            .read_holding_register(address)
            .await
            .map_err(|e| self.fail(StepMotorError::RegisterAccess, &e))
    }

    pub async fn write_register(&mut self, address: u16, value: u16) -> Result<(), StepMotorError> {
        self.link
            .write_register(address, value)
            .await
            .map_err(|e| self.fail(StepMotorError::RegisterAccess, &e))
    }

    async fn drive(
        &mut self,
        address: u16,
        value: u16,
        on_failure: StepMotorError,
    ) -> Result<(), StepMotorError> {
        self.link
            .write_register(address, value)
            .await
            .map_err(|e| self.fail(on_failure, &e))
    }

    /// Drive forward: 512 := 1, 513 := 0
    pub async fn open(&mut self) -> Result<(), StepMotorError> {
        self.logger.info("Opening shutter (forward)");
        self.drive(FORWARD_DRIVE, 1, StepMotorError::SetForward)
            .await?;
        self.drive(REVERSE_DRIVE, 0, StepMotorError::ResetReverse)
            .await
    }

    /// Drive reverse: 512 := 0, 513 := 1
    pub async fn close(&mut self) -> Result<(), StepMotorError> {
        self.logger.info("Closing shutter (reverse)");
        self.drive(FORWARD_DRIVE, 0, StepMotorError::ResetForward)
            .await?;
        self.drive(REVERSE_DRIVE, 1, StepMotorError::SetReverse)
            .await
    }

    pub async fn stop(&mut self) -> Result<(), StepMotorError> {
        self.logger.info("Stopping");
        self.drive(FORWARD_DRIVE, 0, StepMotorError::ResetForward)
            .await?;
        self.drive(REVERSE_DRIVE, 0, StepMotorError::ResetReverse)
            .await
    }

    async fn button(&mut self, address: u16) -> bool {
        matches!(self.read_holding_register(address).await, Ok(PRESSED))
    }

    /// A failed read counts as not pressed
    pub async fn is_forward_button_pressed(&mut self) -> bool {
        self.button(FORWARD_BUTTON).await
    }

    /// A failed read counts as not pressed
    pub async fn is_reverse_button_pressed(&mut self) -> bool {
        self.button(REVERSE_BUTTON).await
    }
}
