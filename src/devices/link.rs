use crate::devices::DeviceProfile;
use crate::error::{EvaporatorError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::modbus::{ModbusConnector, ModbusLike};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Step of the connection sequence that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    /// Building the transport handle
    Create,
    /// Addressing the slave
    SetSlave,
    /// Opening the line
    Establish,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStage::Create => write!(f, "create"),
            ConnectStage::SetSlave => write!(f, "set_slave"),
            ConnectStage::Establish => write!(f, "establish"),
        }
    }
}

#[derive(Debug, Error)]
#[error("connect stage {stage} failed: {source}")]
pub struct ConnectFailure {
    pub stage: ConnectStage,
    pub source: EvaporatorError,
}

/// At most one live Modbus handle for one device
pub struct DeviceLink {
    profile: DeviceProfile,
    connector: Arc<dyn ModbusConnector>,
    response_timeout: Duration,
    handle: Option<Box<dyn ModbusLike>>,
    port: Option<String>,
    logger: StructuredLogger,
}

impl DeviceLink {
    pub fn new(
        profile: DeviceProfile,
        connector: Arc<dyn ModbusConnector>,
        response_timeout: Duration,
    ) -> Self {
        let logger = get_logger_with_context(
            LogContext::new("link")
                .with_slave_id(profile.slave_id)
                .with_field("device", profile.kind.to_string()),
        );
        Self {
            profile,
            connector,
            response_timeout,
            handle: None,
            port: None,
            logger,
        }
    }

    /// Port of the live handle
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_connected())
    }

    /// Replace any live handle with a fresh one on `port`.
    ///
    /// The previous handle is closed first. A handle that fails partway is
    /// closed and dropped before the error is returned, so the link is left
    /// disconnected.
    pub async fn connect(&mut self, port: &str) -> std::result::Result<(), ConnectFailure> {
        self.release().await;

        let settings = self.profile.serial_settings(port, self.response_timeout);
        let mut handle = self.connector.create(&settings).map_err(|source| ConnectFailure {
            stage: ConnectStage::Create,
            source,
        })?;

        if let Err(source) = handle.set_slave(self.profile.slave_id) {
            handle.close().await;
            return Err(ConnectFailure {
                stage: ConnectStage::SetSlave,
                source,
            });
        }

        if let Err(source) = handle.connect().await {
            handle.close().await;
            return Err(ConnectFailure {
                stage: ConnectStage::Establish,
                source,
            });
        }

        self.logger.debug(&format!("Handle live on {}", port));
        self.handle = Some(handle);
        self.port = Some(port.to_string());
        Ok(())
    }

    /// Close and drop the live handle, if any
    pub async fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            self.logger.debug(&format!(
                "Releasing handle on {}",
                self.port.as_deref().unwrap_or("?")
            ));
            handle.close().await;
        }
        self.port = None;
    }

    fn handle_mut(&mut self) -> Result<&mut Box<dyn ModbusLike>> {
        self.handle
            .as_mut()
            .ok_or_else(|| EvaporatorError::modbus(format!("{} is not connected", self.profile.kind)))
    }

    pub async fn read_holding_register(&mut self, address: u16) -> Result<u16> {
        self.handle_mut()?.read_holding_register(address).await
    }

    pub async fn read_input_register(&mut self, address: u16) -> Result<u16> {
        self.handle_mut()?.read_input_register(address).await
    }

    pub async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.handle_mut()?.write_register(address, value).await
    }

    pub async fn write_bit(&mut self, address: u16, value: bool) -> Result<()> {
        self.handle_mut()?.write_bit(address, value).await
    }
}
