//! Modbus RTU transport over a serial line
//!
//! Device managers never talk to tokio-modbus directly. They go through the
//! [`ModbusLike`] handle produced by a [`ModbusConnector`], which lets the
//! service swap the serial client for the in-memory simulator.

use crate::error::{EvaporatorError, Result};
use crate::logging::{StructuredLogger, get_logger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::{Context, rtu};
use tokio_modbus::prelude::*;

/// Highest unicast slave address on a Modbus line
pub const MAX_SLAVE_ID: u8 = 247;

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Everything needed to open one serial line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    /// Time to wait for each slave response
    pub response_timeout: Duration,
}

impl SerialSettings {
    /// Check the settings before anything touches the port
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(EvaporatorError::validation("port", "Serial port cannot be empty"));
        }
        if self.baud_rate == 0 {
            return Err(EvaporatorError::validation("baud_rate", "Must be greater than 0"));
        }
        data_bits(self.data_bits)?;
        stop_bits(self.stop_bits)?;
        if self.response_timeout.is_zero() {
            return Err(EvaporatorError::validation(
                "response_timeout",
                "Must be greater than 0",
            ));
        }
        Ok(())
    }

    fn builder(&self) -> Result<tokio_serial::SerialPortBuilder> {
        Ok(tokio_serial::new(self.port.as_str(), self.baud_rate)
            .parity(self.parity.into())
            .data_bits(data_bits(self.data_bits)?)
            .stop_bits(stop_bits(self.stop_bits)?)
            .timeout(self.response_timeout))
    }
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        _ => Err(EvaporatorError::validation(
            "data_bits".to_string(),
            format!("Unsupported data bits: {}", bits),
        )),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        _ => Err(EvaporatorError::validation(
            "stop_bits".to_string(),
            format!("Unsupported stop bits: {}", bits),
        )),
    }
}

/// An opened or openable Modbus line bound to one slave
#[async_trait]
pub trait ModbusLike: Send {
    /// Address every following request to `slave_id`
    fn set_slave(&mut self, slave_id: u8) -> Result<()>;

    /// Open the line
    async fn connect(&mut self) -> Result<()>;

    /// Close the line; closing a closed line is a no-op
    async fn close(&mut self);

    fn is_connected(&self) -> bool;

    async fn read_holding_register(&mut self, address: u16) -> Result<u16>;

    async fn read_input_register(&mut self, address: u16) -> Result<u16>;

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()>;

    async fn write_bit(&mut self, address: u16, value: bool) -> Result<()>;
}

/// Factory for line handles
pub trait ModbusConnector: Send + Sync {
    /// Build a handle for the given settings without opening it
    fn create(&self, settings: &SerialSettings) -> Result<Box<dyn ModbusLike>>;
}

/// Modbus RTU client over tokio-serial
pub struct RtuClient {
    settings: SerialSettings,
    slave: Option<Slave>,
    context: Option<Context>,
    logger: StructuredLogger,
}

impl RtuClient {
    /// Create a client; the port is not opened until [`ModbusLike::connect`]
    pub fn new(settings: SerialSettings) -> Result<Self> {
        settings.validate()?;
        let logger = get_logger("modbus").for_port(&settings.port);
        Ok(Self {
            settings,
            slave: None,
            context: None,
            logger,
        })
    }
}

fn not_connected() -> EvaporatorError {
    EvaporatorError::modbus("Not connected to Modbus slave")
}

fn first_word(words: Vec<u16>) -> Result<u16> {
    words
        .first()
        .copied()
        .ok_or_else(|| EvaporatorError::modbus("Empty register response"))
}

/// Await one request with the response timeout and flatten its nested result
async fn settle<T, F>(logger: &StructuredLogger, limit: Duration, what: &str, request: F) -> Result<T>
where
    F: Future<Output = tokio_modbus::Result<T>>,
{
    match timeout(limit, request).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(exception))) => {
            let error_msg = format!("{} rejected by slave: {:?}", what, exception);
            logger.debug(&error_msg);
            Err(EvaporatorError::modbus(error_msg))
        }
        Ok(Err(e)) => {
            let error_msg = format!("{} failed: {}", what, e);
            logger.debug(&error_msg);
            Err(EvaporatorError::modbus(error_msg))
        }
        Err(_) => {
            let error_msg = format!("{} timed out after {:?}", what, limit);
            logger.debug(&error_msg);
            Err(EvaporatorError::timeout(error_msg))
        }
    }
}

#[async_trait]
impl ModbusLike for RtuClient {
    fn set_slave(&mut self, slave_id: u8) -> Result<()> {
        if slave_id == 0 || slave_id > MAX_SLAVE_ID {
            return Err(EvaporatorError::validation(
                "slave_id".to_string(),
                format!("Slave address must be within 1..={}, got {}", MAX_SLAVE_ID, slave_id),
            ));
        }
        self.slave = Some(Slave(slave_id));
        if let Some(context) = self.context.as_mut() {
            context.set_slave(Slave(slave_id));
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let slave = self
            .slave
            .ok_or_else(|| EvaporatorError::modbus("Slave address not set"))?;
        self.close().await;

        self.logger.info(&format!(
            "Opening serial line at {} baud ({:?}, {} data bits, {} stop bits)",
            self.settings.baud_rate, self.settings.parity, self.settings.data_bits, self.settings.stop_bits
        ));
        let builder = self.settings.builder()?;
        let stream = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            let error_msg = format!("Failed to open {}: {}", self.settings.port, e);
            self.logger.error(&error_msg);
            EvaporatorError::serial(error_msg)
        })?;

        self.context = Some(rtu::attach_slave(stream, slave));
        self.logger
            .info(&format!("Serial line open, talking to slave {}", slave.0));
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut context) = self.context.take() {
            self.logger.info("Closing serial line");
            let _ = context.disconnect().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    async fn read_holding_register(&mut self, address: u16) -> Result<u16> {
        self.logger
            .trace(&format!("Reading holding register {}", address));
        let client = self.context.as_mut().ok_or_else(not_connected)?;
        let request = client.read_holding_registers(address, 1);
        let words = settle(
            &self.logger,
            self.settings.response_timeout,
            &format!("Read of holding register {}", address),
            request,
        )
        .await?;
        first_word(words)
    }

    async fn read_input_register(&mut self, address: u16) -> Result<u16> {
        self.logger
            .trace(&format!("Reading input register {}", address));
        let client = self.context.as_mut().ok_or_else(not_connected)?;
        let request = client.read_input_registers(address, 1);
        let words = settle(
            &self.logger,
            self.settings.response_timeout,
            &format!("Read of input register {}", address),
            request,
        )
        .await?;
        first_word(words)
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.logger
            .debug(&format!("Writing value {} to register {}", value, address));
        let client = self.context.as_mut().ok_or_else(not_connected)?;
        let request = client.write_single_register(address, value);
        settle(
            &self.logger,
            self.settings.response_timeout,
            &format!("Write of register {}", address),
            request,
        )
        .await
    }

    async fn write_bit(&mut self, address: u16, value: bool) -> Result<()> {
        self.logger
            .debug(&format!("Writing {} to coil {}", value, address));
        let client = self.context.as_mut().ok_or_else(not_connected)?;
        let request = client.write_single_coil(address, value);
        settle(
            &self.logger,
            self.settings.response_timeout,
            &format!("Write of coil {}", address),
            request,
        )
        .await
    }
}

/// Connector producing [`RtuClient`] handles
#[derive(Debug, Default, Clone, Copy)]
pub struct RtuConnector;

impl ModbusConnector for RtuConnector {
    fn create(&self, settings: &SerialSettings) -> Result<Box<dyn ModbusLike>> {
        Ok(Box::new(RtuClient::new(settings.clone())?))
    }
}

/// Names of the serial ports present on this machine
pub fn available_ports() -> Result<Vec<String>> {
    let mut ports: Vec<String> = tokio_serial::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect();
    ports.sort();
    Ok(ports)
}
