//! # Evaporator - Modbus RTU driver for a thermal evaporation rig
//!
//! Drives the heater power supply (slave 1, 19200-N-8-1) and the shutter step
//! motor (slave 3, 115200-N-8-1) of a thermoresistive evaporator over Modbus
//! RTU, and exposes both over a small HTTP API.
//!
//! ## Architecture
//!
//! - `config`: YAML configuration and validation
//! - `logging`: Structured logging and tracing
//! - `modbus`: RTU transport and the `ModbusLike` seam
//! - `devices`: Power supply and step motor managers
//! - `status`: Integer-coded device errors
//! - `messages`: English and Russian status messages
//! - `api`: Flat integer-returning operations
//! - `session`: Operator start/stop sessions with countdown
//! - `simulator`: In-memory slaves for tests and `simulate: true`
//! - `telemetry`: Periodic readback monitor
//! - `web`: HTTP server and REST API

pub mod api;
pub mod config;
pub mod devices;
pub mod error;
pub mod logging;
pub mod messages;
pub mod modbus;
pub mod session;
pub mod simulator;
pub mod status;
pub mod telemetry;
pub mod web;

mod web_tests;

// Re-export commonly used types
pub use config::Config;
pub use devices::{PowerSupplyManager, SharedDevices, StepMotorManager};
pub use error::{EvaporatorError, Result};
pub use status::{PowerSupplyError, StepMotorError};
