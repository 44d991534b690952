//! Integer status codes reported by device operations
//!
//! Every failing device operation maps to exactly one variant here, and every
//! variant maps to the integer code the host application expects: `0` for
//! success, a positive code per connection/write stage, a negative code for
//! read failures. Codes are local to one device; the power supply and the step
//! motor reuse the same numbers with different meanings.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Code returned by every successful operation
pub const STATUS_OK: i32 = 0;

/// The two devices driven by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    PowerSupply,
    StepMotor,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::PowerSupply => write!(f, "power_supply"),
            DeviceKind::StepMotor => write!(f, "step_motor"),
        }
    }
}

/// Common surface of the per-device error enums
pub trait DeviceStatus: Copy + std::error::Error {
    /// Device the code belongs to
    const DEVICE: DeviceKind;

    /// Integer code of this failure
    fn code(self) -> i32;
}

/// Power supply failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PowerSupplyError {
    #[error("Failed to initialize connection")]
    InitConnection,
    #[error("Failed to set device as slave")]
    SetSlave,
    #[error("Failed to connect to the device")]
    Connect,
    #[error("Failed to set current setpoint")]
    SetCurrent,
    #[error("Failed to set voltage setpoint")]
    SetVoltage,
    #[error("Failed to turn on the power supply")]
    TurnOn,
    #[error("Failed to activate work mode")]
    TurnOnWorkMode,
    #[error("Failed to reset current setpoint")]
    ResetCurrent,
    #[error("Failed to reset voltage setpoint")]
    ResetVoltage,
    #[error("Failed to reset work mode")]
    ResetWorkMode,
    #[error("Failed to turn off the power supply")]
    TurnOff,
    #[error("Failed to reset zero-point register")]
    ResetZeroPoint,
    #[error("Unsupported timer value")]
    UnsupportedTimerValue,
    #[error("Failed to read current register")]
    ReadCurrent,
    #[error("Failed to read voltage register")]
    ReadVoltage,
}

impl PowerSupplyError {
    pub const ALL: [PowerSupplyError; 15] = [
        PowerSupplyError::InitConnection,
        PowerSupplyError::SetSlave,
        PowerSupplyError::Connect,
        PowerSupplyError::SetCurrent,
        PowerSupplyError::SetVoltage,
        PowerSupplyError::TurnOn,
        PowerSupplyError::TurnOnWorkMode,
        PowerSupplyError::ResetCurrent,
        PowerSupplyError::ResetVoltage,
        PowerSupplyError::ResetWorkMode,
        PowerSupplyError::TurnOff,
        PowerSupplyError::ResetZeroPoint,
        PowerSupplyError::UnsupportedTimerValue,
        PowerSupplyError::ReadCurrent,
        PowerSupplyError::ReadVoltage,
    ];

    /// Integer code of this failure
    pub const fn code(self) -> i32 {
        match self {
            PowerSupplyError::InitConnection => 1,
            PowerSupplyError::SetSlave => 2,
            PowerSupplyError::Connect => 3,
            PowerSupplyError::SetCurrent => 4,
            PowerSupplyError::SetVoltage => 5,
            PowerSupplyError::TurnOn => 6,
            PowerSupplyError::TurnOnWorkMode => 7,
            PowerSupplyError::ResetCurrent => 8,
            PowerSupplyError::ResetVoltage => 9,
            PowerSupplyError::ResetWorkMode => 10,
            PowerSupplyError::TurnOff => 11,
            PowerSupplyError::ResetZeroPoint => 12,
            PowerSupplyError::UnsupportedTimerValue => 13,
            PowerSupplyError::ReadCurrent => -1,
            PowerSupplyError::ReadVoltage => -2,
        }
    }

    /// Reverse lookup of [`PowerSupplyError::code`]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.code() == code)
    }
}

impl DeviceStatus for PowerSupplyError {
    const DEVICE: DeviceKind = DeviceKind::PowerSupply;

    fn code(self) -> i32 {
        PowerSupplyError::code(self)
    }
}

/// Step motor failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StepMotorError {
    #[error("Failed to initialize connection")]
    InitConnection,
    #[error("Failed to set device as slave")]
    SetSlave,
    #[error("Failed to connect to the device")]
    Connect,
    /// Register 512 could not be set to 1
    #[error("Failed to start FORWARD mode (register 512 := 1)")]
    SetForward,
    /// Register 513 could not be set to 1
    #[error("Failed to start REVERSE mode (register 513 := 1)")]
    SetReverse,
    /// Register 512 could not be set to 0
    #[error("Failed to reset FORWARD mode (register 512 := 0)")]
    ResetForward,
    /// Register 513 could not be set to 0
    #[error("Failed to reset REVERSE mode (register 513 := 0)")]
    ResetReverse,
    /// Part of the code table only; no motor operation produces it.
    #[error("Shutter already closed")]
    ShutterAlreadyClosed,
    /// Shared failure of the single-register read/write primitives
    #[error("Failed to access holding register")]
    RegisterAccess,
}

impl StepMotorError {
    pub const ALL: [StepMotorError; 9] = [
        StepMotorError::InitConnection,
        StepMotorError::SetSlave,
        StepMotorError::Connect,
        StepMotorError::SetForward,
        StepMotorError::SetReverse,
        StepMotorError::ResetForward,
        StepMotorError::ResetReverse,
        StepMotorError::ShutterAlreadyClosed,
        StepMotorError::RegisterAccess,
    ];

    /// Integer code of this failure
    pub const fn code(self) -> i32 {
        match self {
            StepMotorError::InitConnection => 1,
            StepMotorError::SetSlave => 2,
            StepMotorError::Connect => 3,
            StepMotorError::SetForward => 4,
            StepMotorError::SetReverse => 5,
            StepMotorError::ResetForward => 6,
            StepMotorError::ResetReverse => 7,
            StepMotorError::ShutterAlreadyClosed => 8,
            StepMotorError::RegisterAccess => -1,
        }
    }

    /// Reverse lookup of [`StepMotorError::code`]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.code() == code)
    }
}

impl DeviceStatus for StepMotorError {
    const DEVICE: DeviceKind = DeviceKind::StepMotor;

    fn code(self) -> i32 {
        StepMotorError::code(self)
    }
}

/// Collapse a command result into its integer status
pub fn status_code<E: DeviceStatus>(result: &Result<(), E>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(e) => e.code(),
    }
}

/// Collapse a register read into the raw value or its (negative) code
pub fn value_or_code<E: DeviceStatus>(result: &Result<u16, E>) -> i32 {
    match result {
        Ok(value) => i32::from(*value),
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn power_supply_codes_are_distinct() {
        let codes: HashSet<i32> = PowerSupplyError::ALL.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), PowerSupplyError::ALL.len());
        assert!(!codes.contains(&STATUS_OK));
    }

    #[test]
    fn step_motor_codes_are_distinct() {
        let codes: HashSet<i32> = StepMotorError::ALL.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), StepMotorError::ALL.len());
        assert!(!codes.contains(&STATUS_OK));
    }

    #[test]
    fn read_failures_are_negative() {
        assert_eq!(PowerSupplyError::ReadCurrent.code(), -1);
        assert_eq!(PowerSupplyError::ReadVoltage.code(), -2);
        assert_eq!(StepMotorError::RegisterAccess.code(), -1);
    }

    #[test]
    fn from_code_inverts_code() {
        for e in PowerSupplyError::ALL {
            assert_eq!(PowerSupplyError::from_code(e.code()), Some(e));
        }
        for e in StepMotorError::ALL {
            assert_eq!(StepMotorError::from_code(e.code()), Some(e));
        }
        assert_eq!(PowerSupplyError::from_code(0), None);
        assert_eq!(StepMotorError::from_code(42), None);
    }

    #[test]
    fn status_helpers() {
        assert_eq!(status_code::<PowerSupplyError>(&Ok(())), STATUS_OK);
        assert_eq!(status_code(&Err(StepMotorError::ResetReverse)), 7);
        assert_eq!(value_or_code::<PowerSupplyError>(&Ok(512)), 512);
        assert_eq!(value_or_code::<PowerSupplyError>(&Err(PowerSupplyError::ReadVoltage)), -2);
    }
}
