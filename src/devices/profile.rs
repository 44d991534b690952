use crate::modbus::{Parity, SerialSettings};
use crate::status::DeviceKind;
use serde::Serialize;
use std::time::Duration;

/// Fixed line parameters and slave address of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub slave_id: u8,
}

/// Power supply: 19200-N-8-1, slave 1
pub const POWER_SUPPLY_PROFILE: DeviceProfile = DeviceProfile {
    kind: DeviceKind::PowerSupply,
    baud_rate: 19200,
    parity: Parity::None,
    data_bits: 8,
    stop_bits: 1,
    slave_id: 1,
};

/// Step motor: 115200-N-8-1, slave 3
pub const STEP_MOTOR_PROFILE: DeviceProfile = DeviceProfile {
    kind: DeviceKind::StepMotor,
    baud_rate: 115200,
    parity: Parity::None,
    data_bits: 8,
    stop_bits: 1,
    slave_id: 3,
};

impl DeviceProfile {
    pub fn serial_settings(&self, port: &str, response_timeout: Duration) -> SerialSettings {
        SerialSettings {
            port: port.to_string(),
            baud_rate: self.baud_rate,
            parity: self.parity,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            response_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        let s = POWER_SUPPLY_PROFILE.serial_settings("COM1", Duration::from_millis(500));
        assert_eq!(s.baud_rate, 19200);
        assert_eq!(s.parity, Parity::None);
        assert_eq!((s.data_bits, s.stop_bits), (8, 1));
        assert!(s.validate().is_ok());

        assert_eq!(STEP_MOTOR_PROFILE.baud_rate, 115200);
        assert_eq!(STEP_MOTOR_PROFILE.slave_id, 3);
        assert_eq!(POWER_SUPPLY_PROFILE.slave_id, 1);
    }
}
