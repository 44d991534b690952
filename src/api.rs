//! Flat integer-returning operations
//!
//! Thin wrappers for hosts that want the plain integer contract: `0` on
//! success, the device's error code otherwise, or the raw register value for
//! reads. Each takes its manager explicitly.

use crate::devices::{PowerSupplyManager, StepMotorManager};
use crate::status::{status_code, value_or_code};

pub async fn power_supply_connect(ps: &mut PowerSupplyManager, port: &str) -> i32 {
    status_code(&ps.connect(port).await)
}

pub async fn set_current_voltage(ps: &mut PowerSupplyManager, current: u16, voltage: u16) -> i32 {
    status_code(&ps.set_current_voltage(current, voltage).await)
}

pub async fn turn_on(ps: &mut PowerSupplyManager) -> i32 {
    status_code(&ps.turn_on().await)
}

pub async fn turn_off(ps: &mut PowerSupplyManager) -> i32 {
    status_code(&ps.turn_off().await)
}

/// Raw current readback, or -1
pub async fn read_current(ps: &mut PowerSupplyManager) -> i32 {
    value_or_code(&ps.read_current().await)
}

/// Raw voltage readback (hundredths of a volt), or -2
pub async fn read_voltage(ps: &mut PowerSupplyManager) -> i32 {
    value_or_code(&ps.read_voltage().await)
}

pub async fn reset_zp(ps: &mut PowerSupplyManager) -> i32 {
    status_code(&ps.reset_zp().await)
}

pub async fn turn_on_with_timer(ps: &mut PowerSupplyManager, minutes: i32) -> i32 {
    status_code(&ps.turn_on_with_timer(minutes).await)
}

pub async fn step_motor_connect(motor: &mut StepMotorManager, port: &str) -> i32 {
    status_code(&motor.connect(port).await)
}

/// Open the shutter
pub async fn forward(motor: &mut StepMotorManager) -> i32 {
    status_code(&motor.open().await)
}

/// Close the shutter
pub async fn reverse(motor: &mut StepMotorManager) -> i32 {
    status_code(&motor.close().await)
}

pub async fn stop(motor: &mut StepMotorManager) -> i32 {
    status_code(&motor.stop().await)
}

/// 1 when the forward button is pressed, 0 otherwise
pub async fn is_forward_pressed(motor: &mut StepMotorManager) -> i32 {
    i32::from(motor.is_forward_button_pressed().await)
}

/// 1 when the reverse button is pressed, 0 otherwise
pub async fn is_reverse_pressed(motor: &mut StepMotorManager) -> i32 {
    i32::from(motor.is_reverse_button_pressed().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedConnector;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_flat_codes() {
        let connector = SimulatedConnector::new();
        let mut ps = PowerSupplyManager::new(Arc::new(connector.clone()), Duration::from_millis(50));
        assert_eq!(read_current(&mut ps).await, -1);
        assert_eq!(power_supply_connect(&mut ps, "COM1").await, 0);

        connector.bus().set_input(21, 1234);
        assert_eq!(read_voltage(&mut ps).await, 1234);
        assert_eq!(turn_on_with_timer(&mut ps, -1).await, 13);

        connector.bus().fail_transaction(2);
        assert_eq!(turn_on(&mut ps).await, 7);
    }

    #[tokio::test]
    async fn test_flat_motor() {
        let connector = SimulatedConnector::new();
        let mut motor = StepMotorManager::new(Arc::new(connector.clone()), Duration::from_millis(50));
        assert_eq!(forward(&mut motor).await, 4);
        assert_eq!(step_motor_connect(&mut motor, "COM2").await, 0);
        assert_eq!(forward(&mut motor).await, 0);
        connector.bus().fail_transaction(1);
        assert_eq!(reverse(&mut motor).await, 6);
        assert_eq!(stop(&mut motor).await, 0);
        assert_eq!(is_reverse_pressed(&mut motor).await, 0);
        connector.bus().set_holding(514, 1);
        assert_eq!(is_forward_pressed(&mut motor).await, 1);
    }
}
