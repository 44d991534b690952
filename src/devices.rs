//! Managers for the two Modbus slaves of the evaporator rig
//!
//! Each manager owns a [`DeviceLink`], issues its register transactions one
//! at a time and reports failures as the integer-coded errors of
//! [`crate::status`].

mod link;
pub mod power_supply;
mod profile;
pub mod step_motor;

pub use link::{ConnectFailure, ConnectStage, DeviceLink};
pub use power_supply::PowerSupplyManager;
pub use profile::{DeviceProfile, POWER_SUPPLY_PROFILE, STEP_MOTOR_PROFILE};
pub use step_motor::StepMotorManager;

use crate::logging::get_logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};

/// Both managers behind the locks that serialize access from the web layer
/// and the telemetry monitor
#[derive(Clone)]
pub struct SharedDevices {
    pub power_supply: Arc<Mutex<PowerSupplyManager>>,
    pub step_motor: Arc<Mutex<StepMotorManager>>,
    stopping: Arc<watch::Sender<bool>>,
}

impl SharedDevices {
    pub fn new(power_supply: PowerSupplyManager, step_motor: StepMotorManager) -> Self {
        Self {
            power_supply: Arc::new(Mutex::new(power_supply)),
            step_motor: Arc::new(Mutex::new(step_motor)),
            stopping: Arc::new(watch::channel(false).0),
        }
    }

    pub fn is_stopping(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Resolves once [`SharedDevices::shutdown`] has begun
    ///
    /// Long-running commands race against this so they give their device
    /// lock back during shutdown.
    pub async fn stopping(&self) {
        let mut rx = self.stopping.subscribe();
        // The sender lives in self, so this only returns once the flag is set
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Turn the power supply off, stop the motor and release both lines
    ///
    /// Each device lock is awaited for at most `wait`; a device still busy
    /// after that is left untouched and logged.
    pub async fn shutdown(&self, wait: Duration) {
        let logger = get_logger("shutdown");
        self.stopping.send_replace(true);

        match tokio::time::timeout(wait, self.power_supply.lock()).await {
            Ok(mut ps) => {
                if ps.is_connected()
                    && let Err(e) = ps.turn_off().await
                {
                    logger.error(&format!("Power supply not turned off: {} (code {})", e, e.code()));
                }
                ps.disconnect().await;
            }
            Err(_) => logger.error(&format!(
                "Power supply still busy after {:?}; left as is",
                wait
            )),
        }

        match tokio::time::timeout(wait, self.step_motor.lock()).await {
            Ok(mut motor) => {
                if motor.is_connected()
                    && let Err(e) = motor.stop().await
                {
                    logger.error(&format!("Step motor not stopped: {} (code {})", e, e.code()));
                }
                motor.disconnect().await;
            }
            Err(_) => logger.error(&format!(
                "Step motor still busy after {:?}; left as is",
                wait
            )),
        }
    }
}
