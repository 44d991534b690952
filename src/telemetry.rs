//! Periodic device monitor
//!
//! Polls the readbacks and buttons of every connected device and publishes
//! each sample as a JSON line on a broadcast channel consumed by `/api/events`.

use crate::devices::SharedDevices;
use crate::devices::power_supply::VOLTAGE_SCALE;
use crate::logging::{StructuredLogger, get_logger};
use crate::status::value_or_code;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// One monitor reading. Device fields are `None` when the device was not
/// polled: disconnected, or busy with a command (e.g. a timed turn-on).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: String,
    /// Raw current readback, or -1 when the read failed
    pub current: Option<i32>,
    /// Raw voltage readback, or -2 when the read failed
    pub voltage_raw: Option<i32>,
    pub voltage_volts: Option<f64>,
    pub forward_pressed: Option<bool>,
    pub reverse_pressed: Option<bool>,
    pub power_supply_connected: bool,
    pub step_motor_connected: bool,
    pub power_supply_busy: bool,
    pub step_motor_busy: bool,
}

impl TelemetrySample {
    fn new() -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            current: None,
            voltage_raw: None,
            voltage_volts: None,
            forward_pressed: None,
            reverse_pressed: None,
            power_supply_connected: false,
            step_motor_connected: false,
            power_supply_busy: false,
            step_motor_busy: false,
        }
    }
}

pub struct TelemetryMonitor {
    devices: SharedDevices,
    tx: broadcast::Sender<String>,
    period: Duration,
    logger: StructuredLogger,
}

impl TelemetryMonitor {
    pub fn new(devices: SharedDevices, period: Duration) -> Self {
        let (tx, _rx) = broadcast::channel::<String>(100);
        Self {
            devices,
            tx,
            period,
            logger: get_logger("telemetry"),
        }
    }

    /// Sender side of the sample channel, for late subscribers
    pub fn sender(&self) -> broadcast::Sender<String> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Take one sample without waiting for busy devices
    pub async fn sample(&self) -> TelemetrySample {
        let mut sample = TelemetrySample::new();

        match self.devices.power_supply.try_lock() {
            Ok(mut ps) => {
                sample.power_supply_connected = ps.is_connected();
                if sample.power_supply_connected {
                    let current = value_or_code(&ps.read_current().await);
                    let voltage = value_or_code(&ps.read_voltage().await);
                    sample.current = Some(current);
                    sample.voltage_raw = Some(voltage);
                    if voltage >= 0 {
                        sample.voltage_volts = Some(f64::from(voltage) / f64::from(VOLTAGE_SCALE));
                    }
                }
            }
            Err(_) => sample.power_supply_busy = true,
        }

        match self.devices.step_motor.try_lock() {
            Ok(mut motor) => {
                sample.step_motor_connected = motor.is_connected();
                if sample.step_motor_connected {
                    sample.forward_pressed = Some(motor.is_forward_button_pressed().await);
                    sample.reverse_pressed = Some(motor.is_reverse_button_pressed().await);
                }
            }
            Err(_) => sample.step_motor_busy = true,
        }

        sample
    }

    /// Sample and broadcast once
    pub async fn publish(&self) -> TelemetrySample {
        let sample = self.sample().await;
        match serde_json::to_string(&sample) {
            // No subscribers is fine
            Ok(line) => {
                let _ = self.tx.send(line);
            }
            Err(e) => self
                .logger
                .warn(&format!("Failed to encode telemetry sample: {}", e)),
        }
        sample
    }

    /// Run the monitor in the background. A zero period disables it.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if self.period.is_zero() {
            self.logger.info("Telemetry disabled");
            return None;
        }
        Some(tokio::spawn(async move {
            self.logger
                .info(&format!("Telemetry every {:?}", self.period));
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let sample = self.publish().await;
                self.logger.trace(&format!(
                    "Sample current={:?} voltage={:?}",
                    sample.current, sample.voltage_raw
                ));
            }
        }))
    }
}
