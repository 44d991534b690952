//! Evaporation sessions
//!
//! A session is the operator's start/stop cycle over the power supply:
//! turn on, apply the setpoint, read the output back, reset the zero point,
//! then either count down to an automatic turn-off or run until stopped.
//! The countdown runs in its own task and does not hold the power supply
//! lock, so readbacks and a stop request go through while it is pending.

use crate::devices::SharedDevices;
use crate::logging::{StructuredLogger, get_logger};
use crate::status::{PowerSupplyError, value_or_code};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Highest current setpoint the crucible tolerates, in amperes
pub const MAX_CURRENT: u16 = 200;
/// Setpoints from here up risk overheating the crucible
pub const OVERHEAT_WARNING_CURRENT: u16 = 160;
/// Voltage setpoint of a session when the request names none
pub const DEFAULT_VOLTAGE: u16 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentLevel {
    Normal,
    NearLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Current setpoint {0} A is outside 0-200 A")]
    CurrentOutOfRange(u16),
    #[error("Countdown must be longer than zero seconds")]
    EmptyCountdown,
    #[error("A session is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Device(#[from] PowerSupplyError),
}

/// Accept a current setpoint of at most [`MAX_CURRENT`]
pub fn check_current(current: u16) -> Result<CurrentLevel, SessionError> {
    match current {
        c if c > MAX_CURRENT => Err(SessionError::CurrentOutOfRange(c)),
        c if c >= OVERHEAT_WARNING_CURRENT => Ok(CurrentLevel::NearLimit),
        _ => Ok(CurrentLevel::Normal),
    }
}

fn default_voltage() -> u16 {
    DEFAULT_VOLTAGE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Amperes
    pub current: u16,
    /// Volts
    #[serde(default = "default_voltage")]
    pub voltage: u16,
    /// Countdown to the automatic turn-off; absent counts up until stopped
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub running: bool,
    pub request: Option<SessionRequest>,
    /// Raw current readback taken at start, or -1
    pub current_readback: Option<i32>,
    /// Raw voltage readback taken at start, or -2
    pub voltage_readback: Option<i32>,
    pub elapsed_secs: u64,
    /// Seconds left on the countdown; `None` when counting up
    pub remaining_secs: Option<u64>,
}

impl SessionStatus {
    fn idle() -> Self {
        Self {
            running: false,
            request: None,
            current_readback: None,
            voltage_readback: None,
            elapsed_secs: 0,
            remaining_secs: None,
        }
    }
}

struct ActiveSession {
    id: u64,
    request: SessionRequest,
    started: Instant,
    current_readback: i32,
    voltage_readback: i32,
    countdown: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn status(&self) -> SessionStatus {
        let elapsed = self.started.elapsed();
        SessionStatus {
            running: true,
            request: Some(self.request.clone()),
            current_readback: Some(self.current_readback),
            voltage_readback: Some(self.voltage_readback),
            elapsed_secs: elapsed.as_secs(),
            remaining_secs: self
                .request
                .duration_secs
                .map(|total| Duration::from_secs(total).saturating_sub(elapsed).as_secs()),
        }
    }
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    active: Option<ActiveSession>,
}

/// Runs at most one session at a time over the shared power supply
#[derive(Clone)]
pub struct SessionController {
    devices: SharedDevices,
    // Lock order: slot, then the power supply
    slot: Arc<Mutex<Slot>>,
    logger: StructuredLogger,
}

impl SessionController {
    pub fn new(devices: SharedDevices) -> Self {
        Self {
            devices,
            slot: Arc::new(Mutex::new(Slot::default())),
            logger: get_logger("session"),
        }
    }

    pub async fn status(&self) -> SessionStatus {
        let slot = self.slot.lock().await;
        slot.active
            .as_ref()
            .map_or_else(SessionStatus::idle, ActiveSession::status)
    }

    /// Turn on, apply the setpoint, read back, reset the zero point, then
    /// start the countdown
    ///
    /// A failure after the supply went on turns it back off before the error
    /// is returned.
    pub async fn start(&self, request: SessionRequest) -> Result<SessionStatus, SessionError> {
        if check_current(request.current)? == CurrentLevel::NearLimit {
            self.logger.warn(&format!(
                "Current setpoint {} A is close to the {} A maximum; crucible may overheat",
                request.current, MAX_CURRENT
            ));
        }
        if request.duration_secs == Some(0) {
            return Err(SessionError::EmptyCountdown);
        }

        let mut slot = self.slot.lock().await;
        if slot.active.is_some() {
            return Err(SessionError::AlreadyRunning);
        }

        let (current_readback, voltage_readback) = {
            let mut ps = self.devices.power_supply.lock().await;
            self.logger.info(&format!(
                "Starting session: {} A, {} V, {}",
                request.current,
                request.voltage,
                request
                    .duration_secs
                    .map_or("until stopped".to_string(), |s| format!("{} s", s))
            ));
            let prepared = async {
                ps.turn_on().await?;
                ps.set_current_voltage(request.current, request.voltage)
                    .await?;
                let current = value_or_code(&ps.read_current().await);
                let voltage = value_or_code(&ps.read_voltage().await);
                ps.reset_zp().await?;
                Ok::<_, PowerSupplyError>((current, voltage))
            }
            .await;
            match prepared {
                Ok(readback) => readback,
                Err(e) => {
                    if e != PowerSupplyError::TurnOn {
                        let _ = ps.turn_off().await;
                    }
                    self.logger.error(&format!(
                        "Session not started: {} (code {})",
                        e,
                        e.code()
                    ));
                    return Err(e.into());
                }
            }
        };

        slot.next_id += 1;
        let id = slot.next_id;
        let countdown = request
            .duration_secs
            .map(|secs| self.spawn_countdown(id, Duration::from_secs(secs)));
        let session = ActiveSession {
            id,
            request,
            started: Instant::now(),
            current_readback,
            voltage_readback,
            countdown,
        };
        let status = session.status();
        slot.active = Some(session);
        Ok(status)
    }

    fn spawn_countdown(&self, id: u64, duration: Duration) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => controller.finish(id).await,
                // Shutdown turns the supply off itself
                _ = controller.devices.stopping() => {}
            }
        })
    }

    async fn finish(&self, id: u64) {
        let mut slot = self.slot.lock().await;
        if slot.active.as_ref().is_none_or(|s| s.id != id) {
            return;
        }
        slot.active = None;
        self.logger.info("Countdown elapsed; turning the power supply off");
        if let Err(e) = self.devices.power_supply.lock().await.turn_off().await {
            self.logger.error(&format!(
                "Power supply not turned off after countdown: {} (code {})",
                e,
                e.code()
            ));
        }
    }

    /// End the session, if any, and turn the power supply off
    pub async fn stop(&self) -> Result<(), PowerSupplyError> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.active.take() {
            if let Some(countdown) = session.countdown {
                countdown.abort();
            }
            self.logger.info(&format!(
                "Stopping session after {} s",
                session.started.elapsed().as_secs()
            ));
        }
        self.devices.power_supply.lock().await.turn_off().await
    }
}
