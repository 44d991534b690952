use anyhow::Result;
use evaporator::config::Config;
use evaporator::devices::{PowerSupplyManager, SharedDevices, StepMotorManager};
use evaporator::messages::{describe_error, message};
use evaporator::modbus::{ModbusConnector, RtuConnector};
use evaporator::session::SessionController;
use evaporator::simulator::SimulatedConnector;
use evaporator::status::{DeviceKind, STATUS_OK};
use evaporator::telemetry::TelemetryMonitor;
use evaporator::web::{self, AppState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Longest wait for a busy device before shutdown leaves it as is
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

fn connector(simulate: bool) -> Arc<dyn ModbusConnector> {
    if simulate {
        Arc::new(SimulatedConnector::new())
    } else {
        Arc::new(RtuConnector)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    evaporator::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Evaporator driver {} starting up{}",
        env!("APP_VERSION"),
        if config.simulate { " (simulated devices)" } else { "" }
    );

    let ps_connector = connector(config.simulate);
    let sm_connector = connector(config.simulate);

    let mut power_supply =
        PowerSupplyManager::new(ps_connector, config.power_supply.response_timeout());
    let mut step_motor = StepMotorManager::new(sm_connector, config.step_motor.response_timeout());

    if config.connect_on_startup {
        match power_supply.connect(&config.power_supply.port).await {
            Ok(()) => info!(
                "{}: {}",
                DeviceKind::PowerSupply,
                message(DeviceKind::PowerSupply, STATUS_OK, config.language)
            ),
            Err(e) => warn!("{}", describe_error(e, config.language)),
        }
        match step_motor.connect(&config.step_motor.port).await {
            Ok(()) => info!(
                "{}: {}",
                DeviceKind::StepMotor,
                message(DeviceKind::StepMotor, STATUS_OK, config.language)
            ),
            Err(e) => warn!("{}", describe_error(e, config.language)),
        }
    }

    let devices = SharedDevices::new(power_supply, step_motor);
    let monitor = TelemetryMonitor::new(
        devices.clone(),
        Duration::from_millis(config.telemetry_interval_ms),
    );
    let telemetry_tx = monitor.sender();
    let telemetry_task = monitor.spawn();

    let host = config.web.host.clone();
    let port = config.web.port;
    let state = AppState {
        devices: devices.clone(),
        sessions: SessionController::new(devices.clone()),
        config: Arc::new(config),
        telemetry_tx,
    };

    let result = tokio::select! {
        res = web::serve(state, &host, port) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    if let Some(task) = telemetry_task {
        task.abort();
    }
    devices.shutdown(SHUTDOWN_WAIT).await;

    match result {
        Ok(()) => {
            info!("Driver shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Web server error: {}", e);
            Err(e)
        }
    }
}
