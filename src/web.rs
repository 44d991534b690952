//! Axum HTTP API over both device managers

mod logs;

pub use logs::{TailParams, logs_stream, logs_tail};

use crate::config::Config;
use crate::devices::SharedDevices;
use crate::messages::{describe, describe_session_error, message, overheat_warning};
use crate::session::{
    CurrentLevel, SessionController, SessionError, SessionRequest, SessionStatus, check_current,
};
use crate::status::{DeviceKind, DeviceStatus, PowerSupplyError, STATUS_OK};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub devices: SharedDevices,
    pub config: Arc<Config>,
    pub sessions: SessionController,
    /// Telemetry samples as JSON lines
    pub telemetry_tx: broadcast::Sender<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectBody {
    /// Serial port; the configured one when absent
    pub port: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetpointBody {
    pub current: u16,
    /// Volts
    pub voltage: u16,
}

#[derive(Debug, Deserialize)]
pub struct TimerBody {
    pub minutes: i32,
}

/// Reply to a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub code: i32,
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Reply to a session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReply {
    pub ok: bool,
    /// Device code of a failed step, 0 on success
    pub code: Option<i32>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub session: SessionStatus,
}

/// Reply to a register read; `value` is the raw register or the error code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueReply {
    pub value: i32,
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonsReply {
    pub forward: bool,
    pub reverse: bool,
}

fn http_status(device: DeviceKind, code: i32) -> StatusCode {
    match (device, code) {
        (_, STATUS_OK) => StatusCode::OK,
        (DeviceKind::PowerSupply, c) if c == PowerSupplyError::UnsupportedTimerValue.code() => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn reply_text(state: &AppState, device: DeviceKind, code: i32) -> String {
    if code == STATUS_OK {
        message(device, code, state.config.language).to_string()
    } else {
        describe(device, code, state.config.language)
    }
}

fn command_reply<E: DeviceStatus>(
    state: &AppState,
    result: Result<(), E>,
) -> (StatusCode, Json<CommandReply>) {
    let code = result.err().map_or(STATUS_OK, |e| e.code());
    (
        http_status(E::DEVICE, code),
        Json(CommandReply {
            code,
            ok: code == STATUS_OK,
            message: reply_text(state, E::DEVICE, code),
            warning: None,
        }),
    )
}

fn warning_for(state: &AppState, level: CurrentLevel) -> Option<String> {
    (level == CurrentLevel::NearLimit).then(|| overheat_warning(state.config.language).to_string())
}

fn value_reply<E: DeviceStatus>(
    state: &AppState,
    result: Result<u16, E>,
) -> (StatusCode, Json<ValueReply>) {
    let (value, code) = match result {
        Ok(v) => (i32::from(v), STATUS_OK),
        Err(e) => (e.code(), e.code()),
    };
    (
        http_status(E::DEVICE, code),
        Json(ValueReply {
            value,
            ok: code == STATUS_OK,
            message: reply_text(state, E::DEVICE, code),
        }),
    )
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.as_ref().clone())
}

async fn ports() -> impl IntoResponse {
    match crate::modbus::available_ports() {
        Ok(ports) => (StatusCode::OK, Json(serde_json::json!({ "ports": ports }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

async fn ps_connect(
    State(state): State<AppState>,
    body: Option<Json<ConnectBody>>,
) -> impl IntoResponse {
    let port = body
        .and_then(|Json(body)| body.port)
        .unwrap_or_else(|| state.config.power_supply.port.clone());
    let result = state.devices.power_supply.lock().await.connect(&port).await;
    command_reply(&state, result)
}

async fn ps_setpoint(
    State(state): State<AppState>,
    Json(body): Json<SetpointBody>,
) -> impl IntoResponse {
    let level = match check_current(body.current) {
        Ok(level) => level,
        Err(e) => {
            let code = PowerSupplyError::SetCurrent.code();
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(CommandReply {
                    code,
                    ok: false,
                    message: describe_session_error(e, state.config.language),
                    warning: None,
                }),
            );
        }
    };
    let result = state
        .devices
        .power_supply
        .lock()
        .await
        .set_current_voltage(body.current, body.voltage)
        .await;
    let (status, Json(mut reply)) = command_reply(&state, result);
    reply.warning = warning_for(&state, level);
    (status, Json(reply))
}

async fn ps_on(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.devices.power_supply.lock().await.turn_on().await;
    command_reply(&state, result)
}

async fn ps_on_timer(State(state): State<AppState>, Json(body): Json<TimerBody>) -> Response {
    // Holds the lock for the whole interval unless shutdown starts
    let mut ps = state.devices.power_supply.lock().await;
    tokio::select! {
        result = ps.turn_on_with_timer(body.minutes) => command_reply(&state, result).into_response(),
        _ = state.devices.stopping() => {
            (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response()
        }
    }
}

async fn ps_off(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.devices.power_supply.lock().await.turn_off().await;
    command_reply(&state, result)
}

async fn ps_reset_zp(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.devices.power_supply.lock().await.reset_zp().await;
    command_reply(&state, result)
}

async fn ps_current(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.devices.power_supply.lock().await.read_current().await;
    value_reply(&state, result)
}

async fn ps_voltage(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.devices.power_supply.lock().await.read_voltage().await;
    value_reply(&state, result)
}

async fn sm_connect(
    State(state): State<AppState>,
    body: Option<Json<ConnectBody>>,
) -> impl IntoResponse {
    let port = body
        .and_then(|Json(body)| body.port)
        .unwrap_or_else(|| state.config.step_motor.port.clone());
    let result = state.devices.step_motor.lock().await.connect(&port).await;
    command_reply(&state, result)
}

async fn sm_forward(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.devices.step_motor.lock().await.open().await;
    command_reply(&state, result)
}

async fn sm_reverse(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.devices.step_motor.lock().await.close().await;
    command_reply(&state, result)
}

async fn sm_stop(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.devices.step_motor.lock().await.stop().await;
    command_reply(&state, result)
}

async fn sm_buttons(State(state): State<AppState>) -> impl IntoResponse {
    let mut motor = state.devices.step_motor.lock().await;
    Json(ButtonsReply {
        forward: motor.is_forward_button_pressed().await,
        reverse: motor.is_reverse_button_pressed().await,
    })
}

async fn session_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.status().await)
}

async fn session_start(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> impl IntoResponse {
    let warning = check_current(request.current)
        .ok()
        .and_then(|level| warning_for(&state, level));
    match state.sessions.start(request).await {
        Ok(session) => (
            StatusCode::OK,
            Json(SessionReply {
                ok: true,
                code: Some(STATUS_OK),
                message: message(DeviceKind::PowerSupply, STATUS_OK, state.config.language)
                    .to_string(),
                warning,
                session,
            }),
        ),
        Err(e) => {
            let (status, code) = match e {
                SessionError::CurrentOutOfRange(_) | SessionError::EmptyCountdown => {
                    (StatusCode::UNPROCESSABLE_ENTITY, None)
                }
                SessionError::AlreadyRunning => (StatusCode::CONFLICT, None),
                SessionError::Device(d) => {
                    (http_status(DeviceKind::PowerSupply, d.code()), Some(d.code()))
                }
            };
            (
                status,
                Json(SessionReply {
                    ok: false,
                    code,
                    message: describe_session_error(e, state.config.language),
                    warning: None,
                    session: state.sessions.status().await,
                }),
            )
        }
    }
}

async fn session_stop(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.sessions.stop().await;
    command_reply(&state, result)
}

async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.telemetry_tx.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(payload) => Some(Ok::<Event, std::convert::Infallible>(
            Event::default().event("telemetry").data(payload),
        )),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/config", get(get_config))
        .route("/api/ports", get(ports))
        .route("/api/power-supply/connect", post(ps_connect))
        .route("/api/power-supply/setpoint", post(ps_setpoint))
        .route("/api/power-supply/on", post(ps_on))
        .route("/api/power-supply/on-timer", post(ps_on_timer))
        .route("/api/power-supply/off", post(ps_off))
        .route("/api/power-supply/reset-zp", post(ps_reset_zp))
        .route("/api/power-supply/current", get(ps_current))
        .route("/api/power-supply/voltage", get(ps_voltage))
        .route("/api/step-motor/connect", post(sm_connect))
        .route("/api/step-motor/forward", post(sm_forward))
        .route("/api/step-motor/reverse", post(sm_reverse))
        .route("/api/step-motor/stop", post(sm_stop))
        .route("/api/step-motor/buttons", get(sm_buttons))
        .route("/api/session", get(session_status))
        .route("/api/session/start", post(session_start))
        .route("/api/session/stop", post(session_stop))
        .route("/api/events", get(events))
        .merge(logs::routes())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let router = build_router(state);

    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={}, port={}",
        host, port
    ));

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (API /api)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router).await?;
    Ok(())
}
