#![cfg(test)]

use super::web::*;
use crate::config::Config;
use crate::devices::{PowerSupplyManager, SharedDevices, StepMotorManager};
use crate::messages::Language;
use crate::session::SessionController;
use crate::simulator::{Op, SimulatedConnector};
use axum::http::{Method, Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;

struct Rig {
    state: AppState,
    ps_bus: SimulatedConnector,
    sm_bus: SimulatedConnector,
}

fn rig_with_config(mut config: Config) -> Rig {
    config.language = Language::En;
    let ps_bus = SimulatedConnector::new();
    let sm_bus = SimulatedConnector::new();
    let devices = SharedDevices::new(
        PowerSupplyManager::new(Arc::new(ps_bus.clone()), Duration::from_millis(50)),
        StepMotorManager::new(Arc::new(sm_bus.clone()), Duration::from_millis(50)),
    );
    let (telemetry_tx, _rx) = broadcast::channel(16);
    Rig {
        state: AppState {
            sessions: SessionController::new(devices.clone()),
            devices,
            config: Arc::new(config),
            telemetry_tx,
        },
        ps_bus,
        sm_bus,
    }
}

fn rig() -> Rig {
    let mut config = Config::default();
    config.power_supply.port = "SIM-PS".to_string();
    config.step_motor.port = "SIM-SM".to_string();
    rig_with_config(config)
}

async fn call(
    state: &AppState,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };
    let resp = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_ok() {
    let rig = rig();
    let resp = build_router(rig.state)
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn config_get_returns_json() {
    let rig = rig();
    let (status, json) = call(&rig.state, Method::GET, "/api/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["power_supply"]["port"], "SIM-PS");
    assert_eq!(json["web"]["port"], 8089);
    assert_eq!(json["language"], "en");
}

#[tokio::test]
async fn connect_uses_configured_port_by_default() {
    let rig = rig();
    let (status, json) = call(
        &rig.state,
        Method::POST,
        "/api/power-supply/connect",
        Some(serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 0);
    assert_eq!(json["ok"], true);
    assert_eq!(json["message"], "Operation successful.");
    assert_eq!(rig.ps_bus.bus().last_settings().unwrap().port, "SIM-PS");
    assert_eq!(rig.ps_bus.bus().last_settings().unwrap().baud_rate, 19200);

    let (status, _) = call(
        &rig.state,
        Method::POST,
        "/api/step-motor/connect",
        Some(serde_json::json!({"port": "COM9"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rig.sm_bus.bus().last_settings().unwrap().port, "COM9");
    assert_eq!(rig.sm_bus.bus().last_slave(), Some(3));
}

#[tokio::test]
async fn connect_accepts_an_empty_body() {
    let rig = rig();
    let (status, json) = call(&rig.state, Method::POST, "/api/step-motor/connect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 0);
    assert_eq!(rig.sm_bus.bus().last_settings().unwrap().port, "SIM-SM");
}

#[tokio::test]
async fn connect_failure_is_bad_gateway() {
    let rig = rig();
    rig.ps_bus
        .bus()
        .fail_connect_stage(Some(crate::devices::ConnectStage::Establish));
    let (status, json) = call(
        &rig.state,
        Method::POST,
        "/api/power-supply/connect",
        Some(serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], 3);
    assert_eq!(json["ok"], false);
    assert_eq!(
        json["message"],
        "power_supply: Error code: 3. Message: Failed to connect to the device."
    );
}

#[tokio::test]
async fn setpoint_and_readback() {
    let rig = rig();
    rig.state
        .devices
        .power_supply
        .lock()
        .await
        .connect("SIM-PS")
        .await
        .unwrap();
    rig.ps_bus.bus().clear_log();

    let (status, json) = call(
        &rig.state,
        Method::POST,
        "/api/power-supply/setpoint",
        Some(serde_json::json!({"current": 120, "voltage": 12})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 0);
    assert_eq!(
        rig.ps_bus.bus().transactions(),
        vec![Op::WriteRegister(18, 120), Op::WriteRegister(19, 1200)]
    );

    rig.ps_bus.bus().set_input(20, 118);
    let (status, json) = call(&rig.state, Method::GET, "/api/power-supply/current", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], 118);
    assert_eq!(json["ok"], true);
}

#[tokio::test]
async fn setpoint_current_is_bounded() {
    let rig = rig();
    rig.state
        .devices
        .power_supply
        .lock()
        .await
        .connect("SIM-PS")
        .await
        .unwrap();
    rig.ps_bus.bus().clear_log();

    let (status, json) = call(
        &rig.state,
        Method::POST,
        "/api/power-supply/setpoint",
        Some(serde_json::json!({"current": 201, "voltage": 6})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["ok"], false);
    assert_eq!(json["code"], 4);
    assert!(rig.ps_bus.bus().transactions().is_empty());

    let (status, json) = call(
        &rig.state,
        Method::POST,
        "/api/power-supply/setpoint",
        Some(serde_json::json!({"current": 170, "voltage": 6})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["warning"].as_str().unwrap().contains("overheat"));
    assert_eq!(rig.ps_bus.bus().holding(18), Some(170));

    let (_, json) = call(
        &rig.state,
        Method::POST,
        "/api/power-supply/setpoint",
        Some(serde_json::json!({"current": 100, "voltage": 6})),
    )
    .await;
    assert!(json.get("warning").is_none());
}

#[tokio::test]
async fn session_start_status_and_stop() {
    let rig = rig();
    let (status, json) = call(
        &rig.state,
        Method::POST,
        "/api/session/start",
        Some(serde_json::json!({"current": 90, "duration_secs": 600})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], 6);
    assert_eq!(json["session"]["running"], false);

    rig.state
        .devices
        .power_supply
        .lock()
        .await
        .connect("SIM-PS")
        .await
        .unwrap();
    rig.ps_bus.bus().set_input(20, 89);
    let (status, json) = call(
        &rig.state,
        Method::POST,
        "/api/session/start",
        Some(serde_json::json!({"current": 90, "duration_secs": 600})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["session"]["current_readback"], 89);
    assert_eq!(rig.ps_bus.bus().holding(19), Some(600));
    assert_eq!(rig.ps_bus.bus().coil(272), Some(true));

    let (status, _) = call(
        &rig.state,
        Method::POST,
        "/api/session/start",
        Some(serde_json::json!({"current": 90})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = call(&rig.state, Method::GET, "/api/session", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["running"], true);
    assert_eq!(json["request"]["duration_secs"], 600);

    let (status, json) = call(&rig.state, Method::POST, "/api/session/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 0);
    assert_eq!(rig.ps_bus.bus().coil(272), Some(false));

    let (_, json) = call(&rig.state, Method::GET, "/api/session", None).await;
    assert_eq!(json["running"], false);
}

#[tokio::test]
async fn session_rejects_current_over_limit() {
    let rig = rig();
    let (status, json) = call(
        &rig.state,
        Method::POST,
        "/api/session/start",
        Some(serde_json::json!({"current": 250})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], serde_json::Value::Null);
    assert_eq!(
        json["message"],
        "power_supply: Invalid current setpoint. Allowed range: 0-200 A."
    );
}

#[tokio::test]
async fn shutdown_interrupts_a_timed_turn_on() {
    let rig = rig();
    rig.state
        .devices
        .power_supply
        .lock()
        .await
        .connect("SIM-PS")
        .await
        .unwrap();

    let state = rig.state.clone();
    let pending = tokio::spawn(async move {
        call(
            &state,
            Method::POST,
            "/api/power-supply/on-timer",
            Some(serde_json::json!({"minutes": 30})),
        )
        .await
    });
    for _ in 0..200 {
        if rig.ps_bus.bus().coil(273) == Some(true) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(rig.ps_bus.bus().coil(272), Some(true));

    tokio::time::timeout(
        Duration::from_secs(5),
        rig.state.devices.shutdown(Duration::from_secs(2)),
    )
    .await
    .expect("shutdown waited for the timer");
    assert_eq!(rig.ps_bus.bus().coil(272), Some(false));
    assert!(!rig.state.devices.power_supply.lock().await.is_connected());

    let (status, _) = pending.await.unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn reads_without_connection_report_negative_codes() {
    let rig = rig();
    let (status, json) = call(&rig.state, Method::GET, "/api/power-supply/voltage", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["value"], -2);
    assert_eq!(json["ok"], false);
}

#[tokio::test]
async fn negative_timer_is_unprocessable() {
    let rig = rig();
    let (status, json) = call(
        &rig.state,
        Method::POST,
        "/api/power-supply/on-timer",
        Some(serde_json::json!({"minutes": -5})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], 13);
    assert!(rig.ps_bus.bus().transactions().is_empty());
}

#[tokio::test]
async fn on_off_and_zero_point() {
    let rig = rig();
    rig.state
        .devices
        .power_supply
        .lock()
        .await
        .connect("SIM-PS")
        .await
        .unwrap();

    for uri in [
        "/api/power-supply/on",
        "/api/power-supply/off",
        "/api/power-supply/reset-zp",
    ] {
        let (status, json) = call(&rig.state, Method::POST, uri, None).await;
        assert_eq!(status, StatusCode::OK, "{}", uri);
        assert_eq!(json["code"], 0, "{}", uri);
    }
    assert_eq!(rig.ps_bus.bus().coil(272), Some(false));
    assert_eq!(rig.ps_bus.bus().holding(36), Some(0));

    rig.ps_bus.bus().fail_transaction(3);
    let (status, json) = call(&rig.state, Method::POST, "/api/power-supply/off", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], 10);
}

#[tokio::test]
async fn motor_commands_and_buttons() {
    let rig = rig();
    let (status, json) = call(&rig.state, Method::POST, "/api/step-motor/forward", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], 4);

    rig.state
        .devices
        .step_motor
        .lock()
        .await
        .connect("SIM-SM")
        .await
        .unwrap();
    let (status, _) = call(&rig.state, Method::POST, "/api/step-motor/reverse", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rig.sm_bus.bus().holding(512), Some(0));
    assert_eq!(rig.sm_bus.bus().holding(513), Some(1));

    let (status, _) = call(&rig.state, Method::POST, "/api/step-motor/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rig.sm_bus.bus().holding(513), Some(0));

    rig.sm_bus.bus().set_holding(514, 1);
    let (status, json) = call(&rig.state, Method::GET, "/api/step-motor/buttons", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!({"forward": true, "reverse": false}));
}

#[tokio::test]
async fn malformed_setpoint_is_rejected() {
    let rig = rig();
    let (status, _) = call(
        &rig.state,
        Method::POST,
        "/api/power-supply/setpoint",
        Some(serde_json::json!({"current": -1, "voltage": 12})),
    )
    .await;
    assert!(status.is_client_error());
    assert!(rig.ps_bus.bus().transactions().is_empty());
}

#[tokio::test]
async fn events_stream_emits_telemetry() {
    use http_body_util::BodyExt as _;

    let rig = rig();
    let tx = rig.state.telemetry_tx.clone();
    let resp = build_router(rig.state)
        .oneshot(
            Request::builder()
                .uri("/api/events")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    tx.send("{\"current\":1}".to_string()).unwrap();
    let mut body = resp.into_body();
    let mut buf: Vec<u8> = Vec::new();
    let wait = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(frame)) = body.frame().await {
            if let Some(data) = frame.data_ref() {
                buf.extend_from_slice(data);
                if String::from_utf8_lossy(&buf).contains("current") {
                    break;
                }
            }
        }
    })
    .await;
    assert!(wait.is_ok(), "timed out waiting for telemetry event");
    let s = String::from_utf8_lossy(&buf);
    assert!(s.contains("event: telemetry"), "{}", s);
}

#[tokio::test]
async fn log_tail_with_tempfile() {
    let tf = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(tf.path(), "a\nb\nc\n").unwrap();
    let mut config = Config::default();
    config.logging.file = tf.path().to_string_lossy().to_string();
    let rig = rig_with_config(config);

    let resp = build_router(rig.state)
        .oneshot(
            Request::builder()
                .uri("/api/logs/tail?lines=2")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(body.to_vec()).unwrap(), "b\nc");
}

#[tokio::test]
async fn logs_web_level_get_and_post() {
    let rig = rig();
    let (status, json) = call(&rig.state, Method::POST, "/api/logs/web_level?level=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["ok"], false);

    let (status, json) = call(&rig.state, Method::GET, "/api/logs/web_level", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["level"].is_string());
}

#[tokio::test]
async fn logs_stream_emits_named_log_events() {
    use http_body_util::BodyExt as _;

    // Ensure logging is initialized so broadcast layer is active in tests
    let _ = crate::logging::init_logging(&crate::config::LoggingConfig::default());

    let router = axum::Router::new().route("/api/logs/stream", axum::routing::get(logs_stream));
    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/logs/stream")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        crate::logging::get_logger("test_sse").warn("sse_unit_line_456");
    });

    let mut body = response.into_body();
    let mut buf: Vec<u8> = Vec::new();
    let wait = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(frame)) = body.frame().await {
            if let Some(data) = frame.data_ref() {
                buf.extend_from_slice(data);
                if String::from_utf8_lossy(&buf).contains("sse_unit_line_456") {
                    break;
                }
            }
        }
    })
    .await;

    assert!(wait.is_ok(), "timed out waiting for SSE log event");
    let s = String::from_utf8_lossy(&buf);
    assert!(s.contains("event: log"), "SSE should include named 'log' event: {}", s);
}
