use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::get};
use serde::Deserialize;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::AppState;

const DEFAULT_TAIL_LINES: usize = 200;
const MAX_TAIL_LINES: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct TailParams {
    pub lines: Option<usize>,
}

/// Last lines of the newest log file
pub async fn logs_tail(
    State(state): State<AppState>,
    Query(params): Query<TailParams>,
) -> impl IntoResponse {
    let max_lines = params.lines.unwrap_or(DEFAULT_TAIL_LINES).min(MAX_TAIL_LINES);
    let Some(path) = resolve_log_file_path(&state.config.logging.file).await else {
        return (StatusCode::NOT_FOUND, "Log file not available").into_response();
    };
    match fs::read_to_string(&path).await {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            let start = lines.len().saturating_sub(max_lines);
            let mut resp = Response::new(lines[start..].join("\n").into());
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            resp
        }
        Err(_) => (StatusCode::NOT_FOUND, "Log file not available").into_response(),
    }
}

/// Live log lines at or above the runtime web level
pub async fn logs_stream() -> impl IntoResponse {
    let rx = crate::logging::subscribe_log_lines();
    let stream = BroadcastStream::new(rx).filter_map(|res| match res {
        Ok(line) if crate::logging::should_emit_to_web(&line) => {
            Some(Ok::<Event, Infallible>(Event::default().event("log").data(line)))
        }
        _ => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn name_matches(file_name: &str, prefix: &str, suffix: &str) -> bool {
    file_name.starts_with(prefix)
        && (file_name.ends_with(&format!(".{suffix}")) || file_name.contains(&format!(".{suffix}.")))
}

async fn find_latest_matching(search_dir: &Path, prefix: &str, suffix: &str) -> Option<PathBuf> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut rd = fs::read_dir(search_dir).await.ok()?;
    while let Ok(Some(entry)) = rd.next_entry().await {
        if let Some(name) = entry.file_name().to_str()
            && name_matches(name, prefix, suffix)
            && let Ok(md) = entry.metadata().await
            && md.is_file()
            && let Ok(modified) = md.modified()
            && best.as_ref().is_none_or(|(t, _)| modified > *t)
        {
            best = Some((modified, entry.path()));
        }
    }
    best.map(|(_, path)| path)
}

// The appender rotates daily, so the configured name usually does not exist
// as such; fall back to the newest file that matches its pattern.
pub(crate) async fn resolve_log_file_path(configured_path: &str) -> Option<PathBuf> {
    let configured = Path::new(configured_path);
    if let Ok(md) = fs::metadata(configured).await
        && md.is_file()
    {
        return Some(configured.to_path_buf());
    }
    let (search_dir, prefix, suffix) = crate::logging::rotation_pattern(configured);
    find_latest_matching(&search_dir, &prefix, &suffix).await
}

#[derive(Deserialize)]
struct WebLevelQuery {
    level: String,
}

async fn set_web_log_level(Query(q): Query<WebLevelQuery>) -> impl IntoResponse {
    match crate::logging::set_web_log_level_str(&q.level) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "level": q.level.to_uppercase()})),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        ),
    }
}

async fn get_web_log_level() -> impl IntoResponse {
    let lvl = crate::logging::get_web_log_level();
    Json(serde_json::json!({"level": lvl.to_string()}))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/logs/tail", get(logs_tail))
        .route("/api/logs/stream", get(logs_stream))
        .route(
            "/api/logs/web_level",
            get(get_web_log_level).post(set_web_log_level),
        )
}
