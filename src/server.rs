//! ==============================================================================
//! server.rs - http api and observer websocket
//! ==============================================================================
//!
//! purpose:
//!     thin transport over the ingestion pipeline. handlers decode the
//!     request, call one pipeline operation and encode the answer. no
//!     telemetry state lives here.
//!
//! routes:
//!     GET  /               service banner
//!     POST /upload         sensor reading
//!     GET  /led_status     actuator state
//!     POST /led_control    actuator command {"state": bool}
//!     GET  /history        ?limit=N (default 100, max = history capacity)
//!     GET  /stats          rolling statistics or null
//!     GET  /alerts/config  current thresholds
//!     POST /alerts/config  replace all thresholds
//!     GET  /status         full status report
//!     GET  /export/csv     history as a csv attachment
//!     GET  /ws             observer websocket
//!
//! websocket frames (json text):
//!     out: {"event": "new_data" | "new_alerts" | "actuator_update"
//!                    | "thresholds_updated" | "history_data", "data": ...}
//!     in:  {"event": "led_control", "data": {"state": true}}
//!          {"event": "request_history", "data": {"limit": 200}}
//!
//! relationships:
//!     - uses: pipeline.rs (every handler)
//!     - used by: main.rs (serve), tests/api.rs (router)
//!
//! ==============================================================================

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::alerts::ThresholdUpdate;
use crate::domain::SensorPayload;
use crate::error::PipelineError;
use crate::export;
use crate::observers::ObserverId;
use crate::pipeline::{IngestionPipeline, DEFAULT_HISTORY_LIMIT};

pub type AppState = Arc<IngestionPipeline>;

// ==============================================================================
// errors
// ==============================================================================

/// every rejected request is a 400 with {"error": "..."}
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ==============================================================================
// router
// ==============================================================================

pub fn router(pipeline: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/upload", post(upload_handler))
        .route("/led_status", get(led_status_handler))
        .route("/led_control", post(led_control_handler))
        .route("/history", get(history_handler))
        .route("/stats", get(stats_handler))
        .route("/alerts/config", get(get_alerts_handler).post(replace_alerts_handler))
        .route("/status", get(status_handler))
        .route("/export/csv", get(export_csv_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

/// serve until `shutdown` resolves
pub async fn run_server(
    listener: tokio::net::TcpListener,
    pipeline: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ==============================================================================
// handlers
// ==============================================================================

async fn index_handler() -> Json<Value> {
    Json(json!({
        "service": "telemetry-hub",
        "endpoints": [
            "POST /upload",
            "GET /led_status",
            "POST /led_control",
            "GET /history",
            "GET /stats",
            "GET /export/csv",
            "GET|POST /alerts/config",
            "GET /status",
            "GET /ws"
        ]
    }))
}

async fn upload_handler(
    State(pipeline): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    let ack = pipeline.ingest(SensorPayload::from_value(body)?).await?;
    Ok(Json(json!({
        "status": "success",
        "clients_notified": ack.observers_notified
    })))
}

async fn led_status_handler(State(pipeline): State<AppState>) -> Json<Value> {
    Json(json!({ "led_state": pipeline.get_actuator() }))
}

async fn led_control_handler(
    State(pipeline): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    let state = pipeline.set_actuator_command(&body)?;
    let message = if state { "LED on" } else { "LED off" };
    Ok(Json(json!({
        "status": "success",
        "led_state": state,
        "message": message
    })))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history_handler(
    State(pipeline): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let page = pipeline
        .get_history(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await;
    Ok(Json(page))
}

async fn stats_handler(State(pipeline): State<AppState>) -> impl IntoResponse {
    Json(pipeline.get_stats().await)
}

async fn get_alerts_handler(State(pipeline): State<AppState>) -> impl IntoResponse {
    Json(pipeline.thresholds())
}

async fn replace_alerts_handler(
    State(pipeline): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    let config = pipeline
        .replace_thresholds(ThresholdUpdate::from_value(body)?)
        .await?;
    Ok(Json(json!({
        "status": "success",
        "config": config,
        "message": "Alert configuration updated"
    })))
}

async fn status_handler(State(pipeline): State<AppState>) -> impl IntoResponse {
    Json(pipeline.status().await)
}

async fn export_csv_handler(State(pipeline): State<AppState>) -> ApiResult<Response> {
    let readings = pipeline.export().await;
    if readings.is_empty() {
        return Err(ApiError::BadRequest("No data to export".to_string()));
    }

    let filename = export::csv_filename(chrono::Local::now());
    let disposition = format!("attachment; filename=\"{}\"", filename);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export::to_csv(&readings),
    )
        .into_response())
}

// ==============================================================================
// observer websocket
// ==============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(pipeline): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| observer_session(socket, pipeline))
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// one connected observer
///
/// the writer drains this observer's queue onto the socket; the reader
/// handles inbound commands. whichever ends first tears down the other.
async fn observer_session(socket: WebSocket, pipeline: AppState) {
    let handle = pipeline.connect_observer().await;
    let id = handle.id;
    let mut events = handle.events;
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        // ends when the registry drops our sender (unregistered or too slow)
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&*event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("failed to encode {} for observer {}: {}", event.name(), id, e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_pipeline = pipeline.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => handle_inbound(&reader_pipeline, id, &text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    pipeline.disconnect_observer(id);
}

async fn handle_inbound(pipeline: &IngestionPipeline, id: ObserverId, text: &str) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("observer {} sent an unreadable frame: {}", id, e);
            return;
        }
    };

    match frame.event.as_str() {
        "led_control" => {
            if let Err(e) = pipeline.set_actuator_command(&frame.data) {
                tracing::warn!("observer {} sent an invalid led_control: {}", id, e);
            }
        }
        "request_history" => {
            let limit = frame
                .data
                .get("limit")
                .and_then(Value::as_u64)
                .map(|n| n as usize);
            if let Err(e) = pipeline.request_history(id, limit).await {
                tracing::debug!("history for observer {} not delivered: {}", id, e);
            }
        }
        other => tracing::debug!("observer {} sent unknown event {:?}", id, other),
    }
}
