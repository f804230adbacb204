//! http api tests, driving the router without a socket

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use telemetry_hub::persistence::MemoryStore;
use telemetry_hub::server;
use telemetry_hub::{IngestionPipeline, PipelineSettings};

fn app() -> (Router, Arc<IngestionPipeline>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        PipelineSettings { log_readings: false, ..Default::default() },
    ));
    (server::router(pipeline.clone()), pipeline, store)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

#[tokio::test]
async fn upload_then_query() {
    let (app, pipeline, _) = app();

    let (status, body) = send(&app, Method::POST, "/upload", Some(json!({"temperature": 21.5, "humidity": 40.0}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "success", "clients_notified": 0}));

    let (status, body) = send(
        &app,
        Method::POST,
        "/upload",
        Some(json!({"temperature": 23.5, "humidity": 42.0, "timestamp": "2026-03-01T12:00:00", "sensor_id": "esp32"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (_, history) = send(&app, Method::GET, "/history?limit=1", None).await;
    assert_eq!(history["total"], 2);
    assert_eq!(history["returned"], 1);
    assert_eq!(history["data"][0]["timestamp"], "2026-03-01T12:00:00");
    assert_eq!(history["data"][0]["sensor_id"], "esp32");

    let (_, stats) = send(&app, Method::GET, "/stats", None).await;
    assert_eq!(stats["total_readings"], 2);
    assert_eq!(stats["temperature"]["avg"], 22.5);
    assert_eq!(stats["humidity"]["current"], 42.0);

    let (_, status) = send(&app, Method::GET, "/status", None).await;
    assert_eq!(status["status"], "running");
    assert_eq!(status["total_readings"], 2);
    assert_eq!(status["latest_data"]["temperature"], 23.5);
    assert_eq!(status["alerts_config"]["temperature_max"], 35.0);

    assert_eq!(pipeline.get_history(10).await.total, 2);
}

#[tokio::test]
async fn upload_rejects_bad_readings() {
    let (app, pipeline, _) = app();

    for bad in [json!({"temperature": 20.0}), json!({}), json!({"temperature": "warm", "humidity": 1})] {
        let (status, body) = send(&app, Method::POST, "/upload", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{oops"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(pipeline.get_history(10).await.total, 0);
}

#[tokio::test]
async fn stats_are_null_until_two_readings() {
    let (app, _, _) = app();
    let (status, body) = send(&app, Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn history_limit_is_clamped() {
    let (app, pipeline, _) = app();
    for i in 0..1000 {
        pipeline
            .ingest(telemetry_hub::SensorPayload {
                temperature: Some(i as f64),
                humidity: Some(50.0),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let (_, page) = send(&app, Method::GET, "/history?limit=2000", None).await;
    assert_eq!(page["total"], 1000);
    assert_eq!(page["returned"], 1000);
    assert_eq!(page["data"].as_array().unwrap().len(), 1000);

    let (_, page) = send(&app, Method::GET, "/history", None).await;
    assert_eq!(page["returned"], 100);

    let (status, _) = send(&app, Method::GET, "/history?limit=-5", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn led_control() {
    let (app, _, _) = app();

    let (_, body) = send(&app, Method::GET, "/led_status", None).await;
    assert_eq!(body, json!({"led_state": false}));

    let (status, body) = send(&app, Method::POST, "/led_control", Some(json!({"state": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["led_state"], true);
    assert_eq!(body["status"], "success");

    let (_, body) = send(&app, Method::GET, "/led_status", None).await;
    assert_eq!(body, json!({"led_state": true}));

    let (status, _) = send(&app, Method::POST, "/led_control", Some(json!({"state": "on"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, Method::POST, "/led_control", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, Method::GET, "/led_status", None).await;
    assert_eq!(body, json!({"led_state": true}));
}

#[tokio::test]
async fn alert_config_replace_all() {
    let (app, pipeline, store) = app();

    let (_, body) = send(&app, Method::GET, "/alerts/config", None).await;
    assert_eq!(
        body,
        json!({
            "temperature_min": 15.0,
            "temperature_max": 35.0,
            "humidity_min": 30.0,
            "humidity_max": 80.0,
            "alerts_enabled": true
        })
    );

    let (status, body) = send(
        &app,
        Method::POST,
        "/alerts/config",
        Some(json!({"temperature_min": 10.0, "temperature_max": 30.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("alerts_enabled"));
    assert_eq!(pipeline.thresholds().temperature_min, 15.0);

    let new = json!({
        "temperature_min": 10.0,
        "temperature_max": 30.0,
        "humidity_min": 20.0,
        "humidity_max": 90.0,
        "alerts_enabled": false
    });
    let (status, body) = send(&app, Method::POST, "/alerts/config", Some(new.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"], new);
    assert_eq!(store.saved_thresholds().unwrap().humidity_max, 90.0);

    let (_, body) = send(&app, Method::GET, "/alerts/config", None).await;
    assert_eq!(body, new);
}

#[tokio::test]
async fn csv_export() {
    let (app, _, _) = app();

    let (status, body) = send(&app, Method::GET, "/export/csv", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    send(
        &app,
        Method::POST,
        "/upload",
        Some(json!({"temperature": 20.0, "humidity": 45.5, "timestamp": "2026-03-01T08:00:00"})),
    )
    .await;

    let request = Request::builder().uri("/export/csv").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename=\"iot_data_"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(csv, "timestamp,temperature,humidity\r\n2026-03-01T08:00:00,20.0,45.5\r\n");
}

#[tokio::test]
async fn uploads_reach_connected_observers() {
    let (app, pipeline, _) = app();
    let mut observer = pipeline.connect_observer().await;
    while observer.events.try_recv().is_ok() {}

    let (_, body) = send(&app, Method::POST, "/upload", Some(json!({"temperature": 36.0, "humidity": 50.0}))).await;
    assert_eq!(body["clients_notified"], 1);

    let alerts = serde_json::to_value(&*observer.events.recv().await.unwrap()).unwrap();
    assert_eq!(alerts["event"], "new_alerts");
    assert_eq!(alerts["data"][0]["type"], "temperature_high");
    assert_eq!(alerts["data"][0]["severity"], "danger");

    let data = serde_json::to_value(&*observer.events.recv().await.unwrap()).unwrap();
    assert_eq!(data["event"], "new_data");
    assert_eq!(data["data"]["temperature"], 36.0);
}
