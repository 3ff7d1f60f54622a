//! HTTP route behaviour driven through warp's test harness

use std::sync::Arc;
use std::time::Duration;

use fleet_sync::{EngineConfig, FleetEngine, LoggingSink};
use fleet_upstream::testing::{Reply, ScriptedApi};
use push_server::{routes, PushServer};
use serde_json::{json, Value};
use warp::http::StatusCode;

fn engine(api: Arc<ScriptedApi>, ids: &[&str]) -> Arc<FleetEngine> {
    let config = EngineConfig::new()
        .with_devices(ids.iter().copied())
        .with_credentials("ops", "secret")
        .with_environment("test");
    Arc::new(FleetEngine::new(config, api, Arc::new(LoggingSink)).unwrap())
}

fn status(lat: f64, lng: f64, vid: &str) -> Reply {
    Reply::Json(json!({"result": 0, "status": [{"mlat": lat, "mlng": lng, "sp": 250, "ol": 1, "vid": vid}]}))
}

async fn get(engine: &Arc<FleetEngine>, path: &str) -> (StatusCode, Value) {
    let response = warp::test::request()
        .method("GET")
        .path(path)
        .reply(&routes(engine.clone()))
        .await;
    let body = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
    (response.status(), body)
}

#[tokio::test]
async fn test_live_lists_all_devices() {
    let api = Arc::new(ScriptedApi::new());
    api.set_status("D1", status(12.9, 77.5, "BusA"));
    let engine = engine(api, &["D1", "D2"]);
    engine.poll_once().await;

    let (code, body) = get(&engine, "/api/live").await;

    assert_eq!(code, StatusCode::OK);
    let states = body.as_array().unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(states[0]["deviceId"], "D1");
    assert_eq!(states[0]["speedKmh"], 25.0);
    assert_eq!(states[1]["displayLabel"], "BUS-2");
}

#[tokio::test]
async fn test_gps_known_and_unknown_device() {
    let engine = engine(Arc::new(ScriptedApi::new()), &["D1", "D2"]);

    let (code, body) = get(&engine, "/api/gps/D2").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["deviceId"], "D2");
    assert_eq!(body["latitude"], 28.6139);

    let (code, body) = get(&engine, "/api/gps/D9").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown device_id");
    assert_eq!(body["validIds"], json!(["D1", "D2"]));
}

#[tokio::test]
async fn test_liveplate_lookup() {
    let api = Arc::new(ScriptedApi::new());
    api.set_status("D2", status(12.9, 77.5, "BusNo.26"));
    api.set_metadata(
        "D2",
        Reply::Json(json!({"result": 0, "devices": [{"vid": "BusNo.26", "plateType": 2}]})),
    );
    let engine = engine(api, &["D1", "D2"]);
    engine.poll_once().await;

    // Defaults to the first configured device
    let (code, body) = get(&engine, "/api/liveplate").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["deviceId"], "D1");

    let (code, body) = get(&engine, "/api/liveplate?device_id=D2").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["resolvedLabel"], "BusNo.26");
    assert_eq!(body["metadata"]["plateType"], 2);

    let (_, body) = get(&engine, "/api/liveplate?device_id=BusNo.26").await;
    assert_eq!(body["deviceId"], "D2");

    let (_, body) = get(&engine, "/api/liveplate?device_id=26").await;
    assert_eq!(body["deviceId"], "D2");

    let (code, body) = get(&engine, "/api/liveplate?device_id=nobody").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown device_id");
}

#[tokio::test]
async fn test_liveplate_all_in_configured_order() {
    let engine = engine(Arc::new(ScriptedApi::new()), &["D3", "D1", "D2"]);

    let (code, body) = get(&engine, "/api/liveplate_all").await;

    assert_eq!(code, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["deviceId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["D3", "D1", "D2"]);
}

#[tokio::test]
async fn test_health_report() {
    let api = Arc::new(ScriptedApi::new());
    api.set_status("D1", status(12.9, 77.5, "BusA"));
    let engine = engine(api, &["D1", "D2"]);

    let (code, body) = get(&engine, "/api/health").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["websocket"]["activeConnections"], 0);

    engine.poll_once().await;

    let (_, body) = get(&engine, "/api/health").await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["fleetApi"]["sessionValid"], true);
    assert_eq!(body["devices"]["online"], 1);
    assert_eq!(body["gpsData"]["isFresh"], true);
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let engine = engine(Arc::new(ScriptedApi::new()), &["D1"]);

    let (code, body) = get(&engine, "/api/nothing").await;

    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not found");
}

#[tokio::test]
async fn test_server_binds_and_shuts_down() {
    let engine = engine(Arc::new(ScriptedApi::new()), &["D1"]);

    let server = PushServer::start(engine, ([127, 0, 0, 1], 0).into())
        .await
        .unwrap();
    assert_ne!(server.local_addr().port(), 0);

    tokio::time::timeout(Duration::from_secs(2), server.shutdown())
        .await
        .unwrap()
        .unwrap();
}

fn engine_with_origins(origins: &[&str]) -> Arc<FleetEngine> {
    let config = EngineConfig::new()
        .with_devices(["D1"])
        .with_credentials("ops", "secret")
        .with_allowed_origins(origins.iter().copied());
    Arc::new(FleetEngine::new(config, Arc::new(ScriptedApi::new()), Arc::new(LoggingSink)).unwrap())
}

async fn preflight(engine: &Arc<FleetEngine>, origin: &str) -> warp::http::Response<warp::hyper::body::Bytes> {
    warp::test::request()
        .method("OPTIONS")
        .path("/api/live")
        .header("origin", origin)
        .header("access-control-request-method", "GET")
        .reply(&routes(engine.clone()))
        .await
}

#[tokio::test]
async fn test_cors_preflight_any_origin_by_default() {
    let engine = engine(Arc::new(ScriptedApi::new()), &["D1"]);

    let response = preflight(&engine, "https://dashboard.example.com").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://dashboard.example.com"
    );
    assert!(response.headers().contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn test_cors_restricted_origins() {
    let engine = engine_with_origins(&["https://dashboard.example.com"]);

    let allowed = preflight(&engine, "https://dashboard.example.com").await;
    assert_eq!(allowed.status(), StatusCode::OK);

    let denied = preflight(&engine, "https://elsewhere.example.com").await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let body: Value = serde_json::from_slice(denied.body()).unwrap();
    assert_eq!(body["error"], "origin not allowed");
}

#[tokio::test]
async fn test_cors_headers_on_simple_request() {
    let engine = engine_with_origins(&["http://localhost:3000"]);

    let response = warp::test::request()
        .method("GET")
        .path("/api/live")
        .header("origin", "http://localhost:3000")
        .reply(&routes(engine.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
}
