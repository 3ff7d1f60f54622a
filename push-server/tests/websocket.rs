//! WebSocket subscriber lifecycle through warp's test client

use std::sync::Arc;
use std::time::Duration;

use fleet_sync::{EngineConfig, FleetEngine, LoggingSink};
use fleet_upstream::testing::{Reply, ScriptedApi};
use push_server::routes;
use serde_json::{json, Value};

fn engine(api: Arc<ScriptedApi>) -> Arc<FleetEngine> {
    let config = EngineConfig::new()
        .with_devices(["D1", "D2"])
        .with_credentials("ops", "secret");
    Arc::new(FleetEngine::new(config, api, Arc::new(LoggingSink)).unwrap())
}

fn parse(message: warp::ws::Message) -> Value {
    serde_json::from_str(message.to_str().unwrap()).unwrap()
}

async fn wait_for_subscribers(engine: &FleetEngine, expected: usize) {
    for _ in 0..100 {
        if engine.registry().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} subscribers, found {}",
        engine.registry().len()
    );
}

#[tokio::test]
async fn test_initial_snapshot_then_broadcasts() {
    let api = Arc::new(ScriptedApi::new());
    api.set_status(
        "D1",
        Reply::Json(json!({"result": 0, "status": [{"mlat": "12.9", "mlng": "77.5", "sp": "300", "ol": 1, "vid": "BusA"}]})),
    );
    let engine = engine(api);
    engine.poll_once().await;

    let mut client = warp::test::ws()
        .path("/ws/live")
        .handshake(routes(engine.clone()))
        .await
        .expect("handshake");

    let initial = parse(client.recv().await.unwrap());
    let entries = initial.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["deviceId"], "D1");
    assert_eq!(entries[0]["resolvedLabel"], "BusA");
    assert_eq!(entries[1]["deviceId"], "D2");

    wait_for_subscribers(&engine, 1).await;
    let report = engine.broadcast_once().await;
    assert_eq!(report.delivered, 1);

    let pushed = parse(client.recv().await.unwrap());
    assert_eq!(pushed.as_array().unwrap().len(), 2);
    assert_eq!(pushed[0]["state"]["speedKmh"], 30.0);
}

#[tokio::test]
async fn test_inbound_messages_are_ignored() {
    let engine = engine(Arc::new(ScriptedApi::new()));

    let mut client = warp::test::ws()
        .path("/ws/live")
        .handshake(routes(engine.clone()))
        .await
        .expect("handshake");
    client.recv().await.unwrap();
    wait_for_subscribers(&engine, 1).await;

    client.send_text("ping").await;
    client.send_text("{\"subscribe\":\"D1\"}").await;

    engine.broadcast_once().await;
    let pushed = parse(client.recv().await.unwrap());
    assert_eq!(pushed.as_array().unwrap().len(), 2);
    assert_eq!(engine.registry().len(), 1);
}

#[tokio::test]
async fn test_disconnect_removes_subscriber() {
    let engine = engine(Arc::new(ScriptedApi::new()));

    let mut client = warp::test::ws()
        .path("/ws/live")
        .handshake(routes(engine.clone()))
        .await
        .expect("handshake");
    client.recv().await.unwrap();
    wait_for_subscribers(&engine, 1).await;

    client.send(warp::ws::Message::close()).await;
    drop(client);

    wait_for_subscribers(&engine, 0).await;
}

#[tokio::test]
async fn test_plain_get_is_rejected() {
    let engine = engine(Arc::new(ScriptedApi::new()));

    let response = warp::test::request()
        .path("/ws/live")
        .reply(&routes(engine.clone()))
        .await;

    assert!(response.status().is_client_error());
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_pruned_subscriber_connection_is_closed() {
    let engine = engine(Arc::new(ScriptedApi::new()));

    let mut client = warp::test::ws()
        .path("/ws/live")
        .handshake(routes(engine.clone()))
        .await
        .expect("handshake");
    client.recv().await.unwrap();
    wait_for_subscribers(&engine, 1).await;

    // Same removal a failed push performs
    let (id, _) = engine.registry().snapshot().pop().unwrap();
    assert!(engine.registry().remove(id));
    engine.broadcast_once().await;

    let closed = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match client.recv().await {
                Ok(message) if message.is_close() => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "connection still open after the subscriber was pruned");
    assert!(engine.registry().is_empty());
}
