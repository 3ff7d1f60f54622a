//! HTTP and WebSocket routes.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use fleet_sync::FleetEngine;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::ws::serve_subscriber;

#[derive(Debug, Deserialize)]
struct LiveplateQuery {
    device_id: Option<String>,
}

fn with_engine(
    engine: Arc<FleetEngine>,
) -> impl Filter<Extract = (Arc<FleetEngine>,), Error = Infallible> + Clone {
    warp::any().map(move || engine.clone())
}

/// CORS policy for browser dashboards served from another origin
fn cors(engine: &FleetEngine) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_credentials(true)
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["accept", "authorization", "content-type"]);

    let config = engine.config();
    if config.allows_any_origin() {
        builder.allow_any_origin()
    } else {
        // Origins are checked by EngineConfig::validate
        builder.allow_origins(config.allowed_origins.iter().map(String::as_str))
    }
}

fn json_error(status: StatusCode, body: serde_json::Value) -> Response {
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Every route served by the push server, with rejections rendered as JSON.
///
/// Requests pass through the configured CORS policy and are logged on
/// completion.
pub fn routes(
    engine: Arc<FleetEngine>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let cors = cors(&engine);
    let request_log = warp::log::custom(|request: warp::log::Info<'_>| {
        info!(
            method = %request.method(),
            path = request.path(),
            status = request.status().as_u16(),
            elapsed_ms = request.elapsed().as_millis() as u64,
            "request handled"
        );
    });

    let live_ws = warp::path!("ws" / "live")
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(with_engine(engine.clone()))
        .map(|ws: warp::ws::Ws, peer: Option<SocketAddr>, engine: Arc<FleetEngine>| {
            ws.on_upgrade(move |socket| serve_subscriber(socket, engine, peer))
        });

    let health = warp::path!("api" / "health")
        .and(warp::get())
        .and(with_engine(engine.clone()))
        .map(|engine: Arc<FleetEngine>| warp::reply::json(&engine.health()));

    let live = warp::path!("api" / "live")
        .and(warp::get())
        .and(with_engine(engine.clone()))
        .map(|engine: Arc<FleetEngine>| warp::reply::json(&engine.get_all_device_states()));

    let gps = warp::path!("api" / "gps" / String)
        .and(warp::get())
        .and(with_engine(engine.clone()))
        .map(|device_id: String, engine: Arc<FleetEngine>| {
            match engine.get_device_state(&device_id) {
                Some(state) => warp::reply::json(&state).into_response(),
                None => json_error(
                    StatusCode::NOT_FOUND,
                    json!({ "error": "unknown device_id", "validIds": engine.device_ids() }),
                ),
            }
        });

    let liveplate = warp::path!("api" / "liveplate")
        .and(warp::get())
        .and(warp::query::<LiveplateQuery>())
        .and(with_engine(engine.clone()))
        .and_then(liveplate_handler);

    let liveplate_all = warp::path!("api" / "liveplate_all")
        .and(warp::get())
        .and(with_engine(engine))
        .and_then(|engine: Arc<FleetEngine>| async move {
            let entries = engine.get_enriched_snapshot_all().await;
            Ok::<_, Rejection>(warp::reply::json(&entries))
        });

    live_ws
        .or(health)
        .or(live)
        .or(gps)
        .or(liveplate)
        .or(liveplate_all)
        .with(cors)
        .recover(handle_rejection)
        .with(request_log)
}

async fn liveplate_handler(
    query: LiveplateQuery,
    engine: Arc<FleetEngine>,
) -> Result<Response, Rejection> {
    let requested = query
        .device_id
        .filter(|id| !id.trim().is_empty())
        .or_else(|| engine.device_ids().first().map(|id| id.to_string()));

    let entry = match requested.as_deref().and_then(|q| engine.find_device(q)) {
        Some(device_id) => engine.get_enriched_snapshot(device_id.as_str()).await,
        None => None,
    };

    Ok(match entry {
        Some(entry) => warp::reply::json(&entry).into_response(),
        None => {
            debug!(query = ?requested, "liveplate lookup matched no device");
            json_error(StatusCode::NOT_FOUND, json!({ "error": "unknown device_id" }))
        }
    })
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "invalid query string")
    } else if err.find::<warp::reject::MissingHeader>().is_some()
        || err.find::<warp::reject::InvalidHeader>().is_some()
    {
        (StatusCode::BAD_REQUEST, "websocket upgrade required")
    } else if err.find::<warp::cors::CorsForbidden>().is_some() {
        (StatusCode::FORBIDDEN, "origin not allowed")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        debug!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    };

    Ok(json_error(code, json!({ "error": message })))
}
