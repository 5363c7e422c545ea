use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::Stream;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::{Json, WithStatus};
use warp::sse::Event;
use warp::{Filter, Rejection, Reply};

use crate::application::services::{
    CommandRouter, ConnectionManager, Delivery, Notification, TelemetryCache,
};
use crate::domain::errors::DomainError;
use crate::domain::ports::ConnectionObserver;
use crate::domain::value_objects::{CommandRoute, DevicePhase};
use crate::infrastructure::metrics::PrometheusReporter;

/// Largest request body accepted by command routes
const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Handles shared by every request
#[derive(Clone)]
pub struct GatewayState {
    pub router: Arc<CommandRouter>,
    pub telemetry: Arc<TelemetryCache>,
    pub connection: Arc<ConnectionManager>,
    pub reported_phase: watch::Receiver<Option<DevicePhase>>,
    pub shutdown: watch::Receiver<bool>,
}

/// HTTP status for an error returned to a caller
pub fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Validation { .. } => StatusCode::BAD_REQUEST,
        DomainError::UnknownRequestKind(_) => StatusCode::NOT_FOUND,
        DomainError::Delivery { .. }
        | DomainError::BridgeUnavailable(_)
        | DomainError::BridgeClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(err: &DomainError) -> WithStatus<Json> {
    let mut body = json!({ "status": "error", "error": err.to_string() });
    if let DomainError::Validation { field, .. } = err {
        body["field"] = json!(field);
    }
    warp::reply::with_status(warp::reply::json(&body), status_for(err))
}

fn with_state(
    state: GatewayState,
) -> impl Filter<Extract = (GatewayState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn routes(
    state: GatewayState,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["Content-Type"]);

    let prefixed_command = warp::post()
        .and(warp::path("commands"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(handle_command);

    let bare_command = warp::post()
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(handle_command);

    let commands_route = warp::get()
        .and(warp::path("commands"))
        .and(warp::path::end())
        .and(with_state(state.clone()))
        .map(|state: GatewayState| {
            let router = &state.router;
            let routes: BTreeMap<&str, &CommandRoute> = router
                .request_kinds()
                .filter_map(|kind| router.route_for(kind).map(|route| (kind, route)))
                .collect();
            warp::reply::json(&routes)
        });

    let status_route = warp::get()
        .and(warp::path("status"))
        .and(warp::path::end())
        .and(with_state(state.clone()))
        .map(|state: GatewayState| warp::reply::json(&state.telemetry.snapshot()));

    let device_route = warp::get()
        .and(warp::path("device"))
        .and(warp::path::end())
        .and(with_state(state.clone()))
        .map(|state: GatewayState| {
            let summary = state.connection.connection_summary();
            let reported = *state.reported_phase.borrow();
            let transitions: Vec<Value> = state
                .connection
                .recent_transitions()
                .iter()
                .map(|t| {
                    json!({
                        "from": t.from,
                        "to": t.to,
                        "reason": t.reason,
                        "secs_ago": t.timestamp.elapsed().as_secs_f64(),
                    })
                })
                .collect();
            let queued_topics: Vec<String> = state
                .connection
                .pending_operations()
                .iter()
                .map(|op| op.topic().to_string())
                .collect();
            warp::reply::json(&json!({
                "connection": summary,
                "derived_phase": summary.phase().as_str(),
                "reported_phase": reported.map(|phase| phase.as_str()),
                "transitions": transitions,
                "handlers": state.connection.handler_count(),
                "queued_topics": queued_topics,
            }))
        });

    let liveness_route = warp::get()
        .and(warp::path("healthz").or(warp::path("livez")).unify())
        .and(warp::path::end())
        .map(|| warp::reply::with_status("OK", StatusCode::OK));

    let readiness_route = warp::get()
        .and(warp::path("readyz"))
        .and(warp::path::end())
        .and(with_state(state.clone()))
        .map(|state: GatewayState| {
            let current = state.connection.current_state();
            let status = if current.is_connected() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            warp::reply::with_status(
                warp::reply::json(&json!({ "state": current })),
                status,
            )
        });

    let metrics_route = warp::get()
        .and(warp::path("metrics"))
        .and(warp::path::end())
        .map(|| {
            warp::reply::with_header(
                PrometheusReporter::gather_metrics(),
                "Content-Type",
                "text/plain; charset=utf-8",
            )
        });

    let events_route = warp::get()
        .and(warp::path("events"))
        .and(warp::path::end())
        .and(with_state(state))
        .map(|state: GatewayState| {
            let stream =
                notification_stream(state.router.subscribe_notifications(), state.shutdown);
            warp::sse::reply(warp::sse::keep_alive().stream(stream))
        });

    commands_route
        .or(status_route)
        .or(device_route)
        .or(liveness_route)
        .or(readiness_route)
        .or(metrics_route)
        .or(events_route)
        .or(prefixed_command)
        .or(bare_command)
        .recover(reject_body)
        .with(cors)
}

/// JSON replies for body rejections; every other rejection passes through
async fn reject_body(rejection: Rejection) -> Result<WithStatus<Json>, Rejection> {
    let (status, reason) = if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("larger than {} bytes", MAX_BODY_BYTES),
        )
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        (
            StatusCode::LENGTH_REQUIRED,
            "Content-Length header required".to_string(),
        )
    } else {
        return Err(rejection);
    };

    let err = DomainError::validation("body", reason);
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({
            "status": "error",
            "error": err.to_string(),
            "field": "body",
        })),
        status,
    ))
}

async fn handle_command(
    kind: String,
    body: Bytes,
    state: GatewayState,
) -> Result<WithStatus<Json>, Infallible> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(payload) => payload,
            Err(e) => {
                let err = DomainError::validation("body", format!("invalid JSON: {}", e));
                return Ok(error_reply(&err));
            }
        }
    };

    match state.router.route(&kind, &payload).await {
        Ok(receipt) => {
            let (label, status) = match receipt.delivery {
                Delivery::Sent => ("ok", StatusCode::OK),
                Delivery::Queued => ("queued", StatusCode::ACCEPTED),
            };
            let mut reply = Map::new();
            reply.insert("status".to_string(), json!(label));
            reply.extend(receipt.fields);
            Ok(warp::reply::with_status(
                warp::reply::json(&Value::Object(reply)),
                status,
            ))
        }
        Err(e) => {
            if e.is_request_scoped() {
                debug!(kind = %kind, error = %e, "Command rejected");
            } else {
                warn!(kind = %kind, error = %e, "Command failed");
            }
            Ok(error_reply(&e))
        }
    }
}

/// SSE events for each notification; ends when the gateway shuts down
fn notification_stream(
    listener: broadcast::Receiver<Notification>,
    shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(
        (listener, shutdown),
        |(mut listener, mut shutdown)| async move {
            loop {
                if *shutdown.borrow() {
                    return None;
                }
                tokio::select! {
                    received = listener.recv() => match received {
                        Ok(notification) => {
                            let event = Event::default()
                                .event(notification.event.clone())
                                .data(notification.payload.to_string());
                            return Some((Ok(event), (listener, shutdown)));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Notification listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        },
    )
}

/// Bind the gateway and return its address plus the server future, which
/// completes once `shutdown` flips to true and open requests finish.
pub fn serve(
    state: GatewayState,
    addr: SocketAddr,
) -> Result<(SocketAddr, impl std::future::Future<Output = ()>), warp::Error> {
    let mut shutdown = state.shutdown.clone();
    let (bound, server) = warp::serve(routes(state)).try_bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    })?;
    info!("Gateway listening on http://{}", bound);
    Ok((bound, server))
}
