use std::sync::Arc;

use device_shim::domain::ports::NoopMetrics;
use device_shim::infrastructure::http::{routes, GatewayState};
use device_shim::{
    CommandRouter, ConnectionManager, DevicePhase, DevicePreset, ManagerSettings,
    SimulatedBridge, TelemetryCache,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use warp::http::StatusCode;

struct Harness {
    bridge: Arc<SimulatedBridge>,
    manager: Arc<ConnectionManager>,
    telemetry: Arc<TelemetryCache>,
    state: GatewayState,
    _phase: watch::Sender<Option<DevicePhase>>,
    _shutdown: watch::Sender<bool>,
}

fn harness() -> Harness {
    let (tx, _rx) = mpsc::unbounded_channel();
    let bridge = Arc::new(SimulatedBridge::new(tx));
    let manager = Arc::new(ConnectionManager::new(
        bridge.clone(),
        Arc::new(NoopMetrics),
        ManagerSettings::default(),
    ));
    let telemetry = Arc::new(TelemetryCache::new(Arc::new(NoopMetrics)));
    let profile = DevicePreset::MobileRobot.profile();
    let router = Arc::new(CommandRouter::new(profile.commands, manager.clone()));

    let (phase_tx, phase_rx) = watch::channel(Some(DevicePhase::Running));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = GatewayState {
        router,
        telemetry: telemetry.clone(),
        connection: manager.clone(),
        reported_phase: phase_rx,
        shutdown: shutdown_rx,
    };

    Harness {
        bridge,
        manager,
        telemetry,
        state,
        _phase: phase_tx,
        _shutdown: shutdown_tx,
    }
}

fn body_json(response: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

#[tokio::test]
async fn test_move_while_connected_publishes_once() {
    let h = harness();
    h.manager.connect().await.unwrap();

    let response = warp::test::request()
        .method("POST")
        .path("/move")
        .json(&json!({"linear": 0.5, "angular": -0.2}))
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(&response),
        json!({"status": "ok", "linear": 0.5, "angular": -0.2})
    );

    let published = h.bridge.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "/cmd_vel");
    let twist: Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(twist["linear"]["x"], json!(0.5));
    assert_eq!(twist["angular"]["z"], json!(-0.2));
}

#[tokio::test]
async fn test_move_without_linear_is_rejected() {
    let h = harness();
    h.manager.connect().await.unwrap();

    let response = warp::test::request()
        .method("POST")
        .path("/move")
        .json(&json!({"angular": -0.2}))
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(&response)["field"], json!("linear"));
    assert!(h.bridge.published().is_empty());
}

#[tokio::test]
async fn test_command_while_disconnected_is_queued() {
    let h = harness();

    let response = warp::test::request()
        .method("POST")
        .path("/commands/move")
        .json(&json!({"linear": 0.1, "angular": 0.0}))
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(&response)["status"], json!("queued"));
    assert_eq!(h.manager.pending_operations().len(), 1);

    let device = warp::test::request()
        .path("/device")
        .reply(&routes(h.state.clone()))
        .await;
    assert_eq!(body_json(&device)["queued_topics"], json!(["/cmd_vel"]));

    h.manager.connect().await.unwrap();
    assert_eq!(h.bridge.published().len(), 1);
}

#[tokio::test]
async fn test_unknown_kind_and_bad_json() {
    let h = harness();
    let filter = routes(h.state.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/teleport")
        .json(&json!({}))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = warp::test::request()
        .method("POST")
        .path("/move")
        .body("{not json")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(&response)["field"], json!("body"));
}

#[tokio::test]
async fn test_status_returns_ready_channels_only() {
    let h = harness();
    h.telemetry.register_channel("battery");
    h.telemetry.register_channel("imu");
    h.telemetry.update("battery", json!({"voltage": 12.1}));

    let response = warp::test::request()
        .method("GET")
        .path("/status")
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(&response);
    assert_eq!(body["battery"]["value"], json!({"voltage": 12.1}));
    assert!(body.get("imu").is_none());
}

#[tokio::test]
async fn test_liveness_is_independent_of_readiness() {
    let h = harness();
    let filter = routes(h.state.clone());

    for path in ["/healthz", "/livez"] {
        let response = warp::test::request().path(path).reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = warp::test::request().path("/readyz").reply(&filter).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    h.manager.connect().await.unwrap();
    let response = warp::test::request().path("/readyz").reply(&filter).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(&response)["state"], json!("connected"));
}

#[tokio::test]
async fn test_device_summary() {
    let h = harness();
    h.manager.connect().await.unwrap();

    let response = warp::test::request()
        .path("/device")
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(&response);
    assert_eq!(body["connection"]["state"], json!("connected"));
    assert_eq!(body["derived_phase"], json!("Running"));
    assert_eq!(body["reported_phase"], json!("Running"));
}

#[tokio::test]
async fn test_closed_bridge_maps_to_service_unavailable() {
    let h = harness();
    h.manager.close().await;

    let response = warp::test::request()
        .method("POST")
        .path("/move")
        .json(&json!({"linear": 0.5, "angular": -0.2}))
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_is_text() {
    let h = harness();
    let response = warp::test::request()
        .path("/metrics")
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
}

#[tokio::test]
async fn test_nav_defaults_algorithm_and_publishes_string_message() {
    let h = harness();
    h.manager.connect().await.unwrap();

    let response = warp::test::request()
        .method("POST")
        .path("/nav")
        .json(&json!({"points": [[1.0, 2.0], [3.0, 4.0]]}))
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(&response);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["algorithm"], json!("dijkstra"));

    let published = h.bridge.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "/nav_cmd");
    let message: Value = serde_json::from_slice(&published[0].1).unwrap();
    let request: Value = serde_json::from_str(message["data"].as_str().unwrap()).unwrap();
    assert_eq!(request["points"], json!([[1.0, 2.0], [3.0, 4.0]]));
    assert_eq!(request["algorithm"], json!("dijkstra"));
}

#[tokio::test]
async fn test_oversized_body_is_rejected_before_routing() {
    let h = harness();
    h.manager.connect().await.unwrap();
    let padding = "x".repeat(70 * 1024);

    let response = warp::test::request()
        .method("POST")
        .path("/move")
        .body(format!(r#"{{"linear":0.5,"angular":0.0,"note":"{}"}}"#, padding))
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(&response)["field"], json!("body"));
    assert!(h.bridge.published().is_empty());
}

#[tokio::test]
async fn test_command_discovery_lists_routes() {
    let h = harness();

    let response = warp::test::request()
        .path("/commands")
        .reply(&routes(h.state.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(&response);
    assert_eq!(body["move"]["topic"], json!("/cmd_vel"));
    assert_eq!(body["move"]["format"], json!("twist"));
    assert_eq!(body["nav"]["format"], json!("string"));
    assert_eq!(body.as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn test_device_summary_lists_transitions() {
    let h = harness();
    h.manager.connect().await.unwrap();
    h.manager.on_connection_lost("broker restarted");

    let response = warp::test::request()
        .path("/device")
        .reply(&routes(h.state.clone()))
        .await;

    let body = body_json(&response);
    let transitions = body["transitions"].as_array().unwrap();
    assert_eq!(transitions.len(), 3);
    assert_eq!(transitions[2]["from"], json!("connected"));
    assert_eq!(transitions[2]["reason"], json!("broker restarted"));
}
