use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use device_shim::application::services::MessageHandler;
use device_shim::domain::ports::FixedDelay;
use device_shim::infrastructure::simulated::BridgeOperation;
use device_shim::{
    ConnectionManager, ConnectionState, Delivery, ManagerSettings, PendingOperation,
    QualityOfDelivery, SimulatedBridge,
};
use proptest::prelude::*;
use tokio::sync::{mpsc, watch};

fn noop_handler() -> MessageHandler {
    Arc::new(|_, _| {})
}

fn setup() -> (
    Arc<SimulatedBridge>,
    Arc<ConnectionManager>,
    mpsc::UnboundedReceiver<device_shim::BridgeEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let bridge = Arc::new(SimulatedBridge::new(tx));
    let manager = Arc::new(ConnectionManager::new(
        bridge.clone(),
        Arc::new(device_shim::domain::ports::NoopMetrics),
        ManagerSettings::default(),
    ));
    (bridge, manager, rx)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[derive(Debug, Clone)]
enum Call {
    Subscribe(usize),
    Publish(usize, u8),
}

fn call() -> impl Strategy<Value = Call> {
    prop_oneof![
        (0usize..4).prop_map(Call::Subscribe),
        (0usize..4, any::<u8>()).prop_map(|(topic, byte)| Call::Publish(topic, byte)),
    ]
}

proptest! {
    /// Everything issued while disconnected reaches the bridge once, in order
    #[test]
    fn prop_buffered_operations_replay_in_order(calls in prop::collection::vec(call(), 0..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let observed = runtime.block_on(async {
            let (bridge, manager, _rx) = setup();
            for call in &calls {
                let delivery = match call {
                    Call::Subscribe(topic) => manager
                        .subscribe(&format!("topic/{}", topic), QualityOfDelivery::AtLeastOnce, noop_handler())
                        .await,
                    Call::Publish(topic, byte) => manager
                        .publish(&format!("topic/{}", topic), vec![*byte], QualityOfDelivery::AtLeastOnce)
                        .await,
                };
                assert_eq!(delivery.unwrap(), Delivery::Queued);
            }
            assert!(bridge.operations().is_empty());

            manager.connect().await.unwrap();
            assert!(manager.pending_operations().is_empty());
            bridge.operations()
        });

        let expected: Vec<BridgeOperation> = calls
            .iter()
            .map(|call| match call {
                Call::Subscribe(topic) => BridgeOperation::Subscribe(format!("topic/{}", topic)),
                Call::Publish(topic, byte) => {
                    BridgeOperation::Publish(format!("topic/{}", topic), vec![*byte])
                }
            })
            .collect();
        prop_assert_eq!(observed, expected);
    }
}

#[tokio::test]
async fn test_subscribe_then_publish_replayed_in_order() {
    let (bridge, manager, _rx) = setup();

    manager
        .subscribe("video", QualityOfDelivery::AtLeastOnce, noop_handler())
        .await
        .unwrap();
    manager
        .publish("start_capture", b"{}".to_vec(), QualityOfDelivery::AtLeastOnce)
        .await
        .unwrap();
    assert_eq!(
        manager.pending_operations(),
        vec![
            PendingOperation::Subscribe {
                topic: "video".to_string(),
                qos: QualityOfDelivery::AtLeastOnce,
            },
            PendingOperation::Publish {
                topic: "start_capture".to_string(),
                payload: b"{}".to_vec(),
                qos: QualityOfDelivery::AtLeastOnce,
            },
        ]
    );

    manager.connect().await.unwrap();

    assert_eq!(
        bridge.operations(),
        vec![
            BridgeOperation::Subscribe("video".to_string()),
            BridgeOperation::Publish("start_capture".to_string(), b"{}".to_vec()),
        ]
    );
    assert_eq!(manager.current_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_supervisor_retries_until_reachable() {
    let (bridge, manager, rx) = setup();
    bridge.set_reachable(false);
    manager
        .publish("device/commands/start_capture", b"{}".to_vec(), QualityOfDelivery::AtLeastOnce)
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(manager.clone().run(
        rx,
        Box::new(FixedDelay(Duration::from_millis(10))),
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bridge.connect_count(), 0);
    assert_eq!(manager.pending_operations().len(), 1);

    bridge.set_reachable(true);
    wait_until(|| manager.current_state() == ConnectionState::Connected).await;
    assert_eq!(bridge.published().len(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert!(!bridge.is_connected());
}

#[tokio::test]
async fn test_lost_session_reconnects_and_restores_subscriptions() {
    let (bridge, manager, rx) = setup();
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    manager
        .subscribe(
            "device/telemetry/video_stream",
            QualityOfDelivery::AtLeastOnce,
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(manager.clone().run(
        rx,
        Box::new(FixedDelay(Duration::from_millis(10))),
        shutdown_rx,
    ));

    wait_until(|| manager.current_state() == ConnectionState::Connected).await;
    bridge.inject("device/telemetry/video_stream", br#"{"format":"h264"}"#);
    wait_until(|| received.load(Ordering::SeqCst) == 1).await;

    bridge.clear_operations();
    bridge.drop_connection("broker restarted");
    wait_until(|| bridge.connect_count() == 2).await;
    wait_until(|| manager.current_state() == ConnectionState::Connected).await;

    assert_eq!(
        bridge.operations(),
        vec![BridgeOperation::Subscribe(
            "device/telemetry/video_stream".to_string()
        )]
    );
    assert_eq!(manager.handler_count(), 1);

    bridge.inject("device/telemetry/video_stream", br#"{"format":"h264"}"#);
    wait_until(|| received.load(Ordering::SeqCst) == 2).await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_operations_after_shutdown_are_rejected() {
    let (_bridge, manager, rx) = setup();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(manager.clone().run(
        rx,
        Box::new(FixedDelay(Duration::from_millis(10))),
        shutdown_rx,
    ));
    wait_until(|| manager.current_state() == ConnectionState::Connected).await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let result = manager
        .publish("device/commands/stop_capture", Vec::new(), QualityOfDelivery::AtLeastOnce)
        .await;
    assert!(matches!(result, Err(device_shim::DomainError::BridgeClosed)));
}

#[tokio::test]
async fn test_publish_interrupted_by_reconnect_is_resent_before_later_commands() {
    let (bridge, manager, _rx) = setup();
    manager.connect().await.unwrap();
    bridge.set_ack_delay(Some(Duration::from_millis(100)));

    let stop = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .publish("stop", b"{}".to_vec(), QualityOfDelivery::AtLeastOnce)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    bridge.set_ack_delay(None);

    bridge.drop_connection("flap");
    manager.on_connection_lost("flap");
    manager.connect().await.unwrap();

    assert_eq!(stop.await.unwrap().unwrap(), Delivery::Sent);
    let start = manager
        .publish("start", b"{}".to_vec(), QualityOfDelivery::AtLeastOnce)
        .await
        .unwrap();

    assert_eq!(start, Delivery::Sent);
    assert_eq!(manager.current_state(), ConnectionState::Connected);
    assert!(manager.pending_operations().is_empty());
    let topics: Vec<String> = bridge.published().into_iter().map(|(topic, _)| topic).collect();
    assert_eq!(topics, vec!["stop".to_string(), "start".to_string()]);
}

#[tokio::test]
async fn test_replay_failure_keeps_failed_operation_at_head() {
    let (bridge, manager, _rx) = setup();
    for topic in ["a", "b", "c"] {
        manager
            .publish(topic, vec![1], QualityOfDelivery::AtLeastOnce)
            .await
            .unwrap();
    }

    bridge.reject_topic(Some("b"));
    assert!(manager.connect().await.is_err());

    assert_eq!(manager.current_state(), ConnectionState::Disconnected);
    let remaining: Vec<String> = manager
        .pending_operations()
        .iter()
        .map(|op| op.topic().to_string())
        .collect();
    assert_eq!(remaining, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(
        bridge.operations(),
        vec![BridgeOperation::Publish("a".to_string(), vec![1])]
    );

    bridge.reject_topic(None);
    manager.connect().await.unwrap();

    let topics: Vec<String> = bridge.published().into_iter().map(|(topic, _)| topic).collect();
    assert_eq!(topics, vec!["a", "b", "c"]);
    assert!(manager.pending_operations().is_empty());
}

#[tokio::test]
async fn test_publish_on_dead_session_is_queued_then_replayed() {
    let (bridge, manager, _rx) = setup();
    manager.connect().await.unwrap();

    // the device drops before the manager hears about it
    bridge.drop_connection("cable pulled");
    let result = manager
        .publish("device/commands/stop_capture", b"{}".to_vec(), QualityOfDelivery::AtLeastOnce)
        .await;

    assert!(matches!(result, Err(device_shim::DomainError::Delivery { .. })));
    assert_eq!(manager.pending_operations().len(), 1);
    assert!(bridge.published().is_empty());

    manager.on_connection_lost("cable pulled");
    manager.connect().await.unwrap();

    assert_eq!(
        bridge.published(),
        vec![("device/commands/stop_capture".to_string(), b"{}".to_vec())]
    );
    assert!(manager.pending_operations().is_empty());
}
