use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::handler_table::{HandlerTable, MessageHandler};
use crate::domain::entities::{ConnectionLifecycle, StateTransition};
use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::{
    BridgeChannel, BridgeEvent, ConnectionObserver, ConnectionSummary, MetricsReporter,
    PublishOutcome, ReconnectStrategy,
};
use crate::domain::value_objects::{ConnectionState, PendingOperation, QualityOfDelivery};

/// What happened to an accepted publish or subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Acknowledged by the live bridge
    Sent,
    /// Buffered for replay on the next connect
    Queued,
}

/// Outcome of an operation run against the live session
enum LiveResult {
    Sent,
    /// The session dropped under it; the op is back in the queue
    Requeued(DomainError),
    Failed(DomainError),
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Upper bound on waiting for a bridge acknowledgement
    pub publish_timeout: Duration,
    pub connect_timeout: Duration,
    /// Re-issue subscriptions from earlier sessions after a reconnect
    pub resubscribe_on_reconnect: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            resubscribe_on_reconnect: true,
        }
    }
}

/// Everything guarded by the manager's single lock
#[derive(Debug, Default)]
struct ManagerState {
    lifecycle: ConnectionLifecycle,
    pending: VecDeque<PendingOperation>,
    handlers: HandlerTable,
    /// Subscriptions acknowledged by the bridge, in first-acknowledged order
    active: Vec<(String, QualityOfDelivery)>,
    closed: bool,
}

impl ManagerState {
    fn remember_subscription(&mut self, topic: &str, qos: QualityOfDelivery) {
        match self.active.iter_mut().find(|(t, _)| t == topic) {
            Some(entry) => entry.1 = qos,
            None => self.active.push((topic.to_string(), qos)),
        }
    }
}

/// Owns the bridge session, buffers operations across disconnects and
/// replays them in FIFO order once the session is back.
///
/// The state lock is never held across a bridge call.
pub struct ConnectionManager {
    bridge: Arc<dyn BridgeChannel>,
    inner: Mutex<ManagerState>,
    metrics: Arc<dyn MetricsReporter>,
    settings: ManagerSettings,
}

impl ConnectionManager {
    pub fn new(
        bridge: Arc<dyn BridgeChannel>,
        metrics: Arc<dyn MetricsReporter>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            bridge,
            inner: Mutex::new(ManagerState::default()),
            metrics,
            settings,
        }
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state().lifecycle.current_state()
    }

    /// Copy of the operations waiting for the next session
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.state().pending.iter().cloned().collect()
    }

    /// Recent state transitions, oldest first
    pub fn recent_transitions(&self) -> Vec<StateTransition> {
        self.state().lifecycle.history().cloned().collect()
    }

    pub fn handler_count(&self) -> usize {
        self.state().handlers.len()
    }

    /// Establish the bridge session and replay everything buffered.
    ///
    /// On failure the state returns to `Disconnected`; the supervisor loop in
    /// [`ConnectionManager::run`] decides when to try again.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state();
            if state.closed {
                return Err(DomainError::BridgeClosed);
            }
            match state.lifecycle.current_state() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(DomainError::BridgeUnavailable(
                        "connection attempt already in progress".to_string(),
                    ))
                }
                ConnectionState::Disconnected => state.lifecycle.transition_to_connecting(),
            }
        }
        self.metrics.report_state_change(ConnectionState::Connecting);
        info!(bridge = self.bridge.name(), "Connecting bridge");

        let connected = match tokio::time::timeout(self.settings.connect_timeout, self.bridge.connect())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DomainError::BridgeUnavailable(format!(
                "connect timed out after {:?}",
                self.settings.connect_timeout
            ))),
        };
        if let Err(e) = connected {
            self.abandon_attempt(&e);
            return Err(e);
        }

        self.restore_subscriptions().await?;
        self.drain_pending().await
    }

    async fn restore_subscriptions(&self) -> Result<()> {
        let restore: Vec<(String, QualityOfDelivery)> = {
            let state = self.state();
            if !self.settings.resubscribe_on_reconnect {
                Vec::new()
            } else {
                state
                    .active
                    .iter()
                    .filter(|(topic, _)| {
                        !state
                            .pending
                            .iter()
                            .any(|op| op.is_subscribe() && op.topic() == topic)
                    })
                    .cloned()
                    .collect()
            }
        };

        for (topic, qos) in &restore {
            let op = PendingOperation::Subscribe {
                topic: topic.clone(),
                qos: *qos,
            };
            if let Err(e) = self.execute(&op).await {
                self.abandon_attempt(&e);
                return Err(e);
            }
        }

        if !restore.is_empty() {
            info!(count = restore.len(), "Restored subscriptions");
        }
        Ok(())
    }

    /// Replay the queue one operation at a time.
    ///
    /// The state stays `Connecting` until the queue is empty, so operations
    /// issued during the replay are appended behind it rather than
    /// overtaking it.
    async fn drain_pending(&self) -> Result<()> {
        let mut replayed = 0usize;

        loop {
            let (op, depth) = {
                let mut state = self.state();
                if state.closed {
                    return Err(DomainError::BridgeClosed);
                }
                match state.pending.pop_front() {
                    Some(op) => {
                        let depth = state.pending.len();
                        (op, depth)
                    }
                    None => {
                        state.lifecycle.transition_to_connected();
                        break;
                    }
                }
            };
            self.metrics.report_pending_depth(depth);

            match self.execute(&op).await {
                Ok(()) => {
                    if let PendingOperation::Subscribe { topic, qos } = &op {
                        self.state().remember_subscription(topic, *qos);
                    }
                    replayed += 1;
                }
                Err(e) => {
                    warn!(topic = %op.topic(), error = %e, "Replay interrupted");
                    let depth = {
                        let mut state = self.state();
                        state.pending.push_front(op);
                        state.pending.len()
                    };
                    self.metrics.report_pending_depth(depth);
                    self.abandon_attempt(&e);
                    return Err(e);
                }
            }
        }

        self.metrics.report_state_change(ConnectionState::Connected);
        self.metrics.report_pending_depth(0);
        info!(bridge = self.bridge.name(), replayed, "Bridge connected");
        Ok(())
    }

    fn abandon_attempt(&self, error: &DomainError) {
        {
            let mut state = self.state();
            if state.lifecycle.current_state() != ConnectionState::Disconnected {
                state
                    .lifecycle
                    .transition_to_disconnected(Some(error.to_string()));
            }
        }
        self.metrics
            .report_state_change(ConnectionState::Disconnected);
    }

    /// Run one operation against the bridge with the acknowledgement bound
    async fn execute(&self, op: &PendingOperation) -> Result<()> {
        let call = async {
            match op {
                PendingOperation::Subscribe { topic, qos } => {
                    self.bridge.subscribe(topic, *qos).await
                }
                PendingOperation::Publish {
                    topic,
                    payload,
                    qos,
                } => self.bridge.publish(topic, payload, *qos).await,
            }
        };

        match tokio::time::timeout(self.settings.publish_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::delivery(
                op.topic(),
                format!(
                    "no acknowledgement within {:?}",
                    self.settings.publish_timeout
                ),
            )),
        }
    }

    /// Queue `op` unless the session is live. When live, the op is handed
    /// back with the session number it will run on.
    fn buffer_unless_connected(
        &self,
        op: PendingOperation,
    ) -> Result<Option<(PendingOperation, u64)>> {
        let depth = {
            let mut state = self.state();
            if state.closed {
                return Err(DomainError::BridgeClosed);
            }
            if state.lifecycle.current_state().is_connected() {
                let session = state.lifecycle.sessions();
                return Ok(Some((op, session)));
            }
            debug!(topic = %op.topic(), subscribe = op.is_subscribe(), "Buffering bridge operation");
            state.pending.push_back(op);
            state.pending.len()
        };
        self.metrics.report_pending_depth(depth);
        Ok(None)
    }

    /// Run a live operation, recovering from the session dropping under it.
    ///
    /// If a newer session is already live when the bridge reports the loss,
    /// the op is sent again on it. Otherwise it joins the queue behind
    /// anything buffered and the caller gets a `Delivery` error saying so.
    async fn execute_live(&self, op: PendingOperation, mut session: u64) -> LiveResult {
        loop {
            let reason = match self.execute(&op).await {
                Ok(()) => return LiveResult::Sent,
                Err(DomainError::BridgeUnavailable(reason)) => reason,
                Err(e) => return LiveResult::Failed(e),
            };

            let (depth, topic) = {
                let mut state = self.state();
                if state.closed {
                    return LiveResult::Failed(DomainError::BridgeClosed);
                }
                let current = state.lifecycle.sessions();
                if state.lifecycle.current_state().is_connected() && current != session {
                    debug!(topic = %op.topic(), session = current, "Resending on new session");
                    session = current;
                    continue;
                }
                let topic = op.topic().to_string();
                state.pending.push_back(op);
                (state.pending.len(), topic)
            };

            self.metrics.report_pending_depth(depth);
            return LiveResult::Requeued(DomainError::delivery(
                topic,
                format!("{}; queued for replay", reason),
            ));
        }
    }

    /// Register `handler` for `topic` and subscribe now or on the next connect
    pub async fn subscribe(
        &self,
        topic: &str,
        qos: QualityOfDelivery,
        handler: MessageHandler,
    ) -> Result<Delivery> {
        {
            let mut state = self.state();
            if state.closed {
                return Err(DomainError::BridgeClosed);
            }
            if state.handlers.insert(topic, handler) {
                warn!(topic = %topic, "Replaced existing message handler");
            }
        }

        let op = PendingOperation::Subscribe {
            topic: topic.to_string(),
            qos,
        };
        let Some((op, session)) = self.buffer_unless_connected(op)? else {
            return Ok(Delivery::Queued);
        };

        match self.execute_live(op, session).await {
            LiveResult::Sent => {
                self.state().remember_subscription(topic, qos);
                debug!(topic = %topic, %qos, "Subscribed");
                Ok(Delivery::Sent)
            }
            LiveResult::Requeued(e) | LiveResult::Failed(e) => Err(e),
        }
    }

    /// Send `payload` now, or buffer it while the session is down
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QualityOfDelivery,
    ) -> Result<Delivery> {
        let op = PendingOperation::Publish {
            topic: topic.to_string(),
            payload,
            qos,
        };
        let (op, session) = match self.buffer_unless_connected(op) {
            Ok(Some(live)) => live,
            Ok(None) => {
                self.metrics.report_publish(PublishOutcome::Queued);
                return Ok(Delivery::Queued);
            }
            Err(e) => {
                self.metrics.report_publish(PublishOutcome::Failed);
                return Err(e);
            }
        };

        match self.execute_live(op, session).await {
            LiveResult::Sent => {
                self.metrics.report_publish(PublishOutcome::Sent);
                debug!(topic = %topic, %qos, "Published");
                Ok(Delivery::Sent)
            }
            LiveResult::Requeued(e) => {
                self.metrics.report_publish(PublishOutcome::Queued);
                Err(e)
            }
            LiveResult::Failed(e) => {
                self.metrics.report_publish(PublishOutcome::Failed);
                warn!(topic = %topic, error = %e, "Publish failed");
                Err(e)
            }
        }
    }

    /// Mark the session lost; queue and handlers are kept
    pub fn on_connection_lost(&self, reason: &str) {
        let changed = {
            let mut state = self.state();
            if state.lifecycle.current_state() == ConnectionState::Disconnected {
                false
            } else {
                state
                    .lifecycle
                    .transition_to_disconnected(Some(reason.to_string()));
                true
            }
        };

        if changed {
            self.metrics
                .report_state_change(ConnectionState::Disconnected);
            warn!(bridge = self.bridge.name(), reason = %reason, "Bridge connection lost");
        }
    }

    /// Hand an inbound message to its registered handler
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        let handler = self.state().handlers.lookup(topic);
        match handler {
            Some(handler) => handler(topic, payload),
            None => debug!(topic = %topic, "No handler for inbound message"),
        }
    }

    /// Close the session for good; later operations fail with `BridgeClosed`
    pub async fn close(&self) {
        {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            if state.lifecycle.current_state() != ConnectionState::Disconnected {
                state
                    .lifecycle
                    .transition_to_disconnected(Some("shutdown".to_string()));
            }
        }
        self.metrics
            .report_state_change(ConnectionState::Disconnected);

        if let Err(e) = self.bridge.disconnect().await {
            warn!(error = %e, "Bridge disconnect failed");
        }
        info!(bridge = self.bridge.name(), "Bridge closed");
    }

    /// Supervise the session until shutdown.
    ///
    /// Connects, dispatches inbound events, and after a failed attempt or a
    /// lost session waits for `strategy` before reconnecting.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<BridgeEvent>,
        mut strategy: Box<dyn ReconnectStrategy>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        'supervise: loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect().await {
                Ok(()) => strategy.reset(),
                Err(DomainError::BridgeClosed) => break,
                Err(e) => {
                    warn!(error = %e, "Bridge connection attempt failed");
                    if !self
                        .wait_before_retry(strategy.as_mut(), &mut events, &mut shutdown)
                        .await
                    {
                        break;
                    }
                    continue;
                }
            }

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break 'supervise,
                    event = events.recv() => match event {
                        Some(BridgeEvent::Message { topic, payload }) => self.dispatch(&topic, &payload),
                        Some(BridgeEvent::ConnectionLost(reason)) => {
                            self.on_connection_lost(&reason);
                            break;
                        }
                        None => break 'supervise,
                    },
                }
            }

            if !self
                .wait_before_retry(strategy.as_mut(), &mut events, &mut shutdown)
                .await
            {
                break;
            }
        }

        self.close().await;
    }

    /// Sleep out the next backoff delay; false when shutdown arrived first
    async fn wait_before_retry(
        &self,
        strategy: &mut dyn ReconnectStrategy,
        events: &mut mpsc::UnboundedReceiver<BridgeEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let delay = strategy.next_delay();
        self.metrics.report_reconnect_attempt();
        self.metrics.report_backoff(delay.as_secs_f64());
        info!("Reconnecting in {:?}", delay);

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = shutdown.changed() => return false,
                event = events.recv() => match event {
                    // late messages from the previous session are still valid readings
                    Some(BridgeEvent::Message { topic, payload }) => self.dispatch(&topic, &payload),
                    Some(BridgeEvent::ConnectionLost(_)) => {}
                    None => return false,
                },
            }
        }
    }
}

impl ConnectionObserver for ConnectionManager {
    fn connection_summary(&self) -> ConnectionSummary {
        let state = self.state();
        ConnectionSummary {
            state: state.lifecycle.current_state(),
            ever_connected: state.lifecycle.ever_connected(),
            attempted: state.lifecycle.attempted(),
            attempts: state.lifecycle.attempts(),
            pending: state.pending.len(),
            sessions: state.lifecycle.sessions(),
            uptime: state.lifecycle.uptime(),
        }
    }
}
