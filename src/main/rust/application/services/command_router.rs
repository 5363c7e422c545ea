use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::connection_manager::{ConnectionManager, Delivery};
use super::telemetry_cache::decode_payload;
use crate::domain::entities::NotificationBinding;
use crate::domain::errors::{DomainError, Result};
use crate::domain::value_objects::CommandRoute;

/// Buffered notifications per listener before it starts lagging
const NOTIFICATION_CAPACITY: usize = 256;

/// Result of a successfully routed request
#[derive(Debug, Clone, PartialEq)]
pub struct RouteReceipt {
    pub kind: String,
    pub topic: String,
    pub delivery: Delivery,
    /// Validated fields, echoed back to the caller
    pub fields: Map<String, Value>,
}

/// Device message forwarded to external listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: String,
    pub topic: String,
    pub payload: Value,
}

/// Translates external requests into bridge publishes using a table fixed
/// at construction.
pub struct CommandRouter {
    routes: BTreeMap<String, CommandRoute>,
    connection: Arc<ConnectionManager>,
    notifications: broadcast::Sender<Notification>,
}

impl CommandRouter {
    pub fn new(routes: BTreeMap<String, CommandRoute>, connection: Arc<ConnectionManager>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            routes,
            connection,
            notifications,
        }
    }

    pub fn request_kinds(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn route_for(&self, kind: &str) -> Option<&CommandRoute> {
        self.routes.get(kind)
    }

    /// Validate `payload` and publish it on the topic mapped to `kind`.
    ///
    /// Exactly one publish attempt per valid call; buffering and replay are
    /// left to the connection manager.
    pub async fn route(&self, kind: &str, payload: &Value) -> Result<RouteReceipt> {
        let route = self
            .routes
            .get(kind)
            .ok_or_else(|| DomainError::UnknownRequestKind(kind.to_string()))?;

        let fields = route.validate(payload)?;
        let message = route.encode(&fields)?;

        let delivery = self
            .connection
            .publish(&route.topic, message, route.qos)
            .await?;

        debug!(kind = %kind, topic = %route.topic, ?delivery, "Routed request");
        Ok(RouteReceipt {
            kind: kind.to_string(),
            topic: route.topic.clone(),
            delivery,
            fields,
        })
    }

    /// Forward each bound topic to notification listeners
    pub async fn bind_notifications(&self, bindings: &[NotificationBinding]) -> Result<()> {
        for binding in bindings {
            let sender = self.notifications.clone();
            let event = binding.event.clone();
            let handler = Arc::new(move |topic: &str, payload: &[u8]| {
                // no listeners is fine
                let _ = sender.send(Notification {
                    event: event.clone(),
                    topic: topic.to_string(),
                    payload: decode_payload(payload),
                });
            });

            self.connection
                .subscribe(&binding.topic, binding.qos, handler)
                .await?;
            info!(event = %binding.event, topic = %binding.topic, "Forwarding notifications");
        }
        Ok(())
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }
}
