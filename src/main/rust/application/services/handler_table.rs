use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with (topic, payload) for every inbound bridge message
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Topic → handler mapping with last-registration-wins semantics.
///
/// Keys may be MQTT-style filters (`+` matches one level, `#` the rest).
/// An exact key wins over any filter; among matching filters the one with
/// the most literal levels wins, then the lexically smallest.
#[derive(Default, Clone)]
pub(crate) struct HandlerTable {
    handlers: BTreeMap<String, MessageHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, returning true when it replaced an earlier one
    pub fn insert(&mut self, topic: &str, handler: MessageHandler) -> bool {
        self.handlers.insert(topic.to_string(), handler).is_some()
    }

    pub fn lookup(&self, topic: &str) -> Option<MessageHandler> {
        if let Some(handler) = self.handlers.get(topic) {
            return Some(Arc::clone(handler));
        }

        self.handlers
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .max_by_key(|&(filter, _)| (literal_levels(filter), Reverse(filter.as_str())))
            .map(|(_, handler)| Arc::clone(handler))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

fn literal_levels(filter: &str) -> usize {
    filter
        .split('/')
        .filter(|level| *level != "+" && *level != "#")
        .count()
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// MQTT topic filter matching
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
