use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::domain::value_objects::ConnectionState;

/// Transitions kept for diagnostics
const HISTORY_LIMIT: usize = 32;

/// State transition record
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub timestamp: Instant,
    pub reason: Option<String>,
}

/// Bridge session lifecycle as seen by the connection manager
#[derive(Debug)]
pub struct ConnectionLifecycle {
    current_state: ConnectionState,
    history: VecDeque<StateTransition>,
    connected_at: Option<Instant>,
    ever_connected: bool,
    attempts: u64,
    sessions: u64,
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::Disconnected,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            connected_at: None,
            ever_connected: false,
            attempts: 0,
            sessions: 0,
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn ever_connected(&self) -> bool {
        self.ever_connected
    }

    /// Whether any connection attempt has started
    pub fn attempted(&self) -> bool {
        self.attempts > 0
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Time spent in the current session, if connected
    pub fn uptime(&self) -> Option<Duration> {
        self.connected_at.map(|start| start.elapsed())
    }

    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    pub fn transition_to_connecting(&mut self) {
        self.attempts += 1;
        self.record_transition(ConnectionState::Connecting, None);
    }

    pub fn transition_to_connected(&mut self) {
        self.record_transition(ConnectionState::Connected, None);
        self.ever_connected = true;
        self.sessions += 1;
        self.connected_at = Some(Instant::now());
    }

    pub fn transition_to_disconnected(&mut self, reason: Option<String>) {
        self.record_transition(ConnectionState::Disconnected, reason);
        self.connected_at = None;
    }

    fn record_transition(&mut self, new_state: ConnectionState, reason: Option<String>) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }

        self.history.push_back(StateTransition {
            from: self.current_state,
            to: new_state,
            timestamp: Instant::now(),
            reason,
        });
        self.current_state = new_state;
    }
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
