//! Connection health registry
//!
//! One status slot per named channel. Writers report freely; a snapshot is
//! only rebuilt when a channel's `(state, message)` actually changes.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::network::transport::LinkState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: LinkState,
    pub message: Option<String>,
    /// Unix millis of the last change
    pub changed_at_ms: i64,
}

/// Immutable view handed to readers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub channels: Arc<BTreeMap<String, ConnectionStatus>>,
    pub ever_connected: bool,
}

impl HealthSnapshot {
    pub fn get(&self, channel: &str) -> Option<&ConnectionStatus> {
        self.channels.get(channel)
    }
}

#[derive(Debug, Default)]
pub struct ConnectionHealthRegistry {
    snapshot: HealthSnapshot,
}

impl ConnectionHealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status now. Returns true if anything changed.
    pub fn report(&mut self, channel: &str, state: LinkState, message: Option<String>) -> bool {
        self.report_at(channel, state, message, Utc::now().timestamp_millis())
    }

    pub fn report_at(
        &mut self,
        channel: &str,
        state: LinkState,
        message: Option<String>,
        now_ms: i64,
    ) -> bool {
        let unchanged = self
            .snapshot
            .channels
            .get(channel)
            .map(|current| current.state == state && current.message == message)
            .unwrap_or(false);
        if unchanged {
            return false;
        }

        let mut channels = (*self.snapshot.channels).clone();
        channels.insert(
            channel.to_string(),
            ConnectionStatus {
                state,
                message,
                changed_at_ms: now_ms,
            },
        );
        self.snapshot.channels = Arc::new(channels);
        if state == LinkState::Connected {
            self.snapshot.ever_connected = true;
        }
        true
    }

    /// Get the current snapshot
    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot.clone()
    }

    pub fn ever_connected(&self) -> bool {
        self.snapshot.ever_connected
    }
}
