//! Connection event log: disconnects paired with the reconnect that ends them.

use serde::{Deserialize, Serialize};

use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectEvent {
    pub timestamp: i64,
    /// Outage length, filled in by the reconnect that resolves it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectEvent {
    pub timestamp: i64,
}

impl Session {
    pub(crate) fn record_disconnect(&mut self, now: i64) {
        self.disconnect_events.push(DisconnectEvent {
            timestamp: now,
            duration: None,
        });
    }

    /// Only the most recent disconnect is ever resolved. Earlier unresolved
    /// disconnects (back-to-back drops) keep no duration.
    pub(crate) fn record_reconnect(&mut self, now: i64) {
        self.reconnect_events.push(ReconnectEvent { timestamp: now });
        if let Some(last) = self.disconnect_events.last_mut() {
            if last.duration.is_none() {
                last.duration = Some(now - last.timestamp);
            }
        }
    }

    /// Sum of resolved outage durations.
    pub fn total_outage_ms(&self) -> i64 {
        self.disconnect_events
            .iter()
            .filter_map(|event| event.duration)
            .sum()
    }
}
