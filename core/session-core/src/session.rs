//! The session record: root aggregate for one monitoring period.
//!
//! Field names serialize in camelCase so archived payloads keep the shape
//! dashboard consumers already read.

use cognitivesense_daemon_protocol::SystemState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ulid::Ulid;

use crate::connection::{DisconnectEvent, ReconnectEvent};
use crate::error::{Result, SessionError};
use crate::intervals::{StateDurations, StateInterval};
use crate::pause::PauseInterval;
use crate::ring::MetricRing;

/// Starting bounds; the first sample tightens both.
pub const MIN_CONFIDENCE_SENTINEL: f64 = 100.0;
pub const MAX_CONFIDENCE_SENTINEL: f64 = 0.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub is_active: bool,

    pub state_history: Vec<StateInterval>,
    pub current_state: SystemState,
    pub current_state_start_time: i64,
    #[serde(flatten)]
    pub durations: StateDurations,

    pub confidence_history: MetricRing,
    pub average_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,

    pub total_inferences: u64,
    pub inference_counts: HashMap<String, u64>,

    pub disconnect_events: Vec<DisconnectEvent>,
    pub reconnect_events: Vec<ReconnectEvent>,

    pub pause_periods: Vec<PauseInterval>,
    pub total_pause_time: i64,
}

impl Session {
    /// Fresh active session sitting in `offline` with that interval open.
    pub fn new(id: String, now: i64, confidence_capacity: usize) -> Self {
        Self {
            id,
            start_time: now,
            end_time: None,
            is_active: true,
            state_history: vec![StateInterval::open(SystemState::Offline, now)],
            current_state: SystemState::Offline,
            current_state_start_time: now,
            durations: StateDurations::default(),
            confidence_history: MetricRing::new(confidence_capacity),
            average_confidence: 0.0,
            min_confidence: MIN_CONFIDENCE_SENTINEL,
            max_confidence: MAX_CONFIDENCE_SENTINEL,
            total_inferences: 0,
            inference_counts: HashMap::new(),
            disconnect_events: Vec::new(),
            reconnect_events: Vec::new(),
            pause_periods: Vec::new(),
            total_pause_time: 0,
        }
    }

    /// Settles time, closes the open state and pause intervals and marks the
    /// session ended at `now`.
    pub(crate) fn finalize(&mut self, now: i64) {
        if !self.is_active {
            return;
        }
        self.settle(now);
        self.close_open_interval(now);
        self.close_open_pause(now);
        self.end_time = Some(now);
        self.is_active = false;
    }

    pub fn duration_ms(&self, now: i64) -> i64 {
        self.end_time.unwrap_or(now) - self.start_time
    }

    /// Encodes the session as an archive payload.
    pub fn to_archive_payload(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|source| SessionError::Payload {
            context: format!("encoding session {}", self.id),
            source,
        })
    }

    /// Decodes an archive payload written by [`Session::to_archive_payload`].
    pub fn from_archive_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|source| SessionError::Payload {
            context: "decoding archived session".to_string(),
            source,
        })
    }
}

/// Time-sortable id with a random tail, unique across rapid restarts.
pub fn generate_session_id() -> String {
    format!("session_{}", Ulid::new().to_string().to_lowercase())
}
