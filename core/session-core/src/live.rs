//! Ephemeral dashboard metrics. Never archived, lost on restart.

use cognitivesense_daemon_protocol::{EngineState, SystemState};
use serde::Serialize;

use crate::ring::{MetricRing, MetricSample};

pub const DEFAULT_LIVE_CAPACITY: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestInference {
    pub decision: String,
    pub model: Option<String>,
    pub confidence: Option<f64>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveMetrics {
    pub connected: bool,
    pub engine_state: EngineState,
    pub system_state: SystemState,
    pub confidence: f64,
    pub confidence_history: MetricRing,
    pub activity_history: MetricRing,
    pub latest_inference: Option<LatestInference>,
    pub paused: bool,
}

impl LiveMetrics {
    pub fn new(capacity: usize) -> Self {
        Self {
            connected: false,
            engine_state: EngineState::Stopped,
            system_state: SystemState::Offline,
            confidence: 0.0,
            confidence_history: MetricRing::new(capacity),
            activity_history: MetricRing::new(capacity),
            latest_inference: None,
            paused: false,
        }
    }

    pub(crate) fn push_confidence(&mut self, value: f64, now: i64) {
        self.confidence = value;
        self.confidence_history.push(MetricSample {
            timestamp: now,
            value,
        });
    }

    pub(crate) fn push_activity(&mut self, value: f64, now: i64) {
        self.activity_history.push(MetricSample {
            timestamp: now,
            value,
        });
    }
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_LIVE_CAPACITY)
    }
}
