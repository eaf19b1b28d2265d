//! Event routing: the single delivery path from decoded events into the
//! tracker and the live dashboard metrics.
//!
//! The router reads the clock once per event. State changes are forwarded to
//! the tracker only when they differ from the last forwarded state; starting
//! or resetting a session re-arms that filter at `offline`.

use std::sync::Arc;

use cognitivesense_daemon_protocol::{EngineState, EventEnvelope, EventType, SystemState};
use tracing::{debug, info};

use crate::live::{LatestInference, LiveMetrics};
use crate::session::Session;
use crate::tracker::{SessionTracker, StartOutcome};

pub const DEFAULT_STRESS_THRESHOLD: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterSettings {
    pub auto_pause_on_stress: bool,
    /// Confidence strictly below this opens an automatic pause.
    pub stress_threshold: f64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            auto_pause_on_stress: false,
            stress_threshold: DEFAULT_STRESS_THRESHOLD,
        }
    }
}

pub struct EventRouter {
    tracker: SessionTracker,
    live: LiveMetrics,
    settings: RouterSettings,
    last_forwarded: SystemState,
    auto_paused: bool,
}

impl EventRouter {
    pub fn new(tracker: SessionTracker, live: LiveMetrics, settings: RouterSettings) -> Self {
        Self {
            tracker,
            live,
            settings,
            last_forwarded: SystemState::Offline,
            auto_paused: false,
        }
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn live(&self) -> &LiveMetrics {
        &self.live
    }

    pub fn start_session(&mut self) -> StartOutcome {
        let outcome = self.tracker.start_session();
        self.rearm();
        outcome
    }

    pub fn end_session(&mut self) -> Option<Arc<Session>> {
        let archived = self.tracker.end_session();
        self.live.paused = false;
        self.auto_paused = false;
        archived
    }

    pub fn reset_session(&mut self) -> Arc<Session> {
        let session = self.tracker.reset_session();
        self.rearm();
        session
    }

    /// See [`SessionTracker::expire_if_older_than`].
    pub fn expire_if_older_than(&mut self, max_ms: i64) -> Option<Arc<Session>> {
        let archived = self.tracker.expire_if_older_than(max_ms);
        if archived.is_some() {
            self.rearm();
        }
        archived
    }

    fn rearm(&mut self) {
        self.last_forwarded = SystemState::Offline;
        self.live.paused = false;
        self.auto_paused = false;
    }

    /// Applies one validated event. Returns whether the active session changed.
    pub fn route(&mut self, event: &EventEnvelope) -> bool {
        let now = self.tracker.now_ms();
        match event.event_type {
            EventType::StateChange => match event.state {
                Some(state) => self.apply_state(state, now),
                None => false,
            },
            EventType::Confidence => {
                let value = event.value.unwrap_or(0.0);
                self.live.push_confidence(value, now);
                let applied = self.tracker.record_confidence_at(value, now);
                if applied && self.settings.auto_pause_on_stress {
                    self.apply_auto_pause(value, now);
                }
                applied
            }
            EventType::Inference => {
                let Some(decision) = event.decision.as_deref() else {
                    return false;
                };
                self.live.latest_inference = Some(LatestInference {
                    decision: decision.to_string(),
                    model: event.model.clone(),
                    confidence: event.value,
                    timestamp: now,
                });
                self.tracker.record_inference(decision)
            }
            EventType::Activity => {
                self.live.push_activity(event.value.unwrap_or(1.0), now);
                false
            }
            EventType::Disconnect => {
                self.live.connected = false;
                let recorded = self.tracker.record_disconnect_at(now);
                self.live.engine_state = EngineState::Stopped;
                let forwarded = self.apply_state(SystemState::Offline, now);
                recorded || forwarded
            }
            EventType::Reconnect => {
                self.live.connected = true;
                self.tracker.record_reconnect_at(now)
            }
            EventType::PauseStart => {
                if self.live.paused {
                    debug!("Pause start ignored; already paused");
                    return false;
                }
                let applied = self.tracker.record_pause_start_at(now);
                self.live.paused = applied;
                applied
            }
            EventType::PauseEnd => {
                self.live.paused = false;
                self.auto_paused = false;
                self.tracker.record_pause_end_at(now)
            }
            EventType::EngineState => match event.engine_state {
                Some(engine_state) => {
                    self.live.engine_state = engine_state;
                    // A state carried alongside (backend frames) wins over
                    // the engine default.
                    let state = event.state.unwrap_or(match engine_state {
                        EngineState::Running => SystemState::Normal,
                        EngineState::Stopped => SystemState::Offline,
                    });
                    self.apply_state(state, now)
                }
                None => false,
            },
        }
    }

    fn apply_state(&mut self, state: SystemState, now: i64) -> bool {
        self.live.system_state = state;
        if state == self.last_forwarded {
            return false;
        }
        let applied = self.tracker.update_system_state_at(state, now);
        if applied {
            self.last_forwarded = state;
        }
        applied
    }

    /// Only pauses opened here are closed here; a manual pause stays open
    /// until resumed.
    fn apply_auto_pause(&mut self, value: f64, now: i64) {
        if value < self.settings.stress_threshold {
            if !self.live.paused && self.tracker.record_pause_start_at(now) {
                info!(
                    confidence = value,
                    threshold = self.settings.stress_threshold,
                    "Auto-pause on low confidence"
                );
                self.live.paused = true;
                self.auto_paused = true;
            }
        } else if self.auto_paused {
            self.tracker.record_pause_end_at(now);
            self.live.paused = false;
            self.auto_paused = false;
            info!(confidence = value, "Auto-pause released");
        }
    }
}
