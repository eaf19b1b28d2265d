//! Session lifecycle controller.
//!
//! Owns the single active-session slot and the bounded archive. Every
//! mutation goes through [`SessionTracker::mutate`], which copies the session
//! on write when a reader still holds the previous snapshot. Readers always
//! see either the full effect of a handler or none of it.

use std::collections::VecDeque;
use std::sync::Arc;

use cognitivesense_daemon_protocol::SystemState;
use tracing::debug;

use crate::clock::Clock;
use crate::intervals::StatePercentages;
use crate::session::{generate_session_id, Session};

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;
pub const DEFAULT_CONFIDENCE_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub history_capacity: usize,
    pub confidence_capacity: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            confidence_capacity: DEFAULT_CONFIDENCE_CAPACITY,
        }
    }
}

/// Result of [`SessionTracker::start_session`].
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub session: Arc<Session>,
    /// The previously active session, finalized and archived on the way.
    pub archived: Option<Arc<Session>>,
}

pub struct SessionTracker {
    clock: Arc<dyn Clock>,
    settings: TrackerSettings,
    current: Option<Arc<Session>>,
    /// Newest first.
    history: VecDeque<Arc<Session>>,
}

impl SessionTracker {
    pub fn new(clock: Arc<dyn Clock>, settings: TrackerSettings) -> Self {
        Self {
            clock,
            settings,
            current: None,
            history: VecDeque::new(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn settings(&self) -> TrackerSettings {
        self.settings
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn start_session(&mut self) -> StartOutcome {
        let now = self.now_ms();
        self.start_session_at(now)
    }

    pub(crate) fn start_session_at(&mut self, now: i64) -> StartOutcome {
        let archived = self.end_session_at(now);
        let session = Arc::new(Session::new(
            generate_session_id(),
            now,
            self.settings.confidence_capacity,
        ));
        debug!(session_id = %session.id, started_at = now, "Session started");
        self.current = Some(Arc::clone(&session));
        StartOutcome { session, archived }
    }

    /// Finalizes and archives the active session, returning the archived
    /// snapshot. `None` when nothing was active.
    pub fn end_session(&mut self) -> Option<Arc<Session>> {
        let now = self.now_ms();
        self.end_session_at(now)
    }

    pub(crate) fn end_session_at(&mut self, now: i64) -> Option<Arc<Session>> {
        let mut session = self.current.take()?;
        Arc::make_mut(&mut session).finalize(now);
        debug!(
            session_id = %session.id,
            duration_ms = session.duration_ms(now),
            "Session ended"
        );
        self.archive(Arc::clone(&session));
        Some(session)
    }

    /// Discards the active session without archiving it and starts over.
    pub fn reset_session(&mut self) -> Arc<Session> {
        let now = self.now_ms();
        self.reset_session_at(now)
    }

    pub(crate) fn reset_session_at(&mut self, now: i64) -> Arc<Session> {
        if let Some(discarded) = self.current.take() {
            debug!(session_id = %discarded.id, "Session discarded by reset");
        }
        self.start_session_at(now).session
    }

    /// Ends and replaces the active session once it has run for `max_ms`.
    /// Returns the archived session when the timeout fired.
    pub fn expire_if_older_than(&mut self, max_ms: i64) -> Option<Arc<Session>> {
        let now = self.now_ms();
        let expired = self
            .current
            .as_ref()
            .is_some_and(|session| session.duration_ms(now) >= max_ms);
        if !expired {
            return None;
        }
        let outcome = self.start_session_at(now);
        debug!(
            new_session_id = %outcome.session.id,
            max_ms,
            "Session auto-reset after timeout"
        );
        outcome.archived
    }

    fn archive(&mut self, session: Arc<Session>) {
        self.history.push_front(session);
        let capacity = self.settings.history_capacity.max(1);
        while self.history.len() > capacity {
            if let Some(evicted) = self.history.pop_back() {
                debug!(session_id = %evicted.id, "Archived session evicted");
            }
        }
    }

    /// Seeds the archive, newest first. Entries beyond capacity are dropped.
    pub fn restore_history(&mut self, sessions: Vec<Session>) {
        let capacity = self.settings.history_capacity.max(1);
        self.history = sessions.into_iter().take(capacity).map(Arc::new).collect();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event handlers (no-ops without an active session)
    // ─────────────────────────────────────────────────────────────────────

    fn mutate<F>(&mut self, apply: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        match self.current.as_mut() {
            Some(session) => {
                apply(Arc::make_mut(session));
                true
            }
            None => false,
        }
    }

    pub fn update_system_state(&mut self, state: SystemState) -> bool {
        let now = self.now_ms();
        self.update_system_state_at(state, now)
    }

    pub(crate) fn update_system_state_at(&mut self, state: SystemState, now: i64) -> bool {
        self.mutate(|session| session.transition_to(state, now))
    }

    pub fn record_confidence(&mut self, value: f64) -> bool {
        let now = self.now_ms();
        self.record_confidence_at(value, now)
    }

    pub(crate) fn record_confidence_at(&mut self, value: f64, now: i64) -> bool {
        self.mutate(|session| session.record_confidence(value, now))
    }

    pub fn record_inference(&mut self, decision: &str) -> bool {
        self.mutate(|session| session.record_inference(decision))
    }

    pub fn record_disconnect(&mut self) -> bool {
        let now = self.now_ms();
        self.record_disconnect_at(now)
    }

    pub(crate) fn record_disconnect_at(&mut self, now: i64) -> bool {
        self.mutate(|session| session.record_disconnect(now))
    }

    pub fn record_reconnect(&mut self) -> bool {
        let now = self.now_ms();
        self.record_reconnect_at(now)
    }

    pub(crate) fn record_reconnect_at(&mut self, now: i64) -> bool {
        self.mutate(|session| session.record_reconnect(now))
    }

    pub fn record_pause_start(&mut self) -> bool {
        let now = self.now_ms();
        self.record_pause_start_at(now)
    }

    pub(crate) fn record_pause_start_at(&mut self, now: i64) -> bool {
        self.mutate(|session| session.record_pause_start(now))
    }

    /// True only when an open pause was closed.
    pub fn record_pause_end(&mut self) -> bool {
        let now = self.now_ms();
        self.record_pause_end_at(now)
    }

    pub(crate) fn record_pause_end_at(&mut self, now: i64) -> bool {
        let has_open_pause = self
            .current
            .as_ref()
            .is_some_and(|session| session.is_paused());
        has_open_pause && self.mutate(|session| {
            session.record_pause_end(now);
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.clone()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn history(&self) -> Vec<Arc<Session>> {
        self.history.iter().cloned().collect()
    }

    pub fn find_archived(&self, session_id: &str) -> Option<Arc<Session>> {
        self.history
            .iter()
            .find(|session| session.id == session_id)
            .cloned()
    }

    pub fn session_duration(&self) -> i64 {
        let now = self.now_ms();
        self.current
            .as_ref()
            .map_or(0, |session| session.duration_ms(now))
    }

    pub fn state_percentages(&self) -> StatePercentages {
        let now = self.now_ms();
        self.current
            .as_ref()
            .map_or(StatePercentages::OFFLINE_DEFAULT, |session| {
                session.state_percentages(now)
            })
    }

    pub fn longest_stress_interval(&self) -> i64 {
        let now = self.now_ms();
        self.current
            .as_ref()
            .map_or(0, |session| session.longest_stress_interval(now))
    }
}
