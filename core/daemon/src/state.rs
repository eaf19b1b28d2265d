//! In-memory state managed by the daemon.
//!
//! One [`EventRouter`] sits behind a single mutex, so handlers run one at a
//! time in arrival order. Archived sessions are written through to SQLite
//! while the lock is held.

use cognitivesense_daemon_protocol::EventEnvelope;
use serde::Serialize;
use session_core::{
    Clock, EventRouter, LiveMetrics, SenseConfig, Session, SessionReport, SessionTracker,
    StatePercentages,
};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::db::Db;

/// Current session plus the derived queries computed at the same instant.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub active: bool,
    pub session: Option<Session>,
    pub duration_ms: i64,
    pub percentages: StatePercentages,
    pub longest_stress_ms: i64,
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub active_session_id: Option<String>,
    pub archived_sessions: usize,
    /// Rows in the SQLite archive; `None` if the count failed.
    pub persisted_sessions: Option<usize>,
    pub auto_reset_ms: Option<i64>,
}

pub struct SharedState {
    db: Db,
    config: SenseConfig,
    router: Mutex<EventRouter>,
}

impl SharedState {
    pub fn new(db: Db, config: SenseConfig, clock: Arc<dyn Clock>) -> Self {
        let mut tracker = SessionTracker::new(clock, config.tracker_settings());
        match db.load_archived_sessions(config.session.history_capacity) {
            Ok(sessions) => {
                tracing::info!(archived = sessions.len(), "Restored session archive");
                tracker.restore_history(sessions);
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to restore session archive");
            }
        }

        let mut router = EventRouter::new(
            tracker,
            LiveMetrics::new(config.metrics.live_capacity),
            config.router_settings(),
        );
        if config.session.auto_start {
            let outcome = router.start_session();
            tracing::info!(session_id = %outcome.session.id, "Session auto-started");
        }

        Self {
            db,
            config,
            router: Mutex::new(router),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, EventRouter>, String> {
        self.router
            .lock()
            .map_err(|_| "Daemon state lock poisoned".to_string())
    }

    fn persist(&self, session: &Session) {
        match self
            .db
            .archive_session(session, self.config.session.history_capacity)
        {
            Ok(pruned) => tracing::debug!(
                session_id = %session.id,
                pruned,
                "Archived session persisted"
            ),
            Err(err) => tracing::warn!(
                session_id = %session.id,
                error = %err,
                "Failed to persist archived session"
            ),
        }
    }

    pub fn apply_event(&self, event: &EventEnvelope) -> Result<bool, String> {
        let mut router = self.lock()?;
        Ok(router.route(event))
    }

    pub fn start_session(&self) -> Result<Session, String> {
        let mut router = self.lock()?;
        let outcome = router.start_session();
        if let Some(archived) = outcome.archived.as_deref() {
            self.persist(archived);
        }
        tracing::info!(session_id = %outcome.session.id, "Session started");
        Ok(outcome.session.as_ref().clone())
    }

    pub fn end_session(&self) -> Result<Option<Session>, String> {
        let mut router = self.lock()?;
        let archived = router.end_session();
        if let Some(session) = archived.as_deref() {
            self.persist(session);
            tracing::info!(session_id = %session.id, "Session ended");
        }
        Ok(archived.map(|session| session.as_ref().clone()))
    }

    pub fn reset_session(&self) -> Result<Session, String> {
        let mut router = self.lock()?;
        let session = router.reset_session();
        tracing::info!(session_id = %session.id, "Session reset");
        Ok(session.as_ref().clone())
    }

    /// Periodic housekeeping. Returns the id of an expired session, if any.
    pub fn tick(&self) -> Result<Option<String>, String> {
        let Some(max_ms) = self.config.auto_reset_ms() else {
            return Ok(None);
        };
        let mut router = self.lock()?;
        let expired = router.expire_if_older_than(max_ms);
        if let Some(session) = expired.as_deref() {
            self.persist(session);
            tracing::info!(session_id = %session.id, max_ms, "Session auto-reset");
        }
        Ok(expired.map(|session| session.id.clone()))
    }

    pub fn session_snapshot(&self) -> Result<SessionSnapshot, String> {
        let router = self.lock()?;
        let tracker = router.tracker();
        let now = tracker.now_ms();
        let snapshot = match tracker.current() {
            Some(session) => SessionSnapshot {
                active: true,
                duration_ms: session.duration_ms(now),
                percentages: session.state_percentages(now),
                longest_stress_ms: session.longest_stress_interval(now),
                paused: session.is_paused(),
                session: Some(session.as_ref().clone()),
            },
            None => SessionSnapshot {
                active: false,
                session: None,
                duration_ms: 0,
                percentages: StatePercentages::OFFLINE_DEFAULT,
                longest_stress_ms: 0,
                paused: false,
            },
        };
        Ok(snapshot)
    }

    pub fn history(&self, limit: Option<usize>) -> Result<Vec<Session>, String> {
        let router = self.lock()?;
        let history = router.tracker().history();
        let limit = limit.unwrap_or(history.len());
        Ok(history
            .iter()
            .take(limit)
            .map(|session| session.as_ref().clone())
            .collect())
    }

    pub fn live_metrics(&self) -> Result<LiveMetrics, String> {
        let router = self.lock()?;
        Ok(router.live().clone())
    }

    /// Report for the active session, or for an archived one by id.
    pub fn report(&self, session_id: Option<&str>) -> Result<Option<SessionReport>, String> {
        let router = self.lock()?;
        let tracker = router.tracker();
        let now = tracker.now_ms();
        let session = match session_id {
            Some(id) => tracker
                .current()
                .filter(|session| session.id == id)
                .or_else(|| tracker.find_archived(id)),
            None => tracker.current(),
        };
        Ok(session.map(|session| SessionReport::from_session(&session, now)))
    }

    pub fn health_snapshot(&self) -> Result<HealthSnapshot, String> {
        let router = self.lock()?;
        let tracker = router.tracker();
        Ok(HealthSnapshot {
            active_session_id: tracker.current().map(|session| session.id.clone()),
            archived_sessions: tracker.history().len(),
            persisted_sessions: self.db.archived_count().ok(),
            auto_reset_ms: self.config.auto_reset_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cognitivesense_daemon_protocol::{EventType, SystemState};
    use session_core::ManualClock;

    fn state_with(config: SenseConfig, dir: &std::path::Path) -> (SharedState, ManualClock) {
        let clock = ManualClock::new(1_000);
        let db = Db::new(dir.join("state.db")).expect("db");
        (SharedState::new(db, config, Arc::new(clock.clone())), clock)
    }

    fn state_event(state: SystemState) -> EventEnvelope {
        let mut event = EventEnvelope::new("evt-state", EventType::StateChange);
        event.state = Some(state);
        event
    }

    #[test]
    fn auto_start_opens_session() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let (state, _clock) = state_with(SenseConfig::default(), temp_dir.path());
        let snapshot = state.session_snapshot().expect("snapshot");
        assert!(snapshot.active);
        assert_eq!(snapshot.percentages, StatePercentages::OFFLINE_DEFAULT);
    }

    #[test]
    fn auto_start_can_be_disabled() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let mut config = SenseConfig::default();
        config.session.auto_start = false;
        let (state, _clock) = state_with(config, temp_dir.path());
        assert!(!state.session_snapshot().expect("snapshot").active);
        assert!(!state
            .apply_event(&state_event(SystemState::Normal))
            .expect("apply"));
    }

    #[test]
    fn ended_sessions_survive_restart() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let ended_id = {
            let (state, clock) = state_with(SenseConfig::default(), temp_dir.path());
            state
                .apply_event(&state_event(SystemState::Alert))
                .expect("apply");
            clock.advance(2_000);
            let ended = state.end_session().expect("end").expect("archived");
            assert_eq!(ended.durations.alert, 2_000);
            ended.id
        };

        let (restarted, _clock) = state_with(SenseConfig::default(), temp_dir.path());
        let history = restarted.history(None).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, ended_id);
        let report = restarted
            .report(Some(&ended_id))
            .expect("report")
            .expect("archived report");
        assert_eq!(report.longest_stress_ms, 2_000);
    }

    #[test]
    fn reset_does_not_archive() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let (state, _clock) = state_with(SenseConfig::default(), temp_dir.path());
        let before = state.session_snapshot().expect("snapshot");
        let fresh = state.reset_session().expect("reset");
        assert_ne!(before.session.map(|s| s.id), Some(fresh.id));
        assert!(state.history(None).expect("history").is_empty());
    }

    #[test]
    fn tick_expires_old_sessions() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let mut config = SenseConfig::default();
        config.session.auto_reset_hours = 1;
        let (state, clock) = state_with(config, temp_dir.path());

        clock.advance(59 * 60 * 1_000);
        assert_eq!(state.tick().expect("tick"), None);
        clock.advance(60 * 1_000);
        let expired = state.tick().expect("tick").expect("expired");

        let history = state.history(None).expect("history");
        assert_eq!(history[0].id, expired);
        let current = state.session_snapshot().expect("snapshot");
        assert!(current.active);
        assert_ne!(current.session.map(|s| s.id), Some(expired));
    }

    #[test]
    fn history_limit_is_applied() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let (state, clock) = state_with(SenseConfig::default(), temp_dir.path());
        for _ in 0..3 {
            clock.advance(10);
            state.start_session().expect("start");
        }
        assert_eq!(state.history(None).expect("history").len(), 3);
        assert_eq!(state.history(Some(2)).expect("history").len(), 2);
    }
}
