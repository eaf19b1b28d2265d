//! State interval tracking: time-in-state accounting for a session.
//!
//! Exactly one interval is open while a session is active. A transition
//! settles the elapsed time of the current state into its counter before the
//! open interval is closed and the next one opened, so no time is attributed
//! to the wrong state.

use cognitivesense_daemon_protocol::SystemState;
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// One contiguous period spent in a single state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateInterval {
    pub state: SystemState,
    pub start_time: i64,
    pub end_time: Option<i64>,
    /// Authoritative only once closed.
    pub duration: i64,
}

impl StateInterval {
    pub(crate) fn open(state: SystemState, now: i64) -> Self {
        Self {
            state,
            start_time: now,
            end_time: None,
            duration: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Stored duration when closed, elapsed time so far when open.
    pub fn duration_at(&self, now: i64) -> i64 {
        match self.end_time {
            Some(_) => self.duration,
            None => now - self.start_time,
        }
    }

    pub(crate) fn close(&mut self, now: i64) {
        if self.end_time.is_none() {
            self.end_time = Some(now);
            self.duration = now - self.start_time;
        }
    }
}

/// Cumulative milliseconds per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDurations {
    #[serde(rename = "timeInNormal")]
    pub normal: i64,
    #[serde(rename = "timeInAlert")]
    pub alert: i64,
    #[serde(rename = "timeInCritical")]
    pub critical: i64,
    #[serde(rename = "timeInOffline")]
    pub offline: i64,
}

impl StateDurations {
    pub fn get(&self, state: SystemState) -> i64 {
        match state {
            SystemState::Normal => self.normal,
            SystemState::Alert => self.alert,
            SystemState::Critical => self.critical,
            SystemState::Offline => self.offline,
        }
    }

    fn get_mut(&mut self, state: SystemState) -> &mut i64 {
        match state {
            SystemState::Normal => &mut self.normal,
            SystemState::Alert => &mut self.alert,
            SystemState::Critical => &mut self.critical,
            SystemState::Offline => &mut self.offline,
        }
    }

    pub(crate) fn add(&mut self, state: SystemState, elapsed: i64) {
        *self.get_mut(state) += elapsed;
    }

    pub fn total(&self) -> i64 {
        self.normal + self.alert + self.critical + self.offline
    }

    pub fn stress(&self) -> i64 {
        self.alert + self.critical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatePercentages {
    pub normal: f64,
    pub alert: f64,
    pub critical: f64,
    pub offline: f64,
}

impl StatePercentages {
    /// Reported when no time has elapsed yet.
    pub const OFFLINE_DEFAULT: StatePercentages = StatePercentages {
        normal: 0.0,
        alert: 0.0,
        critical: 0.0,
        offline: 100.0,
    };

    pub fn from_durations(durations: &StateDurations) -> Self {
        let total = durations.total();
        if total <= 0 {
            return Self::OFFLINE_DEFAULT;
        }
        let pct = |value: i64| value as f64 / total as f64 * 100.0;
        Self {
            normal: pct(durations.normal),
            alert: pct(durations.alert),
            critical: pct(durations.critical),
            offline: pct(durations.offline),
        }
    }

    pub fn get(&self, state: SystemState) -> f64 {
        match state {
            SystemState::Normal => self.normal,
            SystemState::Alert => self.alert,
            SystemState::Critical => self.critical,
            SystemState::Offline => self.offline,
        }
    }
}

impl Session {
    /// Folds time spent in the current state into its counter.
    pub(crate) fn settle(&mut self, now: i64) {
        let elapsed = now - self.current_state_start_time;
        self.durations.add(self.current_state, elapsed);
        self.current_state_start_time = now;
    }

    /// Counters as they would read after settling at `now`, without touching
    /// the session.
    pub fn settled_durations(&self, now: i64) -> StateDurations {
        let mut durations = self.durations;
        if self.is_active {
            durations.add(self.current_state, now - self.current_state_start_time);
        }
        durations
    }

    pub(crate) fn close_open_interval(&mut self, now: i64) {
        if let Some(last) = self.state_history.last_mut() {
            last.close(now);
        }
    }

    /// Records a transition. Repeating the current state still closes and
    /// reopens the interval.
    pub(crate) fn transition_to(&mut self, state: SystemState, now: i64) {
        self.settle(now);
        self.close_open_interval(now);
        self.state_history.push(StateInterval::open(state, now));
        self.current_state = state;
        self.current_state_start_time = now;
    }

    pub fn open_interval(&self) -> Option<&StateInterval> {
        self.state_history.iter().find(|interval| interval.is_open())
    }

    pub fn state_percentages(&self, now: i64) -> StatePercentages {
        StatePercentages::from_durations(&self.settled_durations(now))
    }

    pub fn stress_intervals(&self) -> impl Iterator<Item = &StateInterval> {
        self.state_history
            .iter()
            .filter(|interval| interval.state.is_stress())
    }

    /// Longest alert/critical interval, counting an open one up to `now`.
    pub fn longest_stress_interval(&self, now: i64) -> i64 {
        self.stress_intervals()
            .map(|interval| interval.duration_at(now))
            .max()
            .unwrap_or(0)
    }
}
