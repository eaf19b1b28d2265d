//! Pause interval tracking, independent of state intervals.

use serde::{Deserialize, Serialize};

use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseInterval {
    pub start_time: i64,
    pub end_time: Option<i64>,
}

impl PauseInterval {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

impl Session {
    pub(crate) fn record_pause_start(&mut self, now: i64) {
        self.pause_periods.push(PauseInterval {
            start_time: now,
            end_time: None,
        });
    }

    /// Closes the first open pause; returns false when there is none.
    pub(crate) fn record_pause_end(&mut self, now: i64) -> bool {
        self.close_open_pause(now)
    }

    pub(crate) fn close_open_pause(&mut self, now: i64) -> bool {
        match self.pause_periods.iter_mut().find(|pause| pause.is_open()) {
            Some(pause) => {
                pause.end_time = Some(now);
                self.total_pause_time += now - pause.start_time;
                true
            }
            None => false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause_periods.iter().any(PauseInterval::is_open)
    }
}
