//! Session report: the figures an export needs, derived from one snapshot.

use chrono::{TimeZone, Utc};
use cognitivesense_daemon_protocol::SystemState;
use serde::{Deserialize, Serialize};

use crate::inference::InferenceCount;
use crate::intervals::{StateDurations, StatePercentages};
use crate::session::Session;

pub const TOP_INFERENCE_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceSummary {
    pub average: f64,
    /// Zero when no samples were recorded.
    pub min: f64,
    pub max: f64,
    pub data_points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub is_active: bool,
    pub duration_ms: i64,
    pub durations: StateDurations,
    pub percentages: StatePercentages,
    pub stress_time_ms: i64,
    pub stress_percentage: f64,
    pub longest_stress_ms: i64,
    pub stress_interval_count: usize,
    pub confidence: ConfidenceSummary,
    pub total_inferences: u64,
    pub top_inferences: Vec<InferenceCount>,
    pub disconnect_count: usize,
    pub reconnect_count: usize,
    pub total_outage_ms: i64,
    pub total_pause_ms: i64,
    pub summary: String,
}

impl SessionReport {
    pub fn from_session(session: &Session, now: i64) -> Self {
        let durations = session.settled_durations(now);
        let total = durations.total();
        let stress_time_ms = durations.stress();
        let stress_percentage = if total > 0 {
            stress_time_ms as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let confidence = if session.has_confidence_samples() {
            ConfidenceSummary {
                average: session.average_confidence,
                min: session.min_confidence,
                max: session.max_confidence,
                data_points: session.confidence_history.len(),
            }
        } else {
            ConfidenceSummary {
                average: 0.0,
                min: 0.0,
                max: 0.0,
                data_points: 0,
            }
        };

        let mut report = Self {
            session_id: session.id.clone(),
            started_at: session.start_time,
            ended_at: session.end_time,
            is_active: session.is_active,
            duration_ms: session.duration_ms(now),
            durations,
            percentages: StatePercentages::from_durations(&durations),
            stress_time_ms,
            stress_percentage,
            longest_stress_ms: session.longest_stress_interval(now),
            stress_interval_count: session.stress_intervals().count(),
            confidence,
            total_inferences: session.total_inferences,
            top_inferences: session.top_inferences(TOP_INFERENCE_LIMIT),
            disconnect_count: session.disconnect_events.len(),
            reconnect_count: session.reconnect_events.len(),
            total_outage_ms: session.total_outage_ms(),
            total_pause_ms: session.total_pause_time,
            summary: String::new(),
        };
        report.summary = report.build_summary(total);
        report
    }

    fn build_summary(&self, total_ms: i64) -> String {
        let stress = self.stress_percentage;
        let average = self.confidence.average;
        let mut summary = format!("This session lasted {}. ", format_duration_ms(total_ms));

        if stress < 10.0 {
            summary.push_str(&format!(
                "The system maintained excellent stability with only {:.1}% time in elevated states. ",
                stress
            ));
        } else if stress < 30.0 {
            summary.push_str(&format!(
                "The system showed moderate stress levels ({:.1}% in alert/critical states). ",
                stress
            ));
        } else {
            summary.push_str(&format!(
                "Significant stress was detected with {:.1}% of the session in alert or critical states. ",
                stress
            ));
        }

        if average >= 80.0 {
            summary.push_str(&format!(
                "Average confidence of {:.1}% indicates high system reliability. ",
                average
            ));
        } else if average >= 60.0 {
            summary.push_str(&format!(
                "Average confidence of {:.1}% suggests room for optimization. ",
                average
            ));
        } else {
            summary.push_str(&format!(
                "Low average confidence of {:.1}% requires attention. ",
                average
            ));
        }

        if self.total_inferences > 0 {
            summary.push_str(&format!(
                "{} inferences were processed during this session. ",
                self.total_inferences
            ));
        }
        if self.disconnect_count > 0 {
            summary.push_str(&format!(
                "Connection instability was noted with {} disconnect event(s). ",
                self.disconnect_count
            ));
        }

        summary.trim_end().to_string()
    }

    /// Plain-text rendering for terminals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Session Report: {}\n", self.session_id));
        out.push_str(&format!("  Started:    {}\n", format_timestamp(self.started_at)));
        match self.ended_at {
            Some(ended_at) => {
                out.push_str(&format!("  Ended:      {}\n", format_timestamp(ended_at)))
            }
            None => out.push_str("  Ended:      (active)\n"),
        }
        out.push_str(&format!(
            "  Duration:   {}\n\n",
            format_duration_ms(self.duration_ms)
        ));

        out.push_str("State Breakdown\n");
        for state in SystemState::ALL {
            out.push_str(&format!(
                "  {:<9} {:>6.1}%  {}\n",
                state.as_str(),
                self.percentages.get(state),
                format_duration_ms(self.durations.get(state))
            ));
        }
        out.push_str(&format!(
            "  Stress time {} ({:.1}%), longest interval {}, {} stress interval(s)\n\n",
            format_duration_ms(self.stress_time_ms),
            self.stress_percentage,
            format_duration_ms(self.longest_stress_ms),
            self.stress_interval_count
        ));

        out.push_str("Confidence\n");
        out.push_str(&format!(
            "  avg {:.1}%  min {:.1}%  max {:.1}%  ({} data points)\n\n",
            self.confidence.average,
            self.confidence.min,
            self.confidence.max,
            self.confidence.data_points
        ));

        out.push_str(&format!("Inferences ({} total)\n", self.total_inferences));
        for entry in &self.top_inferences {
            out.push_str(&format!("  {:<20} {}\n", entry.decision, entry.count));
        }
        out.push('\n');

        out.push_str("Connection\n");
        out.push_str(&format!(
            "  {} disconnect(s), {} reconnect(s), {} offline\n",
            self.disconnect_count,
            self.reconnect_count,
            format_duration_ms(self.total_outage_ms)
        ));
        out.push_str(&format!(
            "  Paused for {}\n\n",
            format_duration_ms(self.total_pause_ms)
        ));

        out.push_str("Summary\n  ");
        out.push_str(&self.summary);
        out.push('\n');
        out
    }
}

/// "1 hour 2 minutes 5 seconds"; zero units are omitted.
pub fn format_duration_ms(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1_000;
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let parts: Vec<String> = [(hours, "hour"), (minutes, "minute"), (seconds, "second")]
        .into_iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| {
            if value == 1 {
                format!("{} {}", value, unit)
            } else {
                format!("{} {}s", value, unit)
            }
        })
        .collect();

    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(" ")
    }
}

fn format_timestamp(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ms.to_string(),
    }
}
