//! Confidence statistics over a capacity-bounded history.

use crate::ring::MetricSample;
use crate::session::Session;

impl Session {
    /// Values are taken as given; out-of-range input is not an error.
    ///
    /// Min and max cover every sample ever seen, while the average covers the
    /// retained window only.
    pub(crate) fn record_confidence(&mut self, value: f64, now: i64) {
        self.confidence_history.push(MetricSample {
            timestamp: now,
            value,
        });
        self.min_confidence = self.min_confidence.min(value);
        self.max_confidence = self.max_confidence.max(value);
        self.average_confidence = self.confidence_history.mean().unwrap_or(0.0);
    }

    pub fn has_confidence_samples(&self) -> bool {
        !self.confidence_history.is_empty()
    }
}
