//! Inference tally: decision label frequencies.

use serde::{Deserialize, Serialize};

use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceCount {
    pub decision: String,
    pub count: u64,
}

impl Session {
    pub(crate) fn record_inference(&mut self, decision: &str) {
        self.total_inferences += 1;
        *self
            .inference_counts
            .entry(decision.to_string())
            .or_insert(0) += 1;
    }

    /// Most frequent decisions, count descending, ties by label.
    pub fn top_inferences(&self, limit: usize) -> Vec<InferenceCount> {
        let mut counts: Vec<InferenceCount> = self
            .inference_counts
            .iter()
            .map(|(decision, count)| InferenceCount {
                decision: decision.clone(),
                count: *count,
            })
            .collect();
        counts.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.decision.cmp(&b.decision))
        });
        counts.truncate(limit);
        counts
    }
}
