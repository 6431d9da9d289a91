use serde::{Deserialize, Serialize};

/// How useful a firehose-style pass was.
///
/// Drivers can use the ratio to decide whether a narrower server-side
/// pre-filter would be cheaper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// Observations that changed or confirmed something we track
    pub useful: u64,
    /// Observations about messages we do not care about
    pub waste: u64,
}

impl SyncMetrics {
    pub fn record_useful(&mut self) {
        self.useful += 1;
    }

    pub fn record_waste(&mut self) {
        self.waste += 1;
    }

    pub fn total(&self) -> u64 {
        self.useful + self.waste
    }

    /// Fraction of observations that were waste, 0.0 for an empty pass
    pub fn waste_ratio(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.waste as f64 / self.total() as f64
        }
    }
}
