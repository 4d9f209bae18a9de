use std::time::Duration;

/// Running average of successful run durations, in whole seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingEstimator {
    total_secs: u64,
    samples: u64,
}

impl TimingEstimator {
    pub fn record(&mut self, duration: Duration) {
        self.total_secs = self.total_secs.saturating_add(duration.as_secs());
        self.samples += 1;
    }

    /// Mean of the recorded samples rounded up, or `None` before the first one.
    pub fn estimate(&self) -> Option<Duration> {
        if self.samples == 0 {
            return None;
        }
        Some(Duration::from_secs(self.total_secs.div_ceil(self.samples)))
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}
