use std::time::Duration;

use parking_lot::Mutex;

/// Estimates how healthy the local node is and stretches probe timeouts accordingly.
pub trait Awareness: Send + Sync + 'static {
    /// Recommended timeout for a probe whose nominal timeout is `base`.
    fn scale_timeout(&self, base: Duration) -> Duration;

    /// Positive deltas report trouble (missed acks, refuting a suspicion about
    /// ourselves), negative deltas report successful probes.
    fn apply_delta(&self, delta: i32);

    fn health_score(&self) -> u32;
}

/// Lifeguard style local health multiplier: timeouts grow by one base unit per point
/// of score, capped at `max`.
pub struct LocalHealth {
    max: u32,
    score: Mutex<u32>,
}

impl LocalHealth {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            score: Mutex::new(0),
        }
    }
}

impl Default for LocalHealth {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Awareness for LocalHealth {
    fn scale_timeout(&self, base: Duration) -> Duration {
        base * (*self.score.lock() + 1)
    }

    fn apply_delta(&self, delta: i32) {
        let mut score = self.score.lock();
        let next = (*score as i64 + delta as i64).clamp(0, self.max as i64);
        if next as u32 != *score {
            tracing::debug!(from = *score, to = next, "local health changed");
        }
        *score = next as u32;
    }

    fn health_score(&self) -> u32 {
        *self.score.lock()
    }
}
