//! Retry pacing shared by config fetches and the long-poll loop.

use std::time::Duration;

/// Computes the delay before the next attempt after a failure.
pub trait SchedulePolicy: Send {
    /// Records a failure and returns how long to wait before retrying.
    fn fail(&mut self) -> Duration;

    /// Records a success; the next failure starts from the lower bound again.
    fn success(&mut self);
}

/// Exponential backoff: lower bound on the first failure, doubling on each
/// consecutive failure, capped at the upper bound.
#[derive(Debug, Clone)]
pub struct ExponentialSchedulePolicy {
    lower_bound: Duration,
    upper_bound: Duration,
    last_delay: Duration,
}

impl ExponentialSchedulePolicy {
    pub fn new(
        lower_bound: Duration,
        upper_bound: Duration,
    ) -> Self {
        Self {
            lower_bound,
            upper_bound: upper_bound.max(lower_bound),
            last_delay: Duration::ZERO,
        }
    }

    /// Delay handed out by the most recent `fail()`, zero after a success.
    pub fn last_delay(&self) -> Duration {
        self.last_delay
    }
}

impl SchedulePolicy for ExponentialSchedulePolicy {
    fn fail(&mut self) -> Duration {
        let delay = if self.last_delay.is_zero() {
            self.lower_bound
        } else {
            self.last_delay.saturating_mul(2).min(self.upper_bound)
        };

        self.last_delay = delay;
        delay
    }

    fn success(&mut self) {
        self.last_delay = Duration::ZERO;
    }
}
