//! Run context - start time and global deadline

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Process-wide timing for one run
///
/// Constructed once at process entry and passed to the suite driver.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Wall-clock start, for reports
    pub started_at: DateTime<Utc>,
    started: Instant,
    deadline: Instant,
}

impl RunContext {
    /// Start the clock with `budget` of wall time available
    pub fn new(budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            started_at: Utc::now(),
            started,
            deadline: started + budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_has_time_left() {
        let ctx = RunContext::new(Duration::from_secs(60));
        assert!(!ctx.deadline_exceeded());
        assert!(ctx.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn test_zero_budget_is_exceeded_immediately() {
        let ctx = RunContext::new(Duration::ZERO);
        assert!(ctx.deadline_exceeded());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
