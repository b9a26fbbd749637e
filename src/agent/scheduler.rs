use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Fixed-rate trigger with jitter
///
/// Deadlines are anchored to the previous deadline, not to when a cycle
/// finished. Deadlines that pass while a cycle is still running are dropped.
pub struct PollingScheduler {
    base_interval: Duration,
    jitter_range: Duration,
    next_deadline: Instant,
}

impl PollingScheduler {
    /// Create a scheduler whose first trigger is immediate
    ///
    /// # Arguments
    /// * `interval_secs` - Base polling interval in seconds
    /// * `jitter_secs` - Maximum jitter added to each interval in seconds
    pub fn new(interval_secs: u64, jitter_secs: u64) -> Self {
        Self {
            base_interval: Duration::from_secs(interval_secs),
            jitter_range: Duration::from_secs(jitter_secs),
            next_deadline: Instant::now(),
        }
    }

    /// Wait for the next trigger
    pub async fn tick(&mut self) {
        sleep_until(self.next_deadline).await;
        self.advance(Instant::now());
    }

    /// Wall-clock time of the next trigger
    pub fn next_poll_time(&self) -> DateTime<Utc> {
        let remaining = self.next_deadline.saturating_duration_since(Instant::now());
        Utc::now()
            + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Move the deadline past `now`, counting skipped triggers
    fn advance(&mut self, now: Instant) -> u32 {
        let mut skipped = 0;
        self.next_deadline += self.base_interval + self.random_jitter();

        while self.next_deadline <= now {
            skipped += 1;
            self.next_deadline += self.base_interval;
        }

        if skipped > 0 {
            tracing::warn!(
                "Previous cycle overran; dropped {} scheduled trigger(s)",
                skipped
            );
        }

        skipped
    }

    /// Generate random jitter in range [0, jitter_range]
    fn random_jitter(&self) -> Duration {
        if self.jitter_range.is_zero() {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter_range.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}
