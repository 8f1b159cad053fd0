//! Per-peer congestion tracking and link quality.

use crate::config::CongestionConfig;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Failure streak at which a link is considered poor.
const POOR_STREAK: u32 = 5;
const FAIR_STREAK: u32 = 2;

/// Lane fill ratios (percent of total capacity) for each quality step.
const POOR_FILL: usize = 90;
const FAIR_FILL: usize = 50;
const GOOD_FILL: usize = 10;

/// Coarse link quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl ConnectionQuality {
    /// Derives quality from the failure streak and queued depth.
    pub fn assess(failure_streak: u32, depth: usize, capacity: usize) -> Self {
        let fill = if capacity == 0 {
            0
        } else {
            depth * 100 / capacity
        };

        if failure_streak >= POOR_STREAK || fill >= POOR_FILL {
            ConnectionQuality::Poor
        } else if failure_streak >= FAIR_STREAK || fill >= FAIR_FILL {
            ConnectionQuality::Fair
        } else if failure_streak >= 1 || fill >= GOOD_FILL {
            ConnectionQuality::Good
        } else {
            ConnectionQuality::Excellent
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionQuality::Poor => "poor",
            ConnectionQuality::Fair => "fair",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Excellent => "excellent",
        };
        f.write_str(name)
    }
}

/// Failure streak and backoff for one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CongestionState {
    pub failure_streak: u32,
    pub backoff: Duration,
    blocked_until: Option<Instant>,
    /// Start of the current failure-free period while the streak is non-zero.
    quiet_since: Option<Instant>,
}

impl CongestionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed send and defers the peer by the new backoff.
    pub fn on_failure(&mut self, config: &CongestionConfig, now: Instant) {
        self.decay(config, now);
        self.failure_streak = self.failure_streak.saturating_add(1);
        self.backoff = Self::backoff_for(config, self.failure_streak);
        self.blocked_until = Some(now + self.backoff);
        self.quiet_since = Some(now);
    }

    /// Records a successful send. The streak decays by one.
    pub fn on_success(&mut self, config: &CongestionConfig) {
        self.failure_streak = self.failure_streak.saturating_sub(1);
        self.backoff = Self::backoff_for(config, self.failure_streak);
        self.blocked_until = None;
        if self.failure_streak == 0 {
            self.quiet_since = None;
        }
    }

    /// Forgives one failure for every `max_backoff` without a new one.
    ///
    /// A peer with nothing queued never gets a send to succeed, so the
    /// streak also has to fade with time.
    pub fn decay(&mut self, config: &CongestionConfig, now: Instant) {
        let Some(since) = self.quiet_since else {
            return;
        };
        let period = config.max_backoff();
        if self.failure_streak == 0 || period.is_zero() {
            self.quiet_since = None;
            return;
        }

        let elapsed = now.saturating_duration_since(since);
        let steps = u32::try_from(elapsed.as_nanos() / period.as_nanos()).unwrap_or(u32::MAX);
        if steps == 0 {
            return;
        }

        self.failure_streak = self.failure_streak.saturating_sub(steps);
        self.backoff = Self::backoff_for(config, self.failure_streak);
        self.quiet_since = if self.failure_streak == 0 {
            None
        } else {
            Some(since.checked_add(period.saturating_mul(steps)).unwrap_or(now))
        };
    }

    /// Returns the instant until which non-test sends must wait.
    pub fn blocked_until(&self, now: Instant) -> Option<Instant> {
        self.blocked_until.filter(|until| *until > now)
    }

    fn backoff_for(config: &CongestionConfig, streak: u32) -> Duration {
        config
            .base_backoff()
            .saturating_mul(streak)
            .min(config.max_backoff())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_growth_and_cap() {
        let config = CongestionConfig::default();
        let now = Instant::now();
        let mut state = CongestionState::new();

        state.on_failure(&config, now);
        assert_eq!(state.backoff, Duration::from_millis(50));
        state.on_failure(&config, now);
        assert_eq!(state.backoff, Duration::from_millis(100));

        for _ in 0..100 {
            state.on_failure(&config, now);
        }
        assert_eq!(state.backoff, Duration::from_secs(2));
        assert_eq!(state.blocked_until(now), Some(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_success_decays_streak() {
        let config = CongestionConfig::default();
        let now = Instant::now();
        let mut state = CongestionState::new();
        for _ in 0..3 {
            state.on_failure(&config, now);
        }

        state.on_success(&config);
        assert_eq!(state.failure_streak, 2);
        assert_eq!(state.backoff, Duration::from_millis(100));
        assert!(state.blocked_until(now).is_none());

        state.on_success(&config);
        state.on_success(&config);
        state.on_success(&config);
        assert_eq!(state.failure_streak, 0);
        assert_eq!(state.backoff, Duration::ZERO);
    }

    #[test]
    fn test_block_expires() {
        let config = CongestionConfig::default();
        let now = Instant::now();
        let mut state = CongestionState::new();
        state.on_failure(&config, now);
        assert!(state.blocked_until(now + Duration::from_millis(49)).is_some());
        assert!(state.blocked_until(now + Duration::from_millis(50)).is_none());
    }

    #[test]
    fn test_streak_fades_while_idle() {
        let config = CongestionConfig::default();
        let now = Instant::now();
        let mut state = CongestionState::new();
        for _ in 0..8 {
            state.on_failure(&config, now);
        }
        assert_eq!(state.failure_streak, 8);

        // One step per max_backoff (2 s); partial periods carry over.
        state.decay(&config, now + Duration::from_millis(1_999));
        assert_eq!(state.failure_streak, 8);
        state.decay(&config, now + Duration::from_secs(3));
        assert_eq!(state.failure_streak, 7);
        state.decay(&config, now + Duration::from_secs(4));
        assert_eq!(state.failure_streak, 6);
        assert_eq!(state.backoff, Duration::from_millis(300));

        state.decay(&config, now + Duration::from_secs(3_600));
        assert_eq!(state.failure_streak, 0);
        assert_eq!(state.backoff, Duration::ZERO);
        assert_eq!(
            ConnectionQuality::assess(state.failure_streak, 0, 100),
            ConnectionQuality::Excellent
        );
    }

    #[test]
    fn test_failure_after_quiet_period_starts_low() {
        let config = CongestionConfig::default();
        let now = Instant::now();
        let mut state = CongestionState::new();
        for _ in 0..5 {
            state.on_failure(&config, now);
        }

        state.on_failure(&config, now + Duration::from_secs(60));
        assert_eq!(state.failure_streak, 1);
        assert_eq!(state.backoff, Duration::from_millis(50));
    }

    #[test]
    fn test_quality() {
        assert_eq!(ConnectionQuality::assess(0, 0, 100), ConnectionQuality::Excellent);
        assert_eq!(ConnectionQuality::assess(1, 0, 100), ConnectionQuality::Good);
        assert_eq!(ConnectionQuality::assess(0, 10, 100), ConnectionQuality::Good);
        assert_eq!(ConnectionQuality::assess(2, 0, 100), ConnectionQuality::Fair);
        assert_eq!(ConnectionQuality::assess(0, 60, 100), ConnectionQuality::Fair);
        assert_eq!(ConnectionQuality::assess(5, 0, 100), ConnectionQuality::Poor);
        assert_eq!(ConnectionQuality::assess(0, 95, 100), ConnectionQuality::Poor);
        assert!(ConnectionQuality::Poor < ConnectionQuality::Excellent);
    }
}
