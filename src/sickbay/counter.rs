//! Consecutive failure tracking
//!
//! Edge-triggered: the threshold fires once per outage. The count saturates
//! at the threshold so a long outage never runs it past the limit.

use crate::sickbay::checker::Health;

/// Result of recording one verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterStep {
    pub consecutive_failures: u32,
    /// True only on the call that reached the threshold
    pub crossed: bool,
}

/// Counts consecutive non-healthy cycles
#[derive(Debug, Clone)]
pub struct FailureCounter {
    threshold: u32,
    consecutive: u32,
}

impl FailureCounter {
    /// Create a counter; a zero threshold is treated as 1
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
        }
    }

    /// Resume from a persisted count (clamped to the threshold)
    pub fn restore(mut self, consecutive: u32) -> Self {
        self.consecutive = consecutive.min(self.threshold);
        self
    }

    /// Record one verdict
    pub fn record(&mut self, health: Health) -> CounterStep {
        if health.is_healthy() {
            self.consecutive = 0;
            return CounterStep {
                consecutive_failures: 0,
                crossed: false,
            };
        }

        let before = self.consecutive;
        self.consecutive = (before + 1).min(self.threshold);

        CounterStep {
            consecutive_failures: self.consecutive,
            crossed: before < self.threshold && self.consecutive == self.threshold,
        }
    }

    /// Zero the count (after an authorized reboot or operator reset)
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// The threshold was reached and nothing has reset the count since
    pub fn is_saturated(&self) -> bool {
        self.consecutive >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crosses_on_third_failure_not_fourth() {
        let mut counter = FailureCounter::new(3);

        assert!(!counter.record(Health::Unhealthy).crossed);
        assert!(!counter.record(Health::Unhealthy).crossed);

        let third = counter.record(Health::Unhealthy);
        assert!(third.crossed);
        assert_eq!(third.consecutive_failures, 3);

        let fourth = counter.record(Health::Unhealthy);
        assert!(!fourth.crossed);
        assert_eq!(fourth.consecutive_failures, 3);
    }

    #[test]
    fn test_degraded_counts_as_failure() {
        let mut counter = FailureCounter::new(2);
        counter.record(Health::Degraded);
        assert!(counter.record(Health::Unhealthy).crossed);
    }

    #[test]
    fn test_healthy_resets() {
        let mut counter = FailureCounter::new(3);
        counter.record(Health::Unhealthy);
        counter.record(Health::Unhealthy);

        let step = counter.record(Health::Healthy);
        assert_eq!(step.consecutive_failures, 0);
        assert!(!step.crossed);

        // A fresh outage needs the full run again
        counter.record(Health::Unhealthy);
        counter.record(Health::Unhealthy);
        assert!(counter.record(Health::Unhealthy).crossed);
    }

    #[test]
    fn test_fires_once_per_outage() {
        let mut counter = FailureCounter::new(2);
        let pattern = [
            Health::Unhealthy,
            Health::Unhealthy, // cross
            Health::Unhealthy,
            Health::Degraded,
            Health::Healthy,
            Health::Unhealthy,
            Health::Unhealthy, // cross
            Health::Unhealthy,
        ];

        let crossings: Vec<usize> = pattern
            .iter()
            .enumerate()
            .filter(|(_, h)| counter.record(**h).crossed)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(crossings, vec![1, 6]);
    }

    #[test]
    fn test_never_exceeds_threshold() {
        let mut counter = FailureCounter::new(4);
        for _ in 0..50 {
            let step = counter.record(Health::Unhealthy);
            assert!(step.consecutive_failures <= 4);
        }
        assert!(counter.is_saturated());
    }

    #[test]
    fn test_reset_after_authorization() {
        let mut counter = FailureCounter::new(1);
        assert!(counter.record(Health::Unhealthy).crossed);
        counter.reset();
        assert_eq!(counter.consecutive(), 0);
        assert!(counter.record(Health::Unhealthy).crossed);
    }

    #[test]
    fn test_restore_clamps() {
        let counter = FailureCounter::new(3).restore(7);
        assert_eq!(counter.consecutive(), 3);
        assert!(counter.is_saturated());

        let mut counter = FailureCounter::new(3).restore(2);
        assert!(counter.record(Health::Unhealthy).crossed);
    }

    #[test]
    fn test_zero_threshold_is_one() {
        let mut counter = FailureCounter::new(0);
        assert_eq!(counter.threshold(), 1);
        assert!(counter.record(Health::Unhealthy).crossed);
    }
}
