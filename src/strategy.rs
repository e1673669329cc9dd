//! Trip strategies: when does a run of failures open the circuit?
//!
//! Strategies only keep statistics and return a [`Verdict`]; the controller owns the state
//! machine and performs the transition.

use std::time::Duration;

use crate::controller::CircuitState;
use crate::error::ConfigError;
use crate::health::{HealthCount, HealthMetrics};

/// How the breaker decides to trip. Chosen once, at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum TripPolicy {
    /// Trip after `threshold` consecutive handled failures.
    ConsecutiveFailures { threshold: u32 },
    /// Trip when, within `sampling_duration`, at least `minimum_throughput` calls were seen and
    /// the share of failures reached `threshold`.
    FailureRatio { threshold: f64, sampling_duration: Duration, minimum_throughput: u32 },
}

impl TripPolicy {
    pub(crate) fn validate(&self, timer_resolution: Duration) -> Result<(), ConfigError> {
        match *self {
            TripPolicy::ConsecutiveFailures { threshold } => {
                if threshold == 0 {
                    return Err(ConfigError::InvalidFailureThreshold { provided: threshold });
                }
            }
            TripPolicy::FailureRatio { threshold, sampling_duration, minimum_throughput } => {
                // written so that NaN is rejected too
                if !(threshold > 0.0 && threshold <= 1.0) {
                    return Err(ConfigError::InvalidFailureRatio { provided: threshold });
                }
                if sampling_duration < timer_resolution {
                    return Err(ConfigError::InvalidSamplingDuration {
                        provided: sampling_duration,
                        resolution: timer_resolution,
                    });
                }
                if minimum_throughput < 2 {
                    return Err(ConfigError::InvalidMinimumThroughput {
                        provided: minimum_throughput,
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn build(&self, timer_resolution: Duration) -> TripStrategy {
        match *self {
            TripPolicy::ConsecutiveFailures { threshold } => {
                TripStrategy::Consecutive(ConsecutiveCount::new(threshold))
            }
            TripPolicy::FailureRatio { threshold, sampling_duration, minimum_throughput } => {
                TripStrategy::Advanced(FailureRatio {
                    threshold,
                    minimum_throughput,
                    metrics: HealthMetrics::for_sampling(sampling_duration, timer_resolution),
                    half_open_failures: 0,
                })
            }
        }
    }
}

/// What the controller should do after an outcome was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// No transition.
    Hold,
    /// Open the circuit; the count feeds the break-duration factory.
    Break { half_open_failures: u32 },
    /// The probe succeeded. Statistics are already cleared; close the circuit.
    Close,
}

#[derive(Debug)]
pub(crate) enum TripStrategy {
    Consecutive(ConsecutiveCount),
    Advanced(FailureRatio),
}

impl TripStrategy {
    pub(crate) fn on_success(&mut self, state: CircuitState, now: u64) -> Verdict {
        match self {
            TripStrategy::Consecutive(s) => s.on_success(state),
            TripStrategy::Advanced(s) => s.on_success(state, now),
        }
    }

    pub(crate) fn on_failure(&mut self, state: CircuitState, now: u64) -> Verdict {
        match self {
            TripStrategy::Consecutive(s) => s.on_failure(state),
            TripStrategy::Advanced(s) => s.on_failure(state, now),
        }
    }

    /// Clear all statistics; called when the circuit is reset by hand.
    pub(crate) fn on_reset(&mut self) {
        match self {
            TripStrategy::Consecutive(s) => s.reset(),
            TripStrategy::Advanced(s) => s.reset(),
        }
    }

    pub(crate) fn health_count(&mut self, now: u64) -> Option<HealthCount> {
        match self {
            TripStrategy::Consecutive(_) => None,
            TripStrategy::Advanced(s) => Some(s.metrics.health_count(now)),
        }
    }
}

/// Counts consecutive handled failures. Outcomes arriving while open or isolated are ignored:
/// the calls producing them were admitted before the circuit broke.
#[derive(Debug)]
pub(crate) struct ConsecutiveCount {
    threshold: u32,
    consecutive_failures: u32,
    half_open_failures: u32,
}

impl ConsecutiveCount {
    fn new(threshold: u32) -> Self {
        Self { threshold, consecutive_failures: 0, half_open_failures: 0 }
    }

    fn on_success(&mut self, state: CircuitState) -> Verdict {
        match state {
            CircuitState::HalfOpen => {
                self.reset();
                Verdict::Close
            }
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                Verdict::Hold
            }
            CircuitState::Open | CircuitState::Isolated => Verdict::Hold,
        }
    }

    fn on_failure(&mut self, state: CircuitState) -> Verdict {
        match state {
            CircuitState::HalfOpen => {
                self.half_open_failures = self.half_open_failures.saturating_add(1);
                Verdict::Break { half_open_failures: self.half_open_failures }
            }
            CircuitState::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.threshold {
                    Verdict::Break { half_open_failures: self.half_open_failures }
                } else {
                    Verdict::Hold
                }
            }
            CircuitState::Open | CircuitState::Isolated => Verdict::Hold,
        }
    }

    fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.half_open_failures = 0;
    }
}

/// Failure ratio over a sampling window.
///
/// Unlike [`ConsecutiveCount`], failures reported while open or isolated still land in the
/// metrics, so the ratio stays continuous once the window slides past the break.
#[derive(Debug)]
pub(crate) struct FailureRatio {
    threshold: f64,
    minimum_throughput: u32,
    metrics: HealthMetrics,
    half_open_failures: u32,
}

impl FailureRatio {
    fn on_success(&mut self, state: CircuitState, now: u64) -> Verdict {
        let verdict = if state == CircuitState::HalfOpen {
            self.reset();
            Verdict::Close
        } else {
            Verdict::Hold
        };
        self.metrics.increment_success(now);
        verdict
    }

    fn on_failure(&mut self, state: CircuitState, now: u64) -> Verdict {
        match state {
            CircuitState::HalfOpen => {
                self.half_open_failures = self.half_open_failures.saturating_add(1);
                Verdict::Break { half_open_failures: self.half_open_failures }
            }
            CircuitState::Closed => {
                self.metrics.increment_failure(now);
                let health = self.metrics.health_count(now);
                if health.total() >= self.minimum_throughput
                    && health.failure_ratio() >= self.threshold
                {
                    Verdict::Break { half_open_failures: self.half_open_failures }
                } else {
                    Verdict::Hold
                }
            }
            CircuitState::Open | CircuitState::Isolated => {
                self.metrics.increment_failure(now);
                Verdict::Hold
            }
        }
    }

    fn reset(&mut self) {
        self.metrics.reset();
        self.half_open_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOLUTION: Duration = Duration::from_millis(20);

    fn ratio(threshold: f64, minimum_throughput: u32) -> TripStrategy {
        TripPolicy::FailureRatio {
            threshold,
            sampling_duration: Duration::from_secs(30),
            minimum_throughput,
        }
        .build(RESOLUTION)
    }

    #[test]
    fn rejects_invalid_policies() {
        let zero = TripPolicy::ConsecutiveFailures { threshold: 0 };
        assert_eq!(
            zero.validate(RESOLUTION),
            Err(ConfigError::InvalidFailureThreshold { provided: 0 })
        );

        for bad in [0.0, -0.1, 1.01, f64::NAN] {
            let p = TripPolicy::FailureRatio {
                threshold: bad,
                sampling_duration: Duration::from_secs(1),
                minimum_throughput: 2,
            };
            assert!(matches!(p.validate(RESOLUTION), Err(ConfigError::InvalidFailureRatio { .. })));
        }

        let short = TripPolicy::FailureRatio {
            threshold: 0.5,
            sampling_duration: Duration::from_millis(19),
            minimum_throughput: 2,
        };
        assert!(matches!(
            short.validate(RESOLUTION),
            Err(ConfigError::InvalidSamplingDuration { .. })
        ));

        let thin = TripPolicy::FailureRatio {
            threshold: 0.5,
            sampling_duration: Duration::from_secs(1),
            minimum_throughput: 1,
        };
        assert_eq!(
            thin.validate(RESOLUTION),
            Err(ConfigError::InvalidMinimumThroughput { provided: 1 })
        );
    }

    #[test]
    fn consecutive_trips_at_threshold() {
        let mut s = TripPolicy::ConsecutiveFailures { threshold: 3 }.build(RESOLUTION);
        assert_eq!(s.on_failure(CircuitState::Closed, 0), Verdict::Hold);
        assert_eq!(s.on_failure(CircuitState::Closed, 0), Verdict::Hold);
        assert_eq!(
            s.on_failure(CircuitState::Closed, 0),
            Verdict::Break { half_open_failures: 0 }
        );
    }

    #[test]
    fn consecutive_success_restarts_count() {
        let mut s = TripPolicy::ConsecutiveFailures { threshold: 2 }.build(RESOLUTION);
        s.on_failure(CircuitState::Closed, 0);
        s.on_success(CircuitState::Closed, 0);
        assert_eq!(s.on_failure(CircuitState::Closed, 0), Verdict::Hold);
    }

    #[test]
    fn consecutive_half_open_failures_accumulate() {
        let mut s = TripPolicy::ConsecutiveFailures { threshold: 1 }.build(RESOLUTION);
        assert_eq!(
            s.on_failure(CircuitState::HalfOpen, 0),
            Verdict::Break { half_open_failures: 1 }
        );
        assert_eq!(
            s.on_failure(CircuitState::HalfOpen, 0),
            Verdict::Break { half_open_failures: 2 }
        );
        assert_eq!(s.on_success(CircuitState::HalfOpen, 0), Verdict::Close);
        assert_eq!(
            s.on_failure(CircuitState::HalfOpen, 0),
            Verdict::Break { half_open_failures: 1 }
        );
    }

    #[test]
    fn consecutive_ignores_outcomes_while_open() {
        let mut s = TripPolicy::ConsecutiveFailures { threshold: 1 }.build(RESOLUTION);
        assert_eq!(s.on_failure(CircuitState::Open, 0), Verdict::Hold);
        assert_eq!(s.on_failure(CircuitState::Isolated, 0), Verdict::Hold);
        assert!(s.health_count(0).is_none());
    }

    #[test]
    fn ratio_trips_at_exact_threshold() {
        let mut s = ratio(0.5, 4);
        s.on_success(CircuitState::Closed, 0);
        s.on_success(CircuitState::Closed, 1);
        assert_eq!(s.on_failure(CircuitState::Closed, 2), Verdict::Hold);
        assert_eq!(
            s.on_failure(CircuitState::Closed, 3),
            Verdict::Break { half_open_failures: 0 }
        );
    }

    #[test]
    fn ratio_needs_minimum_throughput() {
        let mut s = ratio(0.5, 4);
        for t in 0..3 {
            assert_eq!(s.on_failure(CircuitState::Closed, t), Verdict::Hold);
        }
    }

    #[test]
    fn ratio_records_failures_while_open() {
        let mut s = ratio(0.5, 4);
        s.on_failure(CircuitState::Open, 0);
        s.on_failure(CircuitState::Isolated, 1);
        let count = s.health_count(2).expect("ratio strategy has metrics");
        assert_eq!(count.failures, 2);
    }

    #[test]
    fn ratio_half_open_success_clears_then_counts() {
        let mut s = ratio(0.5, 4);
        s.on_failure(CircuitState::Closed, 0);
        assert_eq!(s.on_success(CircuitState::HalfOpen, 1), Verdict::Close);
        let count = s.health_count(2).expect("ratio strategy has metrics");
        assert_eq!((count.successes, count.failures), (1, 0));
    }
}
