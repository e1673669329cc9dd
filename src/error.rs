//! Error types for the circuit breaker
use std::fmt;
use std::time::Duration;

/// A handled failure observed by the breaker.
///
/// Operations fail either by returning an error the error predicate recognises, or by returning
/// a value the result predicate recognises. `Isolated` is the synthetic outcome recorded when the
/// circuit is isolated by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// A handled error.
    Error(E),
    /// A handled result value.
    Result(T),
    /// The circuit was manually isolated.
    Isolated,
}

impl<T, E> Outcome<T, E> {
    /// Borrow the handled error, if this outcome is one.
    pub fn as_error(&self) -> Option<&E> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the handled result, if this outcome is one.
    pub fn as_result(&self) -> Option<&T> {
        match self {
            Self::Result(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this is the synthetic isolation outcome.
    pub fn is_isolated(&self) -> bool {
        matches!(self, Self::Isolated)
    }
}

/// Error returned to callers of a circuit-breaker protected operation.
///
/// `T` only matters for breakers that treat result values as failures; the last handled result
/// travels with [`ResilienceError::BrokenCircuit`].
#[derive(Debug, Clone)]
pub enum ResilienceError<E, T = ()> {
    /// The circuit is open, or a half-open probe is already in flight.
    BrokenCircuit {
        /// The handled failure that most recently tripped (or kept open) the circuit.
        last_outcome: Option<Outcome<T, E>>,
        /// Time left until the circuit admits a probe; `None` while a probe is in flight.
        retry_after: Option<Duration>,
    },
    /// The circuit was isolated by hand and rejects every call until reset.
    IsolatedCircuit,
    /// The caller's cancellation token fired before the call was attempted.
    Cancelled,
    /// The underlying operation failed.
    Inner(E),
}

impl<E: fmt::Display, T> fmt::Display for ResilienceError<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenCircuit { last_outcome, retry_after } => {
                write!(f, "the circuit is now open and is not allowing calls")?;
                if let Some(after) = retry_after {
                    write!(f, " (retry after {:?})", after)?;
                }
                match last_outcome {
                    Some(Outcome::Error(e)) => write!(f, "; last error: {}", e),
                    Some(Outcome::Result(_)) => write!(f, "; last failure was a handled result"),
                    _ => Ok(()),
                }
            }
            Self::IsolatedCircuit => {
                write!(f, "the circuit is manually held open and is not allowing calls")
            }
            Self::Cancelled => write!(f, "operation cancelled before execution"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E, T> std::error::Error for ResilienceError<E, T>
where
    E: std::error::Error + 'static,
    T: fmt::Debug,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::BrokenCircuit { last_outcome: Some(Outcome::Error(e)), .. } => Some(e),
            _ => None,
        }
    }
}

impl<E, T> ResilienceError<E, T> {
    /// Check if the call was rejected because the circuit is broken
    pub fn is_broken_circuit(&self) -> bool {
        matches!(self, Self::BrokenCircuit { .. })
    }
    /// Check if the call was rejected because the circuit is isolated
    pub fn is_isolated_circuit(&self) -> bool {
        matches!(self, Self::IsolatedCircuit)
    }
    /// Check if the call was rejected by either kind of open circuit
    pub fn is_circuit_rejection(&self) -> bool {
        self.is_broken_circuit() || self.is_isolated_circuit()
    }
    /// Check if the call was cancelled before execution
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// The handled failure carried by a broken-circuit rejection.
    pub fn last_outcome(&self) -> Option<&Outcome<T, E>> {
        match self {
            Self::BrokenCircuit { last_outcome, .. } => last_outcome.as_ref(),
            _ => None,
        }
    }
    /// Remaining block time carried by a broken-circuit rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::BrokenCircuit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors produced when validating breaker configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Consecutive failure threshold must be > 0.
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold {
        /// Value provided by caller.
        provided: u32,
    },
    /// Failure ratio must be in (0.0, 1.0].
    #[error("failure ratio must be greater than 0 and at most 1 (got {provided})")]
    InvalidFailureRatio {
        /// Value provided by caller.
        provided: f64,
    },
    /// Sampling duration must be at least the timer resolution.
    #[error("sampling_duration must be >= {resolution:?} (got {provided:?})")]
    InvalidSamplingDuration {
        /// Value provided by caller.
        provided: Duration,
        /// Configured timer resolution.
        resolution: Duration,
    },
    /// Minimum throughput must be >= 2.
    #[error("minimum_throughput must be >= 2 (got {provided})")]
    InvalidMinimumThroughput {
        /// Value provided by caller.
        provided: u32,
    },
    /// Timer resolution must be non-zero.
    #[error("timer_resolution must be > 0 (got {0:?})")]
    InvalidTimerResolution(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);
    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for DummyError {}
    #[test]
    fn broken_circuit_display_includes_last_error() {
        let err: ResilienceError<DummyError> = ResilienceError::BrokenCircuit {
            last_outcome: Some(Outcome::Error(DummyError("backend down"))),
            retry_after: Some(Duration::from_secs(5)),
        };
        let msg = err.to_string();
        assert!(msg.contains("circuit is now open"));
        assert!(msg.contains("backend down"));
        assert!(msg.contains("5s"));
    }
    #[test]
    fn isolated_display_is_distinct() {
        let err: ResilienceError<DummyError> = ResilienceError::IsolatedCircuit;
        assert!(err.to_string().contains("manually held open"));
        assert!(err.is_isolated_circuit());
        assert!(!err.is_broken_circuit());
        assert!(err.is_circuit_rejection());
    }
    #[test]
    fn source_points_at_wrapped_failure() {
        let inner: ResilienceError<DummyError> = ResilienceError::Inner(DummyError("x"));
        assert_eq!(inner.source().unwrap().to_string(), "x");
        let broken: ResilienceError<DummyError, u32> = ResilienceError::BrokenCircuit {
            last_outcome: Some(Outcome::Error(DummyError("tripped"))),
            retry_after: None,
        };
        assert_eq!(broken.source().unwrap().to_string(), "tripped");
        let by_result: ResilienceError<DummyError, u32> = ResilienceError::BrokenCircuit {
            last_outcome: Some(Outcome::Result(503)),
            retry_after: None,
        };
        assert!(by_result.source().is_none());
        assert!(ResilienceError::<DummyError>::Cancelled.source().is_none());
    }
    #[test]
    fn accessors_return_expected_data() {
        let broken: ResilienceError<DummyError, u32> = ResilienceError::BrokenCircuit {
            last_outcome: Some(Outcome::Result(503)),
            retry_after: Some(Duration::from_millis(40)),
        };
        assert_eq!(broken.last_outcome().and_then(Outcome::as_result), Some(&503));
        assert_eq!(broken.retry_after(), Some(Duration::from_millis(40)));
        assert!(broken.as_inner().is_none());
        let inner: ResilienceError<DummyError> = ResilienceError::Inner(DummyError("y"));
        assert!(inner.is_inner());
        assert!(inner.last_outcome().is_none());
        assert_eq!(inner.into_inner(), Some(DummyError("y")));
    }
    #[test]
    fn config_error_messages() {
        let err = ConfigError::InvalidMinimumThroughput { provided: 1 };
        assert_eq!(err.to_string(), "minimum_throughput must be >= 2 (got 1)");
        let err = ConfigError::InvalidFailureRatio { provided: 1.5 };
        assert!(err.to_string().contains("1.5"));
    }
}
