//! Convenient re-exports for common failgate types.
pub use crate::{
    circuit_breaker::{CircuitBreakerBuilder, CircuitBreakerLayer, CircuitBreakerPolicy},
    circuit_breaker_registry::{
        CircuitBreakerHandle, CircuitBreakerRegistry, InMemoryCircuitBreakerRegistry,
    },
    clock::{Clock, ManualClock, MonotonicClock},
    context::Context,
    controller::{BreakArgs, CircuitState},
    error::{ConfigError, Outcome, ResilienceError},
    strategy::TripPolicy,
};
