#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # failgate
//!
//! A circuit breaker for Rust: stop calling a dependency that keeps failing, give it time to
//! recover, then let a single probe call find out whether it has.
//!
//! ## Features
//!
//! - **Two trip strategies**: consecutive handled failures, or a failure ratio over a rolling
//!   sampling window with a minimum throughput
//! - **Single-flight half-open probing** via a compare-and-swap claim
//! - **Lazy transitions**: no timers or background tasks; Open → HalfOpen is derived on read
//! - **Manual isolation and reset**, also by name through a registry
//! - **Handled results**: treat values (e.g. HTTP 503) as failures without turning them into errors
//! - **Sync, async and tower** entry points sharing one state machine
//! - **Injectable clock** for deterministic tests
//!
//! ## Quick Start
//!
//! ```rust
//! use failgate::{CircuitBreakerPolicy, ResilienceError};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let breaker = CircuitBreakerPolicy::<String, std::io::ErrorKind>::builder()
//!         .failure_ratio(0.5, Duration::from_secs(10), 8)
//!         .break_duration(Duration::from_secs(30))
//!         .on_break(|args| eprintln!("circuit opened for {:?}", args.duration))
//!         .build()
//!         .expect("valid configuration");
//!
//!     match breaker.execute(|| async { Ok("pong".to_string()) }).await {
//!         Ok(body) => assert_eq!(body, "pong"),
//!         Err(ResilienceError::BrokenCircuit { retry_after, .. }) => {
//!             eprintln!("try again in {:?}", retry_after)
//!         }
//!         Err(other) => eprintln!("call failed: {other:?}"),
//!     }
//! }
//! ```

pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod clock;
pub mod context;
pub mod controller;
mod engine;
pub mod error;
pub mod health;
pub mod prelude;
pub mod strategy;

// Re-exports
pub use circuit_breaker::{
    CircuitBreakerBuilder, CircuitBreakerLayer, CircuitBreakerPolicy, CircuitBreakerService,
};
pub use circuit_breaker_registry::{
    CircuitBreakerHandle, CircuitBreakerRegistry, CircuitControl, InMemoryCircuitBreakerRegistry,
    RegistryError,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use context::Context;
pub use controller::{Admission, BreakArgs, CircuitController, CircuitState};
pub use error::{ConfigError, Outcome, ResilienceError};
pub use health::HealthCount;
pub use strategy::TripPolicy;
