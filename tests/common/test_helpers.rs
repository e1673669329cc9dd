#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use failgate::{BreakArgs, CircuitBreakerBuilder, CircuitBreakerPolicy, CircuitState, ManualClock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError(pub String);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestError: {}", self.0)
    }
}

impl std::error::Error for TestError {}

pub fn boom() -> TestError {
    TestError("boom".to_string())
}

/// `(prior_state, duration, half_open_failures)` for every `on_break` call.
pub type BreakLog = Arc<Mutex<Vec<(CircuitState, Duration, u32)>>>;

/// Builder with a manual clock and an `on_break` recorder already attached.
pub fn recorded_builder(
    clock: &ManualClock,
) -> (CircuitBreakerBuilder<u32, TestError>, BreakLog) {
    let log: BreakLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let builder = CircuitBreakerPolicy::builder()
        .with_clock(clock.clone())
        .on_break(move |args: &BreakArgs<u32, TestError>| {
            sink.lock().unwrap().push((args.prior_state, args.duration, args.half_open_failures));
        });
    (builder, log)
}

pub fn fail_once(breaker: &CircuitBreakerPolicy<u32, TestError>) {
    let _ = breaker.execute_sync(|| Err(boom()));
}

pub fn succeed_once(breaker: &CircuitBreakerPolicy<u32, TestError>) {
    let _ = breaker.execute_sync(|| Ok(1));
}
