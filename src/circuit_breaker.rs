//! Circuit breaker policy, its builder, and the tower layer.
//!
//! A [`CircuitBreakerPolicy`] is a cheap handle: clones share one controller, so every clone
//! observes and drives the same circuit lifecycle.
//!
//! # Example
//! ```
//! use failgate::CircuitBreakerPolicy;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let breaker = CircuitBreakerPolicy::<u32, String>::builder()
//!     .consecutive_failures(3)
//!     .break_duration(Duration::from_secs(30))
//!     .build()
//!     .expect("valid breaker");
//!
//! let answer = breaker.execute(|| async { Ok::<_, String>(42) }).await;
//! assert_eq!(answer.unwrap(), 42);
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use tower_layer::Layer;
use tower_service::Service;

use crate::circuit_breaker_registry::CircuitBreakerHandle;
use crate::clock::{Clock, MonotonicClock};
use crate::context::Context;
use crate::controller::{BreakArgs, BreakDurationFn, Callbacks, CircuitController, CircuitState};
use crate::engine::{self, Predicates};
use crate::error::{ConfigError, Outcome, ResilienceError};
use crate::health::HealthCount;
use crate::strategy::TripPolicy;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_BREAK_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_TIMER_RESOLUTION: Duration = Duration::from_millis(20);

fn fixed_break(duration: Duration) -> BreakDurationFn {
    Arc::new(move |_: u32| duration)
}

/// Circuit breaker guarding operations that yield `Result<T, E>`.
pub struct CircuitBreakerPolicy<T, E> {
    controller: Arc<CircuitController<T, E>>,
    predicates: Predicates<T, E>,
}

impl<T, E> Clone for CircuitBreakerPolicy<T, E> {
    fn clone(&self) -> Self {
        Self { controller: self.controller.clone(), predicates: self.predicates.clone() }
    }
}

impl<T, E> fmt::Debug for CircuitBreakerPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("controller", &self.controller)
            .field("predicates", &"<fn>")
            .finish()
    }
}

impl<T, E> CircuitBreakerPolicy<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Consecutive-failure breaker that opens for a fixed `break_duration`.
    ///
    /// # Errors
    /// [`ConfigError::InvalidFailureThreshold`] when `failure_threshold` is 0.
    ///
    /// ```
    /// use failgate::CircuitBreakerPolicy;
    /// use std::time::Duration;
    /// let breaker = CircuitBreakerPolicy::<(), std::io::ErrorKind>::new(5, Duration::from_secs(30));
    /// assert!(breaker.is_ok());
    /// ```
    pub fn new(failure_threshold: u32, break_duration: Duration) -> Result<Self, ConfigError> {
        Self::builder()
            .consecutive_failures(failure_threshold)
            .break_duration(break_duration)
            .build()
    }

    pub fn builder() -> CircuitBreakerBuilder<T, E> {
        CircuitBreakerBuilder::new()
    }

    /// Run an async operation under breaker protection.
    ///
    /// # Errors
    /// - [`ResilienceError::BrokenCircuit`] while open, or when another caller holds the
    ///   half-open probe. The operation is not invoked.
    /// - [`ResilienceError::IsolatedCircuit`] while isolated.
    /// - [`ResilienceError::Inner`] when the operation itself fails.
    ///
    /// A result matched by `handle_result` is still returned as `Ok`; it only counts against
    /// the circuit.
    pub async fn execute<Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E, T>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        let context = Context::default();
        self.execute_with_context(&context, operation).await
    }

    /// [`execute`](Self::execute) with a caller-supplied [`Context`]. A cancelled context fails
    /// fast with [`ResilienceError::Cancelled`] and leaves the circuit untouched.
    pub async fn execute_with_context<Fut, Op>(
        &self,
        context: &Context,
        operation: Op,
    ) -> Result<T, ResilienceError<E, T>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        engine::execute_async(&self.controller, &self.predicates, context, operation).await
    }

    /// Blocking counterpart of [`execute`](Self::execute).
    pub fn execute_sync<Op>(&self, operation: Op) -> Result<T, ResilienceError<E, T>>
    where
        Op: FnOnce() -> Result<T, E>,
    {
        self.execute_sync_with_context(&Context::default(), operation)
    }

    pub fn execute_sync_with_context<Op>(
        &self,
        context: &Context,
        operation: Op,
    ) -> Result<T, ResilienceError<E, T>>
    where
        Op: FnOnce() -> Result<T, E>,
    {
        engine::execute_sync(&self.controller, &self.predicates, context, operation)
    }

    pub fn state(&self) -> CircuitState {
        self.controller.state()
    }

    /// Handled failure that most recently counted against the circuit.
    pub fn last_outcome(&self) -> Option<Outcome<T, E>> {
        self.controller.last_outcome()
    }

    pub fn last_error(&self) -> Option<E> {
        match self.controller.last_outcome()? {
            Outcome::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn last_handled_result(&self) -> Option<T> {
        match self.controller.last_outcome()? {
            Outcome::Result(value) => Some(value),
            _ => None,
        }
    }

    /// Windowed counts; only the failure-ratio strategy keeps them.
    pub fn health_count(&self) -> Option<HealthCount> {
        self.controller.health_count()
    }

    /// Hold the circuit open until [`reset`](Self::reset).
    pub fn isolate(&self) {
        self.controller.isolate();
    }

    /// Close the circuit and clear all statistics.
    pub fn reset(&self) {
        self.controller.reset();
    }
}

impl<T, E> CircuitBreakerPolicy<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Type-erased handle for a [`CircuitBreakerRegistry`](crate::CircuitBreakerRegistry).
    pub fn handle(&self) -> CircuitBreakerHandle {
        CircuitBreakerHandle::new(self.controller.clone())
    }
}

/// Builder for [`CircuitBreakerPolicy`]; all validation happens in [`build`](Self::build).
pub struct CircuitBreakerBuilder<T, E> {
    trip_policy: TripPolicy,
    break_duration: BreakDurationFn,
    timer_resolution: Duration,
    predicates: Predicates<T, E>,
    callbacks: Callbacks<T, E>,
    clock: Arc<dyn Clock>,
}

impl<T, E> fmt::Debug for CircuitBreakerBuilder<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerBuilder")
            .field("trip_policy", &self.trip_policy)
            .field("timer_resolution", &self.timer_resolution)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<T, E> CircuitBreakerBuilder<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    pub fn new() -> Self {
        Self {
            trip_policy: TripPolicy::ConsecutiveFailures { threshold: DEFAULT_FAILURE_THRESHOLD },
            break_duration: fixed_break(DEFAULT_BREAK_DURATION),
            timer_resolution: DEFAULT_TIMER_RESOLUTION,
            predicates: Predicates::default(),
            callbacks: Callbacks::default(),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Open after `threshold` consecutive handled failures.
    pub fn consecutive_failures(mut self, threshold: u32) -> Self {
        self.trip_policy = TripPolicy::ConsecutiveFailures { threshold };
        self
    }

    /// Open when at least `minimum_throughput` calls were seen within `sampling_duration` and
    /// the failure share reached `threshold`.
    pub fn failure_ratio(
        mut self,
        threshold: f64,
        sampling_duration: Duration,
        minimum_throughput: u32,
    ) -> Self {
        self.trip_policy =
            TripPolicy::FailureRatio { threshold, sampling_duration, minimum_throughput };
        self
    }

    pub fn trip_policy(mut self, policy: TripPolicy) -> Self {
        self.trip_policy = policy;
        self
    }

    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = fixed_break(duration);
        self
    }

    /// Compute the break from the number of consecutive failed half-open probes (0 for a break
    /// out of Closed).
    pub fn break_duration_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.break_duration = Arc::new(factory);
        self
    }

    /// Granularity used to choose between single and rolling health windows.
    pub fn timer_resolution(mut self, resolution: Duration) -> Self {
        self.timer_resolution = resolution;
        self
    }

    /// Which errors count against the circuit. Defaults to all of them.
    pub fn handle_error<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.predicates.handle_error = Arc::new(predicate);
        self
    }

    /// Which successful results count against the circuit. Defaults to none.
    pub fn handle_result<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.predicates.handle_result = Arc::new(predicate);
        self
    }

    pub fn on_break<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BreakArgs<T, E>) + Send + Sync + 'static,
    {
        self.callbacks.on_break = Some(Arc::new(callback));
        self
    }

    pub fn on_reset<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Context) + Send + Sync + 'static,
    {
        self.callbacks.on_reset = Some(Arc::new(callback));
        self
    }

    pub fn on_half_open<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(callback));
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validate and construct the policy.
    ///
    /// # Errors
    /// Any [`ConfigError`] describing the first invalid parameter.
    pub fn build(self) -> Result<CircuitBreakerPolicy<T, E>, ConfigError> {
        if self.timer_resolution.is_zero() {
            return Err(ConfigError::InvalidTimerResolution(self.timer_resolution));
        }
        self.trip_policy.validate(self.timer_resolution)?;

        let controller = CircuitController::new(
            self.trip_policy.build(self.timer_resolution),
            self.break_duration,
            self.callbacks,
            self.clock,
        );
        Ok(CircuitBreakerPolicy { controller: Arc::new(controller), predicates: self.predicates })
    }
}

impl<T, E> Default for CircuitBreakerBuilder<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Tower layer running every request of the wrapped service through one breaker.
pub struct CircuitBreakerLayer<T, E> {
    policy: CircuitBreakerPolicy<T, E>,
}

impl<T, E> CircuitBreakerLayer<T, E> {
    pub fn new(policy: CircuitBreakerPolicy<T, E>) -> Self {
        Self { policy }
    }
}

impl<T, E> Clone for CircuitBreakerLayer<T, E> {
    fn clone(&self) -> Self {
        Self { policy: self.policy.clone() }
    }
}

impl<T, E> fmt::Debug for CircuitBreakerLayer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerLayer").field("policy", &self.policy).finish()
    }
}

impl<S, T, E> Layer<S> for CircuitBreakerLayer<T, E> {
    type Service = CircuitBreakerService<S, T, E>;

    fn layer(&self, service: S) -> Self::Service {
        CircuitBreakerService { inner: service, policy: self.policy.clone() }
    }
}

/// Service produced by [`CircuitBreakerLayer`].
pub struct CircuitBreakerService<S, T, E> {
    inner: S,
    policy: CircuitBreakerPolicy<T, E>,
}

impl<S: Clone, T, E> Clone for CircuitBreakerService<S, T, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), policy: self.policy.clone() }
    }
}

impl<S: fmt::Debug, T, E> fmt::Debug for CircuitBreakerService<S, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerService")
            .field("inner", &self.inner)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<S, T, E, Request> Service<Request> for CircuitBreakerService<S, T, E>
where
    Request: Send + 'static,
    S: Service<Request, Response = T, Error = E> + Clone + Send + 'static,
    S::Future: Send + 'static,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Response = T;
    type Error = ResilienceError<E, T>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ResilienceError::Inner)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let policy = self.policy.clone();
        // the readied service handles this request; the clone waits for the next poll_ready
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { policy.execute(move || inner.call(req)).await })
    }
}
