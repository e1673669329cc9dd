//! Circuit state machine.
//!
//! All bookkeeping happens under one mutex that is never held while the protected operation
//! runs. Open → HalfOpen is derived lazily from `(stored state, blocked_till, now)` on every read;
//! there is no timer. Admission of the single half-open probe is a compare-and-swap on
//! `blocked_till`, made while the lock is held; the probe call itself runs outside it.
//!
//! Every break, close and isolation bumps a generation counter. A probe claim remembers the
//! generation it was taken in and is only given back if that generation is still current.
//!
//! User callbacks are queued while the lock is held and invoked after it is released, so a
//! callback may freely query the breaker.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::{duration_millis, Clock};
use crate::context::Context;
use crate::error::{Outcome, ResilienceError};
use crate::health::HealthCount;
use crate::strategy::{TripStrategy, Verdict};

const NOT_BLOCKED: u64 = 0;
const BLOCKED_FOREVER: u64 = u64::MAX;
/// Furthest break end a timed break can reach; kept apart from [`BLOCKED_FOREVER`], which marks
/// a claimed probe or an isolated circuit.
const LATEST_BREAK_END: u64 = BLOCKED_FOREVER - 1;
const ERR_POISONED_LOCK: &str = "circuit controller lock poisoned";

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operating mode; failures are counted.
    Closed,
    /// Short-circuits calls until the break duration elapses.
    Open,
    /// Break elapsed; exactly one probe call is admitted.
    HalfOpen,
    /// Held open by hand until reset.
    Isolated,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
            CircuitState::Isolated => "isolated",
        };
        f.write_str(name)
    }
}

/// Open → HalfOpen once the block has elapsed; every other state is returned unchanged.
fn derive_state(stored: CircuitState, blocked_till: u64, now: u64) -> CircuitState {
    match stored {
        CircuitState::Open if blocked_till != BLOCKED_FOREVER && now >= blocked_till => {
            CircuitState::HalfOpen
        }
        other => other,
    }
}

/// Passed to the `on_break` callback.
#[derive(Debug, Clone)]
pub struct BreakArgs<T, E> {
    /// Failure that caused the break ([`Outcome::Isolated`] for manual isolation).
    pub last_outcome: Option<Outcome<T, E>>,
    /// State the circuit left.
    pub prior_state: CircuitState,
    /// How long the circuit stays open; `Duration::MAX` when isolated.
    pub duration: Duration,
    /// Consecutive failed half-open probes, as given to the break-duration factory.
    pub half_open_failures: u32,
    /// Context of the call whose outcome tripped the circuit; a default context for isolation.
    pub context: Context,
}

pub(crate) type BreakDurationFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;
pub(crate) type OnBreak<T, E> = Arc<dyn Fn(&BreakArgs<T, E>) + Send + Sync>;
pub(crate) type OnReset = Arc<dyn Fn(&Context) + Send + Sync>;
pub(crate) type OnHalfOpen = Arc<dyn Fn() + Send + Sync>;

/// User-supplied transition hooks.
pub(crate) struct Callbacks<T, E> {
    pub(crate) on_break: Option<OnBreak<T, E>>,
    pub(crate) on_reset: Option<OnReset>,
    pub(crate) on_half_open: Option<OnHalfOpen>,
}

impl<T, E> Default for Callbacks<T, E> {
    fn default() -> Self {
        Self { on_break: None, on_reset: None, on_half_open: None }
    }
}

impl<T, E> Clone for Callbacks<T, E> {
    fn clone(&self) -> Self {
        Self {
            on_break: self.on_break.clone(),
            on_reset: self.on_reset.clone(),
            on_half_open: self.on_half_open.clone(),
        }
    }
}

enum Notification<T, E> {
    Broke(BreakArgs<T, E>),
    Reset(Context),
    HalfOpen,
}

#[derive(Debug)]
struct ControllerState<T, E> {
    circuit_state: CircuitState,
    last_outcome: Option<Outcome<T, E>>,
    strategy: TripStrategy,
    generation: u64,
}

/// Shared circuit state for one breaker instance.
pub struct CircuitController<T, E> {
    state: Mutex<ControllerState<T, E>>,
    blocked_till: AtomicU64,
    break_duration: BreakDurationFn,
    callbacks: Callbacks<T, E>,
    clock: Arc<dyn Clock>,
}

impl<T, E> fmt::Debug for CircuitController<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitController")
            .field("blocked_till", &self.blocked_till.load(Ordering::Relaxed))
            .field("clock", &self.clock)
            .field("break_duration", &"<factory>")
            .finish_non_exhaustive()
    }
}

impl<T, E> CircuitController<T, E>
where
    T: Clone,
    E: Clone,
{
    pub(crate) fn new(
        strategy: TripStrategy,
        break_duration: BreakDurationFn,
        callbacks: Callbacks<T, E>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Mutex::new(ControllerState {
                circuit_state: CircuitState::Closed,
                last_outcome: None,
                strategy,
                generation: 0,
            }),
            blocked_till: AtomicU64::new(NOT_BLOCKED),
            break_duration,
            callbacks,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState<T, E>> {
        self.state.lock().expect(ERR_POISONED_LOCK)
    }

    /// Current state, materialising Open → HalfOpen if the break has elapsed.
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now_millis();
        let mut pending = Vec::new();
        let state = {
            let mut guard = self.lock();
            self.materialise_locked(&mut guard, now, &mut pending)
        };
        self.notify(pending);
        state
    }

    /// Last handled failure since the circuit last closed.
    pub fn last_outcome(&self) -> Option<Outcome<T, E>> {
        self.lock().last_outcome.clone()
    }

    /// Windowed counts for the failure-ratio strategy; `None` for consecutive counting.
    pub fn health_count(&self) -> Option<HealthCount> {
        let now = self.clock.now_millis();
        self.lock().strategy.health_count(now)
    }

    /// Decide whether a call may proceed.
    ///
    /// # Errors
    /// [`ResilienceError::BrokenCircuit`] while open or when another caller already holds the
    /// half-open probe; [`ResilienceError::IsolatedCircuit`] while isolated.
    pub fn pre_execute(&self) -> Result<Admission<'_, T, E>, ResilienceError<E, T>> {
        let now = self.clock.now_millis();
        let mut pending = Vec::new();
        let decision = {
            let mut guard = self.lock();
            match self.materialise_locked(&mut guard, now, &mut pending) {
                CircuitState::Closed => Ok(None),
                CircuitState::HalfOpen => match self.try_claim_probe(now) {
                    Some(previous) => {
                        tracing::debug!(target: "failgate::controller", "half-open probe admitted");
                        Ok(Some(ProbeClaim { previous, generation: guard.generation }))
                    }
                    None => {
                        tracing::debug!(
                            target: "failgate::controller",
                            "call rejected: half-open probe already in flight"
                        );
                        Err(ResilienceError::BrokenCircuit {
                            last_outcome: guard.last_outcome.clone(),
                            retry_after: None,
                        })
                    }
                },
                CircuitState::Open => {
                    let blocked_till = self.blocked_till.load(Ordering::Acquire);
                    let retry_after = Duration::from_millis(blocked_till.saturating_sub(now));
                    tracing::debug!(target: "failgate::controller", ?retry_after, "call rejected: circuit open");
                    Err(ResilienceError::BrokenCircuit {
                        last_outcome: guard.last_outcome.clone(),
                        retry_after: Some(retry_after),
                    })
                }
                CircuitState::Isolated => {
                    tracing::debug!(target: "failgate::controller", "call rejected: circuit isolated");
                    Err(ResilienceError::IsolatedCircuit)
                }
            }
        };
        self.notify(pending);
        decision.map(|claim| Admission { controller: self, claim })
    }

    /// Record a successful (or unhandled-as-failure) outcome.
    pub fn on_success(&self, context: &Context) {
        let now = self.clock.now_millis();
        let mut pending = Vec::new();
        {
            let mut guard = self.lock();
            let stored = guard.circuit_state;
            let verdict = guard.strategy.on_success(stored, now);
            self.apply_locked(&mut guard, verdict, now, context, &mut pending);
        }
        self.notify(pending);
    }

    /// Record a handled failure.
    pub fn on_failure(&self, outcome: Outcome<T, E>, context: &Context) {
        let now = self.clock.now_millis();
        let mut pending = Vec::new();
        {
            let mut guard = self.lock();
            guard.last_outcome = Some(outcome);
            let stored = guard.circuit_state;
            let verdict = guard.strategy.on_failure(stored, now);
            self.apply_locked(&mut guard, verdict, now, context, &mut pending);
        }
        self.notify(pending);
    }

    /// Hold the circuit open until [`reset`](Self::reset), regardless of time.
    pub fn isolate(&self) {
        let context = Context::default();
        let mut pending = Vec::new();
        {
            let mut guard = self.lock();
            guard.last_outcome = Some(Outcome::Isolated);
            guard.generation = guard.generation.wrapping_add(1);
            self.blocked_till.store(BLOCKED_FOREVER, Ordering::Release);
            let prior_state = guard.circuit_state;
            guard.circuit_state = CircuitState::Isolated;
            tracing::warn!(target: "failgate::controller", prior = %prior_state, "circuit breaker isolated");
            pending.push(Notification::Broke(BreakArgs {
                last_outcome: Some(Outcome::Isolated),
                prior_state,
                duration: Duration::MAX,
                half_open_failures: 0,
                context,
            }));
        }
        self.notify(pending);
    }

    /// Close the circuit and clear statistics.
    pub fn reset(&self) {
        self.reset_with_context(&Context::default());
    }

    pub(crate) fn reset_with_context(&self, context: &Context) {
        let mut pending = Vec::new();
        {
            let mut guard = self.lock();
            guard.strategy.on_reset();
            self.close_locked(&mut guard, context, &mut pending);
        }
        self.notify(pending);
    }

    fn materialise_locked(
        &self,
        guard: &mut ControllerState<T, E>,
        now: u64,
        pending: &mut Vec<Notification<T, E>>,
    ) -> CircuitState {
        let blocked_till = self.blocked_till.load(Ordering::Acquire);
        let derived = derive_state(guard.circuit_state, blocked_till, now);
        if derived != guard.circuit_state {
            guard.circuit_state = derived;
            tracing::info!(target: "failgate::controller", "circuit breaker → half-open");
            pending.push(Notification::HalfOpen);
        }
        derived
    }

    /// Swap `blocked_till` to "forever" iff the block has elapsed and nobody claimed it first.
    /// Returns the pre-claim value.
    fn try_claim_probe(&self, now: u64) -> Option<u64> {
        let current = self.blocked_till.load(Ordering::Acquire);
        if current == BLOCKED_FOREVER || now < current {
            return None;
        }
        self.blocked_till
            .compare_exchange(current, BLOCKED_FOREVER, Ordering::AcqRel, Ordering::Acquire)
            .ok()
    }

    /// Give back a probe claim that ended without reporting an outcome.
    ///
    /// A claim taken before the circuit last broke, closed or was isolated no longer owns
    /// `blocked_till` and is discarded.
    fn release_probe(&self, claim: ProbeClaim) {
        let guard = self.lock();
        if guard.circuit_state == CircuitState::HalfOpen
            && guard.generation == claim.generation
            && self
                .blocked_till
                .compare_exchange(BLOCKED_FOREVER, claim.previous, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            tracing::debug!(target: "failgate::controller", "half-open probe released without outcome");
        }
    }

    fn apply_locked(
        &self,
        guard: &mut ControllerState<T, E>,
        verdict: Verdict,
        now: u64,
        context: &Context,
        pending: &mut Vec<Notification<T, E>>,
    ) {
        match verdict {
            Verdict::Hold => {}
            Verdict::Close => self.close_locked(guard, context, pending),
            Verdict::Break { half_open_failures } => {
                let duration = (self.break_duration)(half_open_failures);
                self.open_for_locked(guard, duration, half_open_failures, now, context, pending);
            }
        }
    }

    fn open_for_locked(
        &self,
        guard: &mut ControllerState<T, E>,
        duration: Duration,
        half_open_failures: u32,
        now: u64,
        context: &Context,
        pending: &mut Vec<Notification<T, E>>,
    ) {
        let blocked_till = now.saturating_add(duration_millis(duration)).min(LATEST_BREAK_END);
        self.blocked_till.store(blocked_till, Ordering::Release);
        guard.generation = guard.generation.wrapping_add(1);

        let prior_state = guard.circuit_state;
        guard.circuit_state = CircuitState::Open;

        match prior_state {
            CircuitState::HalfOpen => tracing::warn!(
                target: "failgate::controller",
                half_open_failures,
                break_ms = duration_millis(duration),
                "half-open probe failed → open"
            ),
            _ => tracing::error!(
                target: "failgate::controller",
                prior = %prior_state,
                break_ms = duration_millis(duration),
                "circuit breaker → open"
            ),
        }

        pending.push(Notification::Broke(BreakArgs {
            last_outcome: guard.last_outcome.clone(),
            prior_state,
            duration,
            half_open_failures,
            context: context.clone(),
        }));
    }

    fn close_locked(
        &self,
        guard: &mut ControllerState<T, E>,
        context: &Context,
        pending: &mut Vec<Notification<T, E>>,
    ) {
        self.blocked_till.store(NOT_BLOCKED, Ordering::Release);
        guard.generation = guard.generation.wrapping_add(1);
        guard.last_outcome = None;
        let prior_state = guard.circuit_state;
        guard.circuit_state = CircuitState::Closed;
        if prior_state != CircuitState::Closed {
            tracing::info!(target: "failgate::controller", prior = %prior_state, "circuit breaker → closed");
            pending.push(Notification::Reset(context.clone()));
        }
    }

    fn notify(&self, pending: Vec<Notification<T, E>>) {
        for notification in pending {
            match notification {
                Notification::Broke(args) => {
                    if let Some(on_break) = &self.callbacks.on_break {
                        on_break(&args);
                    }
                }
                Notification::Reset(context) => {
                    if let Some(on_reset) = &self.callbacks.on_reset {
                        on_reset(&context);
                    }
                }
                Notification::HalfOpen => {
                    if let Some(on_half_open) = &self.callbacks.on_half_open {
                        on_half_open();
                    }
                }
            }
        }
    }
}

/// Half-open probe held by an [`Admission`].
#[derive(Debug, Clone, Copy)]
struct ProbeClaim {
    /// `blocked_till` before the claim.
    previous: u64,
    generation: u64,
}

/// Permission to run one call, returned by [`CircuitController::pre_execute`].
///
/// If this admission holds the half-open probe and is dropped without recording an outcome
/// (unhandled error, panic, dropped future), the claim is released so another caller can probe.
#[must_use = "record the call's outcome on the admission"]
pub struct Admission<'a, T, E>
where
    T: Clone,
    E: Clone,
{
    controller: &'a CircuitController<T, E>,
    claim: Option<ProbeClaim>,
}

impl<'a, T, E> Admission<'a, T, E>
where
    T: Clone,
    E: Clone,
{
    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.claim.is_some()
    }

    pub fn record_success(mut self, context: &Context) {
        self.claim = None;
        self.controller.on_success(context);
    }

    pub fn record_failure(mut self, outcome: Outcome<T, E>, context: &Context) {
        self.claim = None;
        self.controller.on_failure(outcome, context);
    }
}

impl<'a, T, E> Drop for Admission<'a, T, E>
where
    T: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if let Some(claim) = self.claim.take() {
            self.controller.release_probe(claim);
        }
    }
}

impl<'a, T, E> fmt::Debug for Admission<'a, T, E>
where
    T: Clone,
    E: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission").field("probe", &self.is_probe()).finish()
    }
}
