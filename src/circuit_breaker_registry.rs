//! Registry for managing named circuit breakers.
//!
//! Allows operator access (inspection, isolate, reset) to breakers by ID without knowing their
//! result or error types.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::warn;

use crate::controller::{CircuitController, CircuitState};

const ERR_POISONED_LOCK: &str = "circuit breaker registry poisoned";

/// Type-erased manual control over one circuit.
pub trait CircuitControl: Send + Sync {
    fn state(&self) -> CircuitState;
    fn isolate(&self);
    fn reset(&self);
}

impl<T, E> CircuitControl for CircuitController<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn state(&self) -> CircuitState {
        CircuitController::state(self)
    }

    fn isolate(&self) {
        CircuitController::isolate(self);
    }

    fn reset(&self) {
        CircuitController::reset(self);
    }
}

/// Handle to query, isolate or reset a circuit breaker instance.
///
/// Obtained from [`CircuitBreakerPolicy::handle`](crate::CircuitBreakerPolicy::handle); shares
/// state with the policy it came from.
#[derive(Clone)]
pub struct CircuitBreakerHandle {
    control: Arc<dyn CircuitControl>,
}

impl std::fmt::Debug for CircuitBreakerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerHandle").field("state", &self.control.state()).finish()
    }
}

impl CircuitBreakerHandle {
    pub(crate) fn new(control: Arc<dyn CircuitControl>) -> Self {
        Self { control }
    }

    /// Current breaker state.
    pub fn state(&self) -> CircuitState {
        self.control.state()
    }

    /// Hold the circuit open until reset.
    pub fn isolate(&self) {
        self.control.isolate();
    }

    /// Close the circuit, clearing failure statistics.
    pub fn reset(&self) {
        self.control.reset();
    }

    /// Whether both handles drive the same circuit.
    pub fn same_circuit(&self, other: &CircuitBreakerHandle) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.control) as *const u8,
            Arc::as_ptr(&other.control) as *const u8,
        )
    }
}

/// Errors from breaker registries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The requested circuit breaker ID was not found.
    #[error("circuit breaker '{id}' not found")]
    NotFound {
        /// Identifier that could not be located.
        id: String,
    },
}

/// Trait for breaker registries.
pub trait CircuitBreakerRegistry: Send + Sync + std::fmt::Debug {
    /// Register a circuit breaker handle by id, overwriting any existing handle.
    ///
    /// When multiple breakers share an ID the last registration wins; state is replaced, not
    /// merged.
    fn register(&self, id: String, handle: CircuitBreakerHandle);
    /// Get a breaker handle by id.
    fn get(&self, id: &str) -> Option<CircuitBreakerHandle>;
    /// Reset a breaker by id, erroring if missing.
    fn reset(&self, id: &str) -> Result<(), RegistryError>;
    /// Isolate a breaker by id, erroring if missing.
    fn isolate(&self, id: &str) -> Result<(), RegistryError>;
    /// Snapshot breaker states sorted by id.
    fn snapshot(&self) -> Vec<(String, CircuitState)>;
}

/// In-memory implementation backed by an RwLock.
#[derive(Default, Clone, Debug)]
pub struct InMemoryCircuitBreakerRegistry {
    inner: Arc<RwLock<HashMap<String, CircuitBreakerHandle>>>,
}

impl InMemoryCircuitBreakerRegistry {
    fn lookup(&self, id: &str) -> Result<CircuitBreakerHandle, RegistryError> {
        self.get(id).ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }
}

impl CircuitBreakerRegistry for InMemoryCircuitBreakerRegistry {
    fn register(&self, id: String, handle: CircuitBreakerHandle) {
        let mut map = self.inner.write().expect(ERR_POISONED_LOCK);
        if map.contains_key(&id) {
            warn!(target: "failgate::circuit_breaker_registry", id = %id, "circuit breaker id replaced; last registration wins");
        }
        map.insert(id, handle);
    }

    fn get(&self, id: &str) -> Option<CircuitBreakerHandle> {
        let guard = self.inner.read().expect(ERR_POISONED_LOCK);
        guard.get(id).cloned()
    }

    // The map lock is released before touching the breaker so its callbacks may use the registry.
    fn reset(&self, id: &str) -> Result<(), RegistryError> {
        self.lookup(id)?.reset();
        Ok(())
    }

    fn isolate(&self, id: &str) -> Result<(), RegistryError> {
        self.lookup(id)?.isolate();
        Ok(())
    }

    fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let handles: Vec<(String, CircuitBreakerHandle)> = {
            let map = self.inner.read().expect(ERR_POISONED_LOCK);
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut entries: Vec<(String, CircuitState)> =
            handles.into_iter().map(|(k, v)| (k, v.state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
