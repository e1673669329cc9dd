//! Per-call execution context.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context flowing through one execution and into the `on_break` / `on_reset` callbacks.
///
/// Cloning is cheap; the cancellation token is shared between clones.
#[derive(Debug, Clone)]
pub struct Context {
    operation_key: Option<String>,
    correlation_id: Uuid,
    cancellation: Option<CancellationToken>,
}

impl Default for Context {
    fn default() -> Self {
        Self { operation_key: None, correlation_id: Uuid::new_v4(), cancellation: None }
    }
}

impl Context {
    /// Fresh context with a random correlation id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag the call with a caller-chosen operation key.
    pub fn with_operation_key(mut self, key: impl Into<String>) -> Self {
        self.operation_key = Some(key.into());
        self
    }

    /// Abort before execution if `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn operation_key(&self) -> Option<&str> {
        self.operation_key.as_deref()
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Whether the attached token (if any) has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}
