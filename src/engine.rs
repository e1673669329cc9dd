//! Execution engine: admission → operation → outcome report.
//!
//! Stateless; the sync and async variants differ only in how the operation is invoked. The
//! controller lock is never held while the operation runs.

use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::controller::{Admission, CircuitController};
use crate::error::{Outcome, ResilienceError};

pub(crate) type ErrorPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
pub(crate) type ResultPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Which outcomes count as handled failures.
pub(crate) struct Predicates<T, E> {
    pub(crate) handle_error: ErrorPredicate<E>,
    pub(crate) handle_result: ResultPredicate<T>,
}

impl<T: 'static, E: 'static> Default for Predicates<T, E> {
    fn default() -> Self {
        Self { handle_error: Arc::new(|_: &E| true), handle_result: Arc::new(|_: &T| false) }
    }
}

impl<T, E> Clone for Predicates<T, E> {
    fn clone(&self) -> Self {
        Self { handle_error: self.handle_error.clone(), handle_result: self.handle_result.clone() }
    }
}

pub(crate) fn execute_sync<T, E, Op>(
    controller: &CircuitController<T, E>,
    predicates: &Predicates<T, E>,
    context: &Context,
    operation: Op,
) -> Result<T, ResilienceError<E, T>>
where
    T: Clone,
    E: Clone,
    Op: FnOnce() -> Result<T, E>,
{
    if context.is_cancelled() {
        return Err(ResilienceError::Cancelled);
    }
    let admission = controller.pre_execute()?;
    settle(admission, predicates, context, operation())
}

pub(crate) async fn execute_async<T, E, Fut, Op>(
    controller: &CircuitController<T, E>,
    predicates: &Predicates<T, E>,
    context: &Context,
    operation: Op,
) -> Result<T, ResilienceError<E, T>>
where
    T: Clone,
    E: Clone,
    Fut: Future<Output = Result<T, E>>,
    Op: FnOnce() -> Fut,
{
    if context.is_cancelled() {
        return Err(ResilienceError::Cancelled);
    }
    let admission = controller.pre_execute()?;
    let result = operation().await;
    settle(admission, predicates, context, result)
}

/// Classify the outcome and report it. Unhandled errors are returned without being reported;
/// dropping the admission gives back a half-open probe claim if it held one.
fn settle<T, E>(
    admission: Admission<'_, T, E>,
    predicates: &Predicates<T, E>,
    context: &Context,
    result: Result<T, E>,
) -> Result<T, ResilienceError<E, T>>
where
    T: Clone,
    E: Clone,
{
    match result {
        Ok(value) => {
            if (predicates.handle_result)(&value) {
                admission.record_failure(Outcome::Result(value.clone()), context);
            } else {
                admission.record_success(context);
            }
            Ok(value)
        }
        Err(error) => {
            if (predicates.handle_error)(&error) {
                admission.record_failure(Outcome::Error(error.clone()), context);
            } else {
                drop(admission);
            }
            Err(ResilienceError::Inner(error))
        }
    }
}
