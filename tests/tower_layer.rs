#![allow(missing_docs)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::test_helpers::TestError;
use failgate::{CircuitBreakerLayer, CircuitBreakerPolicy, CircuitState, ManualClock};
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[tokio::test]
async fn services_from_one_layer_share_the_circuit() {
    let clock = ManualClock::new();
    let policy = CircuitBreakerPolicy::<u16, TestError>::builder()
        .consecutive_failures(2)
        .handle_result(|status| *status >= 500)
        .break_duration(Duration::from_secs(5))
        .with_clock(clock.clone())
        .build()
        .expect("valid circuit breaker");
    let layer = CircuitBreakerLayer::new(policy.clone());

    let calls = Arc::new(AtomicUsize::new(0));
    let make_svc = |status: u16| {
        let calls = calls.clone();
        ServiceBuilder::new().layer(layer.clone()).service(service_fn(move |_req: &'static str| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, TestError>(status) }
        }))
    };

    let failing = make_svc(503);
    let healthy = make_svc(200);

    for _ in 0..2 {
        let status = failing.clone().oneshot("GET /").await.expect("handled result is returned");
        assert_eq!(status, 503);
    }
    assert_eq!(policy.state(), CircuitState::Open);

    let err = healthy.clone().oneshot("GET /").await.expect_err("shared circuit is open");
    assert!(err.is_broken_circuit());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    clock.advance(Duration::from_secs(5));
    assert_eq!(healthy.clone().oneshot("GET /").await.expect("probe succeeds"), 200);
    assert_eq!(policy.state(), CircuitState::Closed);
}

#[tokio::test]
async fn inner_errors_pass_through_unchanged() {
    let policy = CircuitBreakerPolicy::<(), TestError>::builder()
        .handle_error(|e| e.0 == "transient")
        .consecutive_failures(1)
        .build()
        .expect("valid circuit breaker");
    let svc = ServiceBuilder::new()
        .layer(CircuitBreakerLayer::new(policy.clone()))
        .service(service_fn(|_req: ()| async { Err::<(), _>(TestError("fatal".into())) }));

    let err = svc.oneshot(()).await.expect_err("inner error");
    assert_eq!(err.into_inner(), Some(TestError("fatal".into())));
    assert_eq!(policy.state(), CircuitState::Closed, "unhandled errors do not count");
}
