mod common;

use callgate::telemetry::MemorySink;
use callgate::{AdmissionController, AdmissionLayer, LimiterConfig, LimiterError};
use common::test_helpers::TestError;
use std::time::Duration;
use tower::{service_fn, Layer, ServiceBuilder, ServiceExt};

fn limiter(call_limit: u32, min_interval: Duration) -> AdmissionController<MemorySink> {
    let config = LimiterConfig::builder()
        .call_limit(call_limit)
        .refresh_period(Duration::from_secs(10))
        .min_interval(min_interval)
        .max_concurrency(2)
        .build()
        .unwrap();
    AdmissionController::with_sink(&config, MemorySink::new())
}

#[tokio::test(start_paused = true)]
async fn layer_spaces_and_caps_requests() {
    let limiter = limiter(3, Duration::from_millis(200));
    let svc = ServiceBuilder::new()
        .layer(AdmissionLayer::new(limiter.clone()))
        .service(service_fn(|x: u32| async move { Ok::<_, TestError>(x + 1) }));

    let started = tokio::time::Instant::now();
    let mut outcomes = Vec::new();
    for x in 0..5 {
        outcomes.push(svc.clone().oneshot(x).await);
    }

    assert_eq!(outcomes[0].as_ref().unwrap(), &1);
    assert_eq!(outcomes[2].as_ref().unwrap(), &3);
    assert!(matches!(outcomes[3], Err(LimiterError::RateLimitExceeded { limit: 3, .. })));
    assert!(outcomes[4].as_ref().unwrap_err().is_rate_limited());
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(limiter.sink().count_kind("call_rejected"), 2);
}

#[tokio::test]
async fn inner_service_errors_are_not_rejections() {
    let limiter = limiter(5, Duration::ZERO);
    let svc = AdmissionLayer::new(limiter)
        .layer(service_fn(|_: ()| async { Err::<(), _>(TestError("503".into())) }));

    let err = svc.oneshot(()).await.unwrap_err();
    assert!(!err.is_rejected());
    assert_eq!(err.into_inner(), Some(TestError("503".into())));
}
