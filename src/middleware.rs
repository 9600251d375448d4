//! Tower integration: put an [`AdmissionController`] in front of any service.

use crate::admission::AdmissionController;
use crate::telemetry::{LogSink, TelemetrySink};
use crate::LimiterError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// A layer that routes every request through an [`AdmissionController`].
#[derive(Clone, Debug)]
pub struct AdmissionLayer<K = LogSink> {
    controller: AdmissionController<K>,
}

impl<K> AdmissionLayer<K> {
    /// Create a layer sharing `controller`'s quota and workers.
    pub fn new(controller: AdmissionController<K>) -> Self {
        Self { controller }
    }
}

impl<S, K: Clone> Layer<S> for AdmissionLayer<K> {
    type Service = AdmissionService<S, K>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, controller: self.controller.clone() }
    }
}

/// Middleware service that admits, rejects and schedules requests.
///
/// Each admitted request runs on the controller's executor against a clone of
/// the inner service. Rejections surface as
/// [`LimiterError::RateLimitExceeded`]; inner failures as
/// [`LimiterError::Inner`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S, K = LogSink> {
    inner: S,
    controller: AdmissionController<K>,
}

impl<S, K, Req> Service<Req> for AdmissionService<S, K>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    K: TelemetrySink,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = LimiterError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Inner readiness is awaited on the worker, once the request is admitted.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let controller = self.controller.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            let handle = controller.submit(move || inner.oneshot(req)).await;
            handle.await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use crate::telemetry::NullSink;
    use std::time::Duration;
    use tower::service_fn;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn controller(call_limit: u32) -> AdmissionController<NullSink> {
        let config =
            LimiterConfig::new(call_limit, Duration::from_secs(60), Duration::ZERO, 2).unwrap();
        AdmissionController::with_sink(&config, NullSink)
    }

    #[tokio::test]
    async fn passes_admitted_requests_through() {
        let svc = AdmissionLayer::new(controller(5))
            .layer(service_fn(|x: u32| async move { Ok::<_, TestError>(x * 2) }));

        assert_eq!(svc.oneshot(21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn rejects_past_the_quota() {
        let mut svc = AdmissionLayer::new(controller(1))
            .layer(service_fn(|x: u32| async move { Ok::<_, TestError>(x) }));

        assert_eq!(svc.ready().await.unwrap().call(1).await.unwrap(), 1);
        let err = svc.ready().await.unwrap().call(2).await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn inner_errors_are_wrapped() {
        let svc = AdmissionLayer::new(controller(5))
            .layer(service_fn(|_: ()| async { Err::<(), _>(TestError("backend")) }));

        let err = svc.oneshot(()).await.unwrap_err();
        assert_eq!(err.into_inner(), Some(TestError("backend")));
    }
}
