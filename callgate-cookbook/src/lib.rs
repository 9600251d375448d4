//! Ready-to-use limiter recipes (“cookbook”) for callgate.
//! Each function returns a controller you can submit calls to straight away.
//! All of them must be called inside a tokio runtime.
//!
//! **Ladder:**
//! - Simple: [`test_environment`], [`production_environment`]
//! - Intermediate: [`watchable_window`], [`observed`]
//! - Advanced: [`guarded_backend`]

use std::time::Duration;

use callgate::telemetry::{MemorySink, MulticastSink};
use callgate::{presets, AdmissionController, ConfigError, LimiterConfig, LogSink};

/// A typical sandbox API: 10 calls per second, one every 100ms, 10 workers.
pub fn test_environment() -> AdmissionController {
    AdmissionController::new(&presets::sandbox())
}

/// A typical production API: 40 calls per second, one every 25ms, 40 workers.
pub fn production_environment() -> AdmissionController {
    AdmissionController::new(&presets::production())
}

/// 50 calls per 5 seconds, one per second. Slow enough to watch every log line.
pub fn watchable_window() -> AdmissionController {
    AdmissionController::new(&presets::burst_window())
}

/// Any config, with events both logged and kept in memory for inspection.
pub fn observed(
    config: &LimiterConfig,
) -> (AdmissionController<MulticastSink<LogSink, MemorySink>>, MemorySink) {
    let memory = MemorySink::new();
    let sink = MulticastSink::new(LogSink, memory.clone());
    (AdmissionController::with_sink(config, sink), memory)
}

/// Limiter for a fragile backend: small quota, strict spacing, few workers,
/// a short queue and a hard per-call timeout.
pub fn guarded_backend(
    calls_per_minute: u32,
    workers: usize,
) -> Result<AdmissionController, ConfigError> {
    let spacing = Duration::from_secs(60) / calls_per_minute.max(1);
    let config = LimiterConfig::builder()
        .call_limit(calls_per_minute)
        .refresh_period(Duration::from_secs(60))
        .min_interval(spacing)
        .max_concurrency(workers)
        .max_queue(workers * 4)
        .call_timeout(Duration::from_secs(10))
        .build()?;
    Ok(AdmissionController::new(&config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recipes_build() {
        assert_eq!(test_environment().limits().min_interval, Duration::from_millis(100));
        assert_eq!(production_environment().executor().max_concurrency(), 40);
        assert_eq!(watchable_window().limits().call_limit, 50);
        assert!(guarded_backend(0, 2).is_err());

        let guarded = guarded_backend(30, 2).unwrap();
        assert_eq!(guarded.limits().min_interval, Duration::from_secs(2));
        assert_eq!(guarded.executor().max_queue(), Some(8));
    }

    #[tokio::test]
    async fn observed_keeps_events() {
        let config = LimiterConfig::new(1, Duration::from_secs(60), Duration::ZERO, 1).unwrap();
        let (limiter, memory) = observed(&config);
        limiter.submit(|| async { Ok::<_, std::io::Error>(()) }).await.await.unwrap();
        assert!(limiter.submit(|| async { Ok::<_, std::io::Error>(()) }).await.is_rejected());
        assert_eq!(memory.count_kind("call_admitted"), 1);
        assert_eq!(memory.count_kind("call_rejected"), 1);
    }
}
