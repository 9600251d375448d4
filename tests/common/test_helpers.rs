use callgate::telemetry::MemorySink;
use callgate::time::{ClockSleeper, ManualClock};
use callgate::{AdmissionController, LimiterConfig};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError(pub String);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestError: {}", self.0)
    }
}

impl std::error::Error for TestError {}

/// Controller on a manual clock whose spacing waits advance that same clock.
pub fn manual_controller(
    call_limit: u32,
    refresh_period: Duration,
    min_interval: Duration,
    max_concurrency: usize,
) -> (AdmissionController<MemorySink>, ManualClock, MemorySink) {
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let config =
        LimiterConfig::new(call_limit, refresh_period, min_interval, max_concurrency).unwrap();
    let controller = AdmissionController::with_sink(&config, sink.clone())
        .with_clock(clock.clone())
        .with_sleeper(ClockSleeper::new(clock.clone()));
    (controller, clock, sink)
}
