#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # callgate
//!
//! Admission control for outbound calls to a rate-limited API: a per-window
//! call quota, a minimum spacing between calls, and a bounded worker pool
//! that runs what gets admitted.
//!
//! ## Features
//!
//! - **Quota windows**: at most `call_limit` admissions per `refresh_period`;
//!   over-quota calls are rejected immediately, never queued or retried
//! - **Spacing gate**: consecutive admissions are at least `min_interval` apart
//! - **Bounded executor**: at most `max_concurrency` calls run at once, FIFO slot hand-off
//! - **Call handles** that capture success, downstream failure, panics and timeouts per call
//! - **Telemetry** through tower `Service` sinks, with `tracing` logging by default
//! - **Tower middleware** to put the limiter in front of any service
//!
//! ## Quick Start
//!
//! ```rust
//! use callgate::{await_all, AdmissionController, LimiterConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LimiterConfig::builder()
//!         .call_limit(50)
//!         .refresh_period(Duration::from_secs(5))
//!         .min_interval(Duration::from_millis(10))
//!         .max_concurrency(4)
//!         .build()
//!         .unwrap();
//!     let limiter = AdmissionController::new(&config);
//!
//!     let mut handles = Vec::new();
//!     for i in 0..3u32 {
//!         handles.push(limiter.submit(move || async move { Ok::<_, std::io::Error>(i * 2) }).await);
//!     }
//!
//!     for result in await_all(handles).await {
//!         println!("{:?}", result);
//!     }
//! }
//! ```

pub mod adaptive;
pub mod admission;
pub mod config;
pub mod error;
pub mod executor;
pub mod handle;
pub mod middleware;
pub mod presets;
pub mod quota;
pub mod time;

pub mod prelude;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use admission::AdmissionController;
pub use config::{ConfigError, LimiterConfig, LimiterConfigBuilder, QuotaLimits};
pub use error::LimiterError;
pub use executor::BoundedExecutor;
pub use handle::{as_completed, await_all, CallHandle, CallId, CallResult, CallState};
pub use middleware::{AdmissionLayer, AdmissionService};
pub use quota::{AdmissionDecision, QuotaSnapshot, QuotaWindow, SpacingGate};
pub use telemetry::{
    AdmissionEvent, ExecutorEvent, LimiterEvent, LogSink, MemorySink, NullSink, TelemetrySink,
};
pub use time::{
    Clock, ClockSleeper, InstantSleeper, ManualClock, MonotonicClock, Sleeper, TokioSleeper,
    TrackingSleeper,
};
