//! Ready-made limiter configurations.
//!
//! ## Quick Start
//!
//! ```rust
//! use callgate::{presets, AdmissionController};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = AdmissionController::new(&presets::sandbox());
//!     let handle = limiter.submit(|| async { Ok::<_, std::io::Error>("pong") }).await;
//!     assert_eq!(handle.await.unwrap(), "pong");
//! }
//! ```
//!
//! ## Available Presets
//!
//! - [`defaults`]: 1000 calls per hour, 500ms spacing, 10 workers, unbounded queue
//! - [`sandbox`]: test-environment API, 10 calls per second, 10 workers, queue of 100
//! - [`production`]: production API, 40 calls per second, 40 workers, queue of 100
//! - [`burst_window`]: 50 calls per 5s window with 1s spacing

use crate::config::{LimiterConfig, QuotaLimits};
use std::time::Duration;

const SANDBOX_CALLS_PER_SECOND: u32 = 10;
const SANDBOX_WORKERS: usize = 10;

const PRODUCTION_CALLS_PER_SECOND: u32 = 40;
const PRODUCTION_WORKERS: usize = 40;

const PRESET_QUEUE: usize = 100;

const BURST_CALL_LIMIT: u32 = 50;
const BURST_WINDOW_SECS: u64 = 5;
const BURST_SPACING_SECS: u64 = 1;
const BURST_WORKERS: usize = 10;

/// The documented defaults.
pub fn defaults() -> LimiterConfig {
    LimiterConfig::default()
}

/// Spacing-driven limits for a test-environment API allowing 10 calls per second.
pub fn sandbox() -> LimiterConfig {
    per_second(SANDBOX_CALLS_PER_SECOND, SANDBOX_WORKERS)
}

/// Spacing-driven limits for a production API allowing 40 calls per second.
pub fn production() -> LimiterConfig {
    per_second(PRODUCTION_CALLS_PER_SECOND, PRODUCTION_WORKERS)
}

/// A short window that is easy to watch refresh: 50 calls per 5 seconds,
/// one call per second.
pub fn burst_window() -> LimiterConfig {
    let limits = QuotaLimits::new(
        BURST_CALL_LIMIT,
        Duration::from_secs(BURST_WINDOW_SECS),
        Duration::from_secs(BURST_SPACING_SECS),
    );
    LimiterConfig::from_parts(limits, BURST_WORKERS, None, None)
}

fn per_second(calls_per_second: u32, workers: usize) -> LimiterConfig {
    let spacing = Duration::from_secs(1) / calls_per_second;
    let limits = QuotaLimits::new(calls_per_second, Duration::from_secs(1), spacing);
    LimiterConfig::from_parts(limits, workers, Some(PRESET_QUEUE), None)
}
