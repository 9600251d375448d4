//! Convenient re-exports for common callgate types.
pub use crate::{
    admission::AdmissionController,
    config::{ConfigError, LimiterConfig, LimiterConfigBuilder, QuotaLimits},
    executor::BoundedExecutor,
    handle::{as_completed, await_all, CallHandle, CallId, CallResult, CallState},
    middleware::{AdmissionLayer, AdmissionService},
    quota::QuotaSnapshot,
    telemetry::{LimiterEvent, LogSink, MemorySink, NullSink, TelemetrySink},
    LimiterError,
};
