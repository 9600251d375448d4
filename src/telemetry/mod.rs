//! Telemetry and observability for the limiter.
//!
//! The controller and executor describe what they do as [`LimiterEvent`]s and
//! hand them to a [`TelemetrySink`]. Any cloneable
//! `tower::Service<LimiterEvent>` is a sink.
//!
//! # Event Types
//!
//! - **Admission**: `WindowRefreshed`, `Admitted`, `Rejected`
//! - **Executor**: `Started`, `Completed`
//!
//! The default sink is [`LogSink`], which turns every event into one
//! human-readable `tracing` line. Tests usually attach a [`MemorySink`].

pub mod events;
pub mod sinks;

pub use events::{AdmissionEvent, ExecutorEvent, LimiterEvent};
#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use sinks::{
    emit_best_effort, ComposedSinkError, LogSink, MemorySink, MulticastSink, NonBlockingSink,
    NullSink, StreamingSink, TelemetrySink,
};
