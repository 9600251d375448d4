use crate::handle::CallId;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Events emitted by the admission controller and the bounded executor.
#[derive(Debug, Clone, PartialEq)]
pub enum LimiterEvent {
    /// Quota and spacing decisions.
    Admission(AdmissionEvent),
    /// Worker slot activity.
    Executor(ExecutorEvent),
}

/// Events emitted while deciding whether a submission may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// The quota window expired and was reset before a decision.
    WindowRefreshed {
        /// Calls admitted by the window that just ended.
        previous_calls: u32,
        refresh_period: Duration,
    },
    /// A call was admitted and handed to the executor.
    Admitted {
        call_id: CallId,
        /// Time since the controller was created.
        elapsed: Duration,
        /// Time the submission spent on the spacing gate.
        waited: Duration,
        /// Calls admitted in the current window, this one included.
        calls_in_window: u32,
        limit: u32,
    },
    /// A call was turned away because the window is full.
    Rejected {
        call_id: CallId,
        limit: u32,
        refresh_period: Duration,
        /// Time until the window refreshes.
        retry_after: Duration,
    },
}

/// Events emitted by the bounded executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorEvent {
    /// A call acquired a worker slot.
    Started {
        call_id: CallId,
        /// Slots in use, this one included.
        active: usize,
        max_concurrency: usize,
    },
    /// A call released its worker slot.
    Completed {
        call_id: CallId,
        /// Time spent running.
        duration: Duration,
        succeeded: bool,
    },
}

impl LimiterEvent {
    /// Short machine-friendly name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LimiterEvent::Admission(AdmissionEvent::WindowRefreshed { .. }) => "window_refreshed",
            LimiterEvent::Admission(AdmissionEvent::Admitted { .. }) => "call_admitted",
            LimiterEvent::Admission(AdmissionEvent::Rejected { .. }) => "call_rejected",
            LimiterEvent::Executor(ExecutorEvent::Started { .. }) => "call_started",
            LimiterEvent::Executor(ExecutorEvent::Completed { .. }) => "call_completed",
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, LimiterEvent::Admission(AdmissionEvent::Rejected { .. }))
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admission(event) => write!(f, "{}", event),
            LimiterEvent::Executor(event) => write!(f, "{}", event),
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::WindowRefreshed { previous_calls, refresh_period } => write!(
                f,
                "limiter refresh reached: window of {:?} closed after {} calls",
                refresh_period, previous_calls
            ),
            AdmissionEvent::Admitted { call_id, elapsed, waited, calls_in_window, limit } => {
                write!(
                    f,
                    "call #{} sent after {:.3}s (waited {:?}, {}/{} in window)",
                    call_id,
                    elapsed.as_secs_f64(),
                    waited,
                    calls_in_window,
                    limit
                )
            }
            AdmissionEvent::Rejected { call_id, limit, refresh_period, retry_after } => write!(
                f,
                "limit of {} calls reached within {:?}; rejecting call #{} (refresh in {:?})",
                limit, refresh_period, call_id, retry_after
            ),
        }
    }
}

impl fmt::Display for ExecutorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorEvent::Started { call_id, active, max_concurrency } => {
                write!(f, "call #{} running ({}/{} slots)", call_id, active, max_concurrency)
            }
            ExecutorEvent::Completed { call_id, duration, succeeded } => write!(
                f,
                "call #{} {} after {:?}",
                call_id,
                if *succeeded { "succeeded" } else { "failed" },
                duration
            ),
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a LimiterEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &LimiterEvent) -> serde_json::Value {
    let kind = event.kind();
    match event {
        LimiterEvent::Admission(a) => match a {
            AdmissionEvent::WindowRefreshed { previous_calls, refresh_period } => json!({
                "kind": kind,
                "previous_calls": *previous_calls,
                "refresh_ms": clamp_u64(refresh_period.as_millis()),
            }),
            AdmissionEvent::Admitted { call_id, elapsed, waited, calls_in_window, limit } => {
                json!({
                    "kind": kind,
                    "call_id": *call_id,
                    "elapsed_ms": clamp_u64(elapsed.as_millis()),
                    "waited_ms": clamp_u64(waited.as_millis()),
                    "calls_in_window": *calls_in_window,
                    "limit": *limit,
                })
            }
            AdmissionEvent::Rejected { call_id, limit, refresh_period, retry_after } => json!({
                "kind": kind,
                "call_id": *call_id,
                "limit": *limit,
                "refresh_ms": clamp_u64(refresh_period.as_millis()),
                "retry_after_ms": clamp_u64(retry_after.as_millis()),
            }),
        },
        LimiterEvent::Executor(e) => match e {
            ExecutorEvent::Started { call_id, active, max_concurrency } => json!({
                "kind": kind,
                "call_id": *call_id,
                "active": *active,
                "max": *max_concurrency,
            }),
            ExecutorEvent::Completed { call_id, duration, succeeded } => json!({
                "kind": kind,
                "call_id": *call_id,
                "duration_ms": clamp_u64(duration.as_millis()),
                "succeeded": *succeeded,
            }),
        },
    }
}
