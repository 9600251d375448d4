//! Quota window and spacing gate state machines.
//!
//! These types are plain data driven by explicit timestamps (offsets from the
//! origin of a [`Clock`](crate::Clock), kept at full `Duration` precision). They hold no locks; the
//! [`AdmissionController`](crate::AdmissionController) keeps both behind a
//! single mutex so that a spacing check, a window refresh and a quota
//! increment form one atomic decision.
//!
//! Invariants:
//! - a window whose age is `>= refresh_period` is refreshed before any decision;
//! - `call_count` never passes `call_limit`; a call that does not fit is rejected
//!   and only tallied in `rejected_count`;
//! - admissions recorded by [`SpacingGate::record`] are never closer than
//!   `min_interval` as long as callers wait for [`SpacingGate::wait_time`] first.

use crate::config::QuotaLimits;
use std::time::Duration;

/// Current rate-limiting epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaWindow {
    window_start: Duration,
    call_count: u32,
    rejected_count: u32,
}

/// Outcome of one quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The call fits; `calls_in_window` includes it.
    Admit { calls_in_window: u32 },
    /// The window is full.
    Reject { retry_after: Duration },
}

impl AdmissionDecision {
    pub fn is_admit(&self) -> bool {
        matches!(self, AdmissionDecision::Admit { .. })
    }
}

impl QuotaWindow {
    /// Open a fresh window at `now`.
    pub fn new(now: Duration) -> Self {
        Self { window_start: now, call_count: 0, rejected_count: 0 }
    }

    pub fn window_start(&self) -> Duration {
        self.window_start
    }

    pub fn call_count(&self) -> u32 {
        self.call_count
    }

    pub fn rejected_count(&self) -> u32 {
        self.rejected_count
    }

    /// Reset the window in place if it is at least `refresh_period` old.
    ///
    /// Returns the number of calls the expired window admitted.
    pub fn refresh_if_elapsed(&mut self, now: Duration, refresh_period: Duration) -> Option<u32> {
        if now.saturating_sub(self.window_start) < refresh_period {
            return None;
        }
        let previous = self.call_count;
        self.window_start = now;
        self.call_count = 0;
        self.rejected_count = 0;
        Some(previous)
    }

    /// Count one call against `call_limit`, admitting it only if it fits.
    pub fn try_admit(&mut self, now: Duration, limits: &QuotaLimits) -> AdmissionDecision {
        if self.call_count < limits.call_limit {
            self.call_count += 1;
            AdmissionDecision::Admit { calls_in_window: self.call_count }
        } else {
            self.rejected_count = self.rejected_count.saturating_add(1);
            AdmissionDecision::Reject { retry_after: self.remaining(now, limits.refresh_period) }
        }
    }

    /// Hand back an admission the executor refused to take.
    pub fn revoke(&mut self) {
        self.call_count = self.call_count.saturating_sub(1);
    }

    /// Time left until the window refreshes.
    pub fn remaining(&self, now: Duration, refresh_period: Duration) -> Duration {
        refresh_period.saturating_sub(now.saturating_sub(self.window_start))
    }
}

/// Minimum-interval throttle between successive admissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpacingGate {
    last_admission: Option<Duration>,
}

impl SpacingGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_admission(&self) -> Option<Duration> {
        self.last_admission
    }

    /// How long a submission arriving at `now` must wait before it may be admitted.
    pub fn wait_time(&self, now: Duration, min_interval: Duration) -> Duration {
        match self.last_admission {
            None => Duration::ZERO,
            Some(last) => min_interval.saturating_sub(now.saturating_sub(last)),
        }
    }

    pub fn record(&mut self, now: Duration) {
        self.last_admission = Some(now);
    }
}

/// Point-in-time view of a controller's quota and worker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub limits: QuotaLimits,
    /// Calls admitted in the current window.
    pub calls_in_window: u32,
    /// Calls rejected in the current window.
    pub rejected_in_window: u32,
    /// Time until the window refreshes.
    pub window_remaining: Duration,
    /// Clock reading of the most recent admission, if any.
    pub last_admission: Option<Duration>,
    /// Operations currently holding a worker slot.
    pub active: usize,
    /// Admitted operations waiting for a worker slot.
    pub queued: usize,
}
