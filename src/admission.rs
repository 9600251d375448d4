//! Admission controller: spacing gate + quota window in front of a
//! [`BoundedExecutor`].
//!
//! Every submission goes through one serialized critical section that
//!
//! 1. waits out the rest of `min_interval` since the previous admission,
//! 2. refreshes the quota window if it is at least `refresh_period` old,
//! 3. admits the call if the window still has room, otherwise rejects it.
//!
//! Admitted calls are handed to the executor and run concurrently; rejected
//! calls come back as handles already resolved with
//! [`LimiterError::RateLimitExceeded`]. The lock is a `tokio::sync::Mutex`, so
//! submitters are served in arrival order and the spacing wait suspends only
//! the submitting task. The lock is never held while an operation runs.

use crate::adaptive::DynamicConfig;
use crate::config::{ConfigError, LimiterConfig, QuotaLimits};
use crate::executor::BoundedExecutor;
use crate::handle::{CallHandle, CallId};
use crate::quota::{AdmissionDecision, QuotaSnapshot, QuotaWindow, SpacingGate};
use crate::telemetry::{AdmissionEvent, LimiterEvent, LogSink, TelemetrySink};
use crate::time::{Clock, MonotonicClock, Sleeper, TokioSleeper};
use crate::LimiterError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug)]
struct GateState {
    window: QuotaWindow,
    spacing: SpacingGate,
}

impl GateState {
    fn new(now: Duration) -> Self {
        Self { window: QuotaWindow::new(now), spacing: SpacingGate::new() }
    }
}

/// Rate limiter that admits or rejects calls and runs admitted ones on a
/// bounded worker pool.
///
/// Clones share quota state, executor and sink.
///
/// # Examples
/// ```
/// use callgate::AdmissionController;
/// use std::time::Duration;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter =
///     AdmissionController::configure(10, Duration::from_secs(1), Duration::ZERO, 4).unwrap();
/// let handle = limiter.submit(|| async { Ok::<_, std::io::Error>(42) }).await;
/// assert_eq!(handle.await.unwrap(), 42);
/// # }
/// ```
pub struct AdmissionController<K = LogSink> {
    limits: DynamicConfig<QuotaLimits>,
    state: Arc<Mutex<GateState>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    executor: BoundedExecutor<K>,
    sink: K,
    started_at: Duration,
    next_id: Arc<AtomicU64>,
}

impl<K: Clone> Clone for AdmissionController<K> {
    fn clone(&self) -> Self {
        Self {
            limits: self.limits.clone(),
            state: self.state.clone(),
            clock: self.clock.clone(),
            sleeper: self.sleeper.clone(),
            executor: self.executor.clone(),
            sink: self.sink.clone(),
            started_at: self.started_at,
            next_id: self.next_id.clone(),
        }
    }
}

impl<K> fmt::Debug for AdmissionController<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("limits", &*self.limits.get())
            .field("clock", &self.clock)
            .field("sleeper", &self.sleeper)
            .field("executor", &self.executor)
            .finish()
    }
}

impl AdmissionController<LogSink> {
    /// Build a controller from the four core knobs; queue unbounded, no call timeout.
    ///
    /// Errors if `call_limit`, `refresh_period` or `max_concurrency` is zero.
    pub fn configure(
        call_limit: u32,
        refresh_period: Duration,
        min_interval: Duration,
        max_concurrency: usize,
    ) -> Result<Self, ConfigError> {
        let config =
            LimiterConfig::new(call_limit, refresh_period, min_interval, max_concurrency)?;
        Ok(Self::new(&config))
    }

    /// Build a controller that logs through [`LogSink`].
    pub fn new(config: &LimiterConfig) -> Self {
        Self::with_sink(config, LogSink)
    }
}

impl<K: TelemetrySink> AdmissionController<K> {
    /// Build a controller reporting admission and executor events to `sink`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn with_sink(config: &LimiterConfig, sink: K) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
        let now = clock.now();
        Self {
            limits: DynamicConfig::new(config.limits()),
            state: Arc::new(Mutex::new(GateState::new(now))),
            clock,
            sleeper: Arc::new(TokioSleeper),
            executor: BoundedExecutor::with_sink(config, sink.clone()),
            sink,
            started_at: now,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Replace the clock. The quota window restarts at the new clock's reading,
    /// so call this before submitting anything.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        let now = clock.now();
        self.clock = Arc::new(clock);
        self.state = Arc::new(Mutex::new(GateState::new(now)));
        self.started_at = now;
        self
    }

    /// Replace how the spacing gate waits.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Submit `operation` for admission.
    ///
    /// Suspends while the spacing gate is closed. Returns a handle that is
    /// either running/queued on the executor or already terminal with
    /// [`LimiterError::RateLimitExceeded`]. A rejected call is never retried
    /// or queued. Dropping this future while it waits on the spacing gate
    /// leaves the limiter untouched.
    pub async fn submit<T, E, F, Fut>(&self, operation: F) -> CallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.admit(move |executor, id| executor.dispatch_as(id, operation)).await
    }

    /// Submit `operation(args)` for admission.
    pub async fn submit_with<A, T, E, F, Fut>(&self, operation: F, args: A) -> CallHandle<T, E>
    where
        A: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.submit(move || operation(args)).await
    }

    /// Submit a synchronous operation; once admitted it runs on tokio's blocking pool.
    pub async fn submit_blocking<T, E, F>(&self, operation: F) -> CallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.admit(move |executor, id| executor.dispatch_blocking_as(id, operation)).await
    }

    async fn admit<T, E, D>(&self, dispatch: D) -> CallHandle<T, E>
    where
        D: FnOnce(&BoundedExecutor<K>, CallId) -> CallHandle<T, E> + Send,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.executor.is_shutdown() {
            return CallHandle::resolved(id, Err(LimiterError::Shutdown));
        }

        let mut events = Vec::with_capacity(2);
        let handle = {
            let mut gate = self.state.lock().await;

            let arrived = self.clock.now();
            let wait = gate.spacing.wait_time(arrived, self.limits.get().min_interval);
            if !wait.is_zero() {
                tracing::trace!(call_id = id, ?wait, "waiting on spacing gate");
                self.sleeper.sleep(wait).await;
                if self.executor.is_shutdown() {
                    return CallHandle::resolved(id, Err(LimiterError::Shutdown));
                }
            }

            let limits = self.limits.get();
            let now = self.clock.now();
            if let Some(previous_calls) = gate.window.refresh_if_elapsed(now, limits.refresh_period)
            {
                events.push(AdmissionEvent::WindowRefreshed {
                    previous_calls,
                    refresh_period: limits.refresh_period,
                });
            }

            match gate.window.try_admit(now, &limits) {
                AdmissionDecision::Admit { calls_in_window } => {
                    let handle = dispatch(&self.executor, id);
                    if handle.is_rejected() {
                        // Shutdown or a full queue: the call never runs, so it does not count.
                        gate.window.revoke();
                        tracing::debug!(call_id = id, "executor refused admitted call");
                    } else {
                        gate.spacing.record(now);
                        events.push(AdmissionEvent::Admitted {
                            call_id: id,
                            elapsed: now.saturating_sub(self.started_at),
                            waited: now.saturating_sub(arrived),
                            calls_in_window,
                            limit: limits.call_limit,
                        });
                    }
                    handle
                }
                AdmissionDecision::Reject { retry_after } => {
                    events.push(AdmissionEvent::Rejected {
                        call_id: id,
                        limit: limits.call_limit,
                        refresh_period: limits.refresh_period,
                        retry_after,
                    });
                    CallHandle::resolved(
                        id,
                        Err(LimiterError::RateLimitExceeded {
                            limit: limits.call_limit,
                            window: limits.refresh_period,
                            retry_after,
                        }),
                    )
                }
            }
        };

        for event in events {
            self.sink.emit(LimiterEvent::Admission(event)).await;
        }
        handle
    }

    /// Swap call limit, refresh period and spacing while running.
    ///
    /// The current window keeps its start time and count; the new limits
    /// apply from the next admission decision.
    pub fn reconfigure(&self, limits: QuotaLimits) -> Result<(), ConfigError> {
        limits.validate()?;
        let previous = self.limits.replace(limits);
        tracing::info!(
            call_limit = limits.call_limit,
            refresh_period = ?limits.refresh_period,
            min_interval = ?limits.min_interval,
            previous_call_limit = previous.call_limit,
            "limiter reconfigured"
        );
        Ok(())
    }

    /// Current quota usage and executor load.
    ///
    /// Waits for any in-progress admission decision. A window that has
    /// expired but not yet been refreshed is reported as already refreshed.
    pub async fn snapshot(&self) -> QuotaSnapshot {
        let limits = *self.limits.get();
        let gate = self.state.lock().await;
        let now = self.clock.now();

        let mut window = gate.window.clone();
        window.refresh_if_elapsed(now, limits.refresh_period);

        QuotaSnapshot {
            limits,
            calls_in_window: window.call_count(),
            rejected_in_window: window.rejected_count(),
            window_remaining: window.remaining(now, limits.refresh_period),
            last_admission: gate.spacing.last_admission(),
            active: self.executor.active(),
            queued: self.executor.queued(),
        }
    }

    /// Stop admitting, then wait for every admitted call to finish. Idempotent.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}

impl<K> AdmissionController<K> {
    /// Limits in force for the next decision.
    pub fn limits(&self) -> QuotaLimits {
        *self.limits.get()
    }

    pub fn executor(&self) -> &BoundedExecutor<K> {
        &self.executor
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn is_shutdown(&self) -> bool {
        self.executor.is_shutdown()
    }
}
