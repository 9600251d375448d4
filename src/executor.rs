//! Bounded executor: runs admitted operations on at most `max_concurrency`
//! worker slots.
//!
//! Calls are queued on an unbounded channel and a single dispatcher task hands
//! out semaphore permits in arrival order, so slot acquisition is FIFO. Each
//! call runs in its own tokio task and releases its slot on every exit path
//! (success, error, panic, timeout). Outcomes are delivered through
//! [`CallHandle`]s; nothing a call does can take down the dispatcher or another
//! call.

use crate::config::{ConfigError, LimiterConfig};
use crate::handle::{self, CallHandle, CallId, CallResult};
use crate::telemetry::{ExecutorEvent, LimiterEvent, LogSink, TelemetrySink};
use crate::LimiterError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

type Job = Box<dyn FnOnce(OwnedSemaphorePermit) -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Default)]
struct Slots {
    active: AtomicUsize,
    queued: AtomicUsize,
}

struct Inner<K> {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    slots: Arc<Slots>,
    done: watch::Receiver<bool>,
    next_id: AtomicU64,
    max_concurrency: usize,
    max_queue: Option<usize>,
    call_timeout: Option<Duration>,
    sink: K,
}

/// Worker pool with a fixed number of slots and a FIFO wait queue.
///
/// Cheap to clone; clones share slots, queue and sink. Must be created inside
/// a tokio runtime.
pub struct BoundedExecutor<K = LogSink> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for BoundedExecutor<K> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<K> fmt::Debug for BoundedExecutor<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("max_queue", &self.inner.max_queue)
            .field("active", &self.active())
            .field("queued", &self.queued())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl BoundedExecutor<LogSink> {
    /// Executor with `max_concurrency` slots, an unbounded queue and no call timeout.
    pub fn new(max_concurrency: usize) -> Result<Self, ConfigError> {
        let config = LimiterConfig::builder().max_concurrency(max_concurrency).build()?;
        Ok(Self::from_config(&config))
    }

    /// Take worker count, queue bound and call timeout from `config`.
    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::with_sink(config, LogSink)
    }
}

impl<K: TelemetrySink> BoundedExecutor<K> {
    /// Like [`from_config`](BoundedExecutor::from_config) but reporting to `sink`.
    pub fn with_sink(config: &LimiterConfig, sink: K) -> Self {
        let max_concurrency = config.max_concurrency();
        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);

        tokio::spawn(dispatch_loop(rx, semaphore, max_concurrency, done_tx));

        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(tx)),
                slots: Arc::new(Slots::default()),
                done: done_rx,
                next_id: AtomicU64::new(1),
                max_concurrency,
                max_queue: config.max_queue(),
                call_timeout: config.call_timeout(),
                sink,
            }),
        }
    }

    /// Queue `operation` for a worker slot and return its handle immediately.
    ///
    /// The operation is not started until a slot is free. An `Err` it returns
    /// is captured as [`LimiterError::Inner`]; a panic as
    /// [`LimiterError::Panicked`].
    pub fn dispatch<T, E, F, Fut>(&self, operation: F) -> CallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = self.next_id();
        self.dispatch_as(id, operation)
    }

    /// Dispatch `operation(args)`.
    pub fn dispatch_with<A, T, E, F, Fut>(&self, operation: F, args: A) -> CallHandle<T, E>
    where
        A: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.dispatch(move || operation(args))
    }

    /// Dispatch a synchronous operation. Once it holds a slot it runs on
    /// tokio's blocking pool.
    pub fn dispatch_blocking<T, E, F>(&self, operation: F) -> CallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let id = self.next_id();
        self.dispatch_blocking_as(id, operation)
    }

    pub(crate) fn dispatch_as<T, E, F, Fut>(&self, id: CallId, operation: F) -> CallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.enqueue(id, move || run_guarded(operation))
    }

    pub(crate) fn dispatch_blocking_as<T, E, F>(&self, id: CallId, operation: F) -> CallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.enqueue(id, move || run_blocking(operation))
    }

    fn enqueue<T, E, R, Fut>(&self, id: CallId, run: R) -> CallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        R: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CallResult<T, E>> + Send + 'static,
    {
        let sender = self.inner.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return CallHandle::resolved(id, Err(LimiterError::Shutdown));
        };

        let slots = &self.inner.slots;
        if let Some(max) = self.inner.max_queue {
            let reserved = slots.queued.fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
                if q < max {
                    Some(q + 1)
                } else {
                    None
                }
            });
            if let Err(queued) = reserved {
                tracing::debug!(call_id = id, queued, max, "executor queue full");
                return CallHandle::resolved(id, Err(LimiterError::QueueFull { queued, max }));
            }
        } else {
            slots.queued.fetch_add(1, Ordering::AcqRel);
        }

        let (handle, completion) = handle::pending(id);
        let slots = slots.clone();
        let sink = self.inner.sink.clone();
        let call_timeout = self.inner.call_timeout;
        let max_concurrency = self.inner.max_concurrency;

        let job: Job = Box::new(move |permit: OwnedSemaphorePermit| {
            async move {
                slots.queued.fetch_sub(1, Ordering::AcqRel);
                completion.start();
                let active = slots.active.fetch_add(1, Ordering::AcqRel) + 1;
                sink.emit(LimiterEvent::Executor(ExecutorEvent::Started {
                    call_id: id,
                    active,
                    max_concurrency,
                }))
                .await;

                let started = Instant::now();
                let result = match call_timeout {
                    Some(limit) => match tokio::time::timeout(limit, run()).await {
                        Ok(result) => result,
                        Err(_) => Err(LimiterError::Timeout { elapsed: started.elapsed(), timeout: limit }),
                    },
                    None => run().await,
                };
                let duration = started.elapsed();

                slots.active.fetch_sub(1, Ordering::AcqRel);
                drop(permit);

                if let Err(LimiterError::Panicked(msg)) = &result {
                    tracing::error!(call_id = id, "operation panicked: {}", msg);
                }
                sink.emit(LimiterEvent::Executor(ExecutorEvent::Completed {
                    call_id: id,
                    duration,
                    succeeded: result.is_ok(),
                }))
                .await;
                completion.complete(result);
            }
            .boxed()
        });

        if tx.send(job).is_err() {
            // Dispatcher is gone (runtime shutting down); the dropped job
            // resolves the handle as cancelled.
            self.inner.slots.queued.fetch_sub(1, Ordering::AcqRel);
        }
        handle
    }

    /// Stop accepting work and wait until every accepted call has finished.
    ///
    /// Calls already queued still run. Safe to call any number of times.
    pub async fn shutdown(&self) {
        let sender = self.inner.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if sender.is_some() {
            tracing::debug!("executor shutting down");
        }
        drop(sender);

        let mut done = self.inner.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

impl<K> BoundedExecutor<K> {
    fn next_id(&self) -> CallId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Calls currently holding a slot.
    pub fn active(&self) -> usize {
        self.inner.slots.active.load(Ordering::Acquire)
    }

    /// Accepted calls waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.slots.queued.load(Ordering::Acquire)
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    pub fn max_queue(&self) -> Option<usize> {
        self.inner.max_queue
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.inner.call_timeout
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.sender.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    pub fn sink(&self) -> &K {
        &self.inner.sink
    }
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<Job>,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    done: watch::Sender<bool>,
) {
    while let Some(job) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        tokio::spawn(job(permit));
    }

    // Channel closed: every accepted job has been spawned. Holding all slots
    // means every one of them has finished.
    let all = u32::try_from(max_concurrency).unwrap_or(u32::MAX);
    let _ = semaphore.acquire_many(all).await;
    done.send_replace(true);
    tracing::debug!("executor drained");
}

async fn run_guarded<T, E, F, Fut>(operation: F) -> CallResult<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match AssertUnwindSafe(async move { operation().await }).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(LimiterError::Inner(e)),
        Err(payload) => Err(LimiterError::Panicked(panic_message(payload.as_ref()))),
    }
}

async fn run_blocking<T, E, F>(operation: F) -> CallResult<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    match tokio::task::spawn_blocking(operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(LimiterError::Inner(e)),
        Err(join) if join.is_panic() => {
            Err(LimiterError::Panicked(panic_message(join.into_panic().as_ref())))
        }
        Err(_) => Err(LimiterError::Cancelled),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
