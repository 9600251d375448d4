//! Call handles: the caller-visible side of one submitted operation.
//!
//! A [`CallHandle`] is created at submission time. It is either already
//! terminal (rejected) or paired with a [`Completion`] owned by the worker
//! that will run the operation. The worker moves the shared state through
//! `Pending → Running → Succeeded | Failed`; the terminal transition happens
//! exactly once and always before the result is delivered.

use crate::LimiterError;
use futures::stream::{FuturesUnordered, Stream};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Identifier assigned to each submission, unique per controller or executor.
pub type CallId = u64;

/// Result delivered by a [`CallHandle`].
pub type CallResult<T, E> = Result<T, LimiterError<E>>;

const STATE_PENDING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SUCCEEDED: u8 = 2;
const STATE_FAILED: u8 = 3;
const STATE_REJECTED: u8 = 4;

/// Lifecycle state of a submitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Accepted, waiting for a worker slot.
    Pending,
    /// Holding a worker slot.
    Running,
    Succeeded,
    /// Ran (or started to) and did not succeed.
    Failed,
    /// Turned away without running.
    Rejected,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Succeeded | CallState::Failed | CallState::Rejected)
    }

    fn to_u8(self) -> u8 {
        match self {
            CallState::Pending => STATE_PENDING,
            CallState::Running => STATE_RUNNING,
            CallState::Succeeded => STATE_SUCCEEDED,
            CallState::Failed => STATE_FAILED,
            CallState::Rejected => STATE_REJECTED,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            STATE_PENDING => CallState::Pending,
            STATE_RUNNING => CallState::Running,
            STATE_SUCCEEDED => CallState::Succeeded,
            STATE_REJECTED => CallState::Rejected,
            _ => CallState::Failed,
        }
    }

    fn for_result<T, E>(result: &CallResult<T, E>) -> Self {
        match result {
            Ok(_) => CallState::Succeeded,
            Err(e) if e.is_rejected() => CallState::Rejected,
            Err(_) => CallState::Failed,
        }
    }
}

#[derive(Debug)]
struct CallRecord {
    state: AtomicU8,
}

impl CallRecord {
    fn new(state: CallState) -> Arc<Self> {
        Arc::new(Self { state: AtomicU8::new(state.to_u8()) })
    }

    fn load(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless already terminal. Returns whether the transition happened.
    fn transition(&self, next: CallState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if CallState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

enum Outcome<T, E> {
    Ready(Option<CallResult<T, E>>),
    Waiting(oneshot::Receiver<CallResult<T, E>>),
}

/// Handle to the eventual outcome of one submitted operation.
///
/// Await the handle (or call [`result`](Self::result)) to get the value or the
/// captured error. Dropping the handle does not cancel the operation.
pub struct CallHandle<T, E> {
    id: CallId,
    record: Arc<CallRecord>,
    outcome: Outcome<T, E>,
}

/// Worker side of a [`CallHandle`].
///
/// Dropping it without calling [`complete`](Self::complete) marks the call
/// failed and resolves the handle with [`LimiterError::Cancelled`].
pub(crate) struct Completion<T, E> {
    #[allow(dead_code)]
    id: CallId,
    record: Arc<CallRecord>,
    tx: Option<oneshot::Sender<CallResult<T, E>>>,
}

/// Create a pending handle and the completion that resolves it.
pub(crate) fn pending<T, E>(id: CallId) -> (CallHandle<T, E>, Completion<T, E>) {
    let (tx, rx) = oneshot::channel();
    let record = CallRecord::new(CallState::Pending);
    (
        CallHandle { id, record: record.clone(), outcome: Outcome::Waiting(rx) },
        Completion { id, record, tx: Some(tx) },
    )
}

impl<T, E> CallHandle<T, E> {
    /// A handle that is terminal from the start.
    pub(crate) fn resolved(id: CallId, result: CallResult<T, E>) -> Self {
        let record = CallRecord::new(CallState::for_result(&result));
        Self { id, record, outcome: Outcome::Ready(Some(result)) }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CallState {
        self.record.load()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == CallState::Rejected
    }

    /// Wait until the call is terminal and return its value or error.
    pub async fn result(self) -> CallResult<T, E> {
        self.await
    }
}

impl<T, E> Unpin for CallHandle<T, E> {}

impl<T, E> Future for CallHandle<T, E> {
    type Output = CallResult<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.outcome {
            Outcome::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(LimiterError::Cancelled)))
            }
            Outcome::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => {
                    this.outcome = Outcome::Ready(None);
                    Poll::Ready(result)
                }
                Poll::Ready(Err(_)) => {
                    this.outcome = Outcome::Ready(None);
                    Poll::Ready(Err(LimiterError::Cancelled))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<T, E> fmt::Debug for CallHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle").field("id", &self.id).field("state", &self.state()).finish()
    }
}

impl<T, E> Completion<T, E> {
    #[allow(dead_code)]
    pub(crate) fn id(&self) -> CallId {
        self.id
    }

    /// Mark the call as holding a worker slot.
    pub(crate) fn start(&self) {
        self.record.transition(CallState::Running);
    }

    /// Record the terminal state and deliver the result. A handle that was
    /// dropped simply never sees it.
    pub(crate) fn complete(mut self, result: CallResult<T, E>) {
        self.record.transition(CallState::for_result(&result));
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }
}

impl<T, E> Drop for Completion<T, E> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.record.transition(CallState::Failed);
        }
    }
}

/// Wait for every handle and return the outcomes in the order the handles were given.
///
/// Each outcome is independent: a failed call never affects the others.
pub async fn await_all<T, E, I>(handles: I) -> Vec<CallResult<T, E>>
where
    I: IntoIterator<Item = CallHandle<T, E>>,
{
    futures::future::join_all(handles).await
}

/// Yield `(id, outcome)` pairs in completion order.
pub fn as_completed<T, E, I>(handles: I) -> impl Stream<Item = (CallId, CallResult<T, E>)>
where
    I: IntoIterator<Item = CallHandle<T, E>>,
{
    handles
        .into_iter()
        .map(|handle| {
            let id = handle.id();
            handle.map(move |result| (id, result))
        })
        .collect::<FuturesUnordered<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn completion_moves_handle_through_lifecycle() {
        let (handle, completion) = pending::<u32, TestError>(7);
        assert_eq!(handle.id(), 7);
        assert_eq!(handle.state(), CallState::Pending);

        completion.start();
        assert_eq!(handle.state(), CallState::Running);

        completion.complete(Ok(42));
        assert_eq!(handle.state(), CallState::Succeeded);
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn failed_operation_is_terminal_failed() {
        let (handle, completion) = pending::<u32, TestError>(1);
        completion.start();
        completion.complete(Err(LimiterError::Inner(TestError("boom"))));

        assert_eq!(handle.state(), CallState::Failed);
        let err = handle.result().await.unwrap_err();
        assert_eq!(err.into_inner(), Some(TestError("boom")));
    }

    #[tokio::test]
    async fn dropped_completion_reports_cancelled() {
        let (handle, completion) = pending::<u32, TestError>(1);
        drop(completion);

        assert_eq!(handle.state(), CallState::Failed);
        assert!(matches!(handle.await, Err(LimiterError::Cancelled)));
    }

    #[tokio::test]
    async fn resolved_rejection_is_terminal_immediately() {
        let handle = CallHandle::<u32, TestError>::resolved(
            3,
            Err(LimiterError::RateLimitExceeded {
                limit: 1,
                window: Duration::from_secs(1),
                retry_after: Duration::from_millis(10),
            }),
        );
        assert!(handle.is_rejected());
        assert!(handle.is_finished());
        assert!(handle.await.unwrap_err().is_rate_limited());
    }

    #[test]
    fn terminal_state_is_set_once() {
        let record = CallRecord::new(CallState::Pending);
        assert!(record.transition(CallState::Running));
        assert!(record.transition(CallState::Succeeded));
        assert!(!record.transition(CallState::Failed));
        assert_eq!(record.load(), CallState::Succeeded);
    }

    #[tokio::test]
    async fn await_all_preserves_input_order() {
        let mut handles = Vec::new();
        let mut completions = Vec::new();
        for id in 0..4 {
            let (h, c) = pending::<u64, TestError>(id);
            handles.push(h);
            completions.push(c);
        }
        // Complete in reverse order.
        for c in completions.into_iter().rev() {
            let id = c.id();
            if id % 2 == 0 {
                c.complete(Ok(id));
            } else {
                c.complete(Err(LimiterError::Inner(TestError("odd"))));
            }
        }

        let results = await_all(handles).await;
        assert_eq!(results.len(), 4);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.is_ok(), i % 2 == 0, "index {i}");
        }
    }

    #[tokio::test]
    async fn as_completed_tags_results_with_ids() {
        let (h1, c1) = pending::<&'static str, TestError>(10);
        let (h2, c2) = pending::<&'static str, TestError>(20);
        c2.complete(Ok("second"));
        c1.complete(Ok("first"));

        let mut seen: Vec<(CallId, &'static str)> = as_completed(vec![h1, h2])
            .map(|(id, r)| (id, r.unwrap()))
            .collect()
            .await;
        seen.sort();
        assert_eq!(seen, vec![(10, "first"), (20, "second")]);
    }
}
