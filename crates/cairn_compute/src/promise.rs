//! Single-resolution, multi-waiter synchronization.
//!
//! A [`Promise`] is resolved at most once. Every [`Waiter`] obtained from it,
//! before or after resolution, observes the same outcome. Each waiter waits
//! under its own cancellation token, so cancelling one waiter never affects
//! the others or the promise itself.
//!
//! A [`RunInterest`] counts the requests still waiting on a shared run and
//! cancels the run once the last of them goes away.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::ComputeError;

/// The outcome a promise resolves with.
pub type Outcome<T> = Result<T, ComputeError>;

struct State<T> {
    outcome: Option<Outcome<T>>,
    waiters: Vec<oneshot::Sender<Outcome<T>>>,
}

/// A value that will be produced once and read by many.
pub struct Promise<T> {
    state: Mutex<State<T>>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates an unresolved promise.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                outcome: None,
                waiters: Vec::new(),
            }),
        }
    }

    /// Creates a promise already resolved with `outcome`.
    pub fn resolved(outcome: Outcome<T>) -> Self {
        Self {
            state: Mutex::new(State {
                outcome: Some(outcome),
                waiters: Vec::new(),
            }),
        }
    }

    /// Registers a new waiter.
    pub fn future(&self) -> Waiter<T> {
        let mut state = self.state.lock();
        if let Some(outcome) = &state.outcome {
            return Waiter::ready(outcome.clone());
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push(tx);
        Waiter {
            inner: WaiterInner::Pending(rx),
        }
    }

    /// Resolves the promise and wakes every registered waiter.
    ///
    /// Returns `false` if the promise was already resolved, in which case
    /// `outcome` is dropped and waiters keep observing the first one.
    pub fn resolve(&self, outcome: Outcome<T>) -> bool {
        let waiters = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            // A receiver that went away was cancelled; nothing to deliver.
            let _ = waiter.send(outcome.clone());
        }
        true
    }

    /// Returns `true` once the promise has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    /// Returns a copy of the outcome, if resolved.
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.state.lock().outcome.clone()
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

enum WaiterInner<T> {
    Ready(Outcome<T>),
    Pending(oneshot::Receiver<Outcome<T>>),
}

/// One caller's handle on a [`Promise`].
pub struct Waiter<T> {
    inner: WaiterInner<T>,
}

impl<T> Waiter<T> {
    /// A waiter that is already satisfied.
    pub fn ready(outcome: Outcome<T>) -> Self {
        Self {
            inner: WaiterInner::Ready(outcome),
        }
    }

    /// Waits for the promise's outcome, or for `cancel` to fire.
    ///
    /// Returns [`ComputeError::Cancelled`] if the token fires first, and an
    /// internal error if the promise was dropped without being resolved.
    pub async fn wait(self, cancel: &CancellationToken) -> Outcome<T> {
        match self.inner {
            WaiterInner::Ready(outcome) => outcome,
            WaiterInner::Pending(rx) => tokio::select! {
                biased;
                received = rx => received.unwrap_or_else(|_| {
                    Err(ComputeError::internal("promise dropped before it was resolved"))
                }),
                _ = cancel.cancelled() => Err(ComputeError::Cancelled),
            },
        }
    }
}

/// Counts the requests interested in one run.
///
/// The run's token fires when the count drops to zero. A run nobody waits
/// for any more is abandoned: it cannot be joined again, and the next
/// request starts a fresh one.
pub struct RunInterest {
    waiters: AtomicUsize,
    cancel: CancellationToken,
}

impl RunInterest {
    /// Creates an interest held by one request.
    pub fn new() -> (Arc<Self>, InterestGuard) {
        let interest = Arc::new(Self {
            waiters: AtomicUsize::new(1),
            cancel: CancellationToken::new(),
        });
        let guard = InterestGuard(interest.clone());
        (interest, guard)
    }

    /// The token the run executes under.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Registers another request, unless the run was already abandoned.
    pub fn join(self: &Arc<Self>) -> Option<InterestGuard> {
        self.waiters
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .ok()?;
        Some(InterestGuard(self.clone()))
    }

    /// Returns `true` once every request has gone away.
    pub fn is_abandoned(&self) -> bool {
        self.waiters.load(Ordering::Acquire) == 0
    }
}

/// One request's share of a [`RunInterest`]; released on drop.
pub struct InterestGuard(Arc<RunInterest>);

impl Drop for InterestGuard {
    fn drop(&mut self) {
        if self.0.waiters.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn resolve_before_wait() {
        let promise = Promise::new();
        assert!(promise.resolve(Ok(7)));
        let token = CancellationToken::new();
        assert_eq!(promise.future().wait(&token).await.unwrap(), 7);
        assert!(promise.is_resolved());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fan_out_to_five_waiters() {
        let promise = Arc::new(Promise::<String>::new());
        let token = CancellationToken::new();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let waiter = promise.future();
            let token = token.clone();
            handles.push(tokio::spawn(async move { waiter.wait(&token).await }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(promise.resolve(Ok("v".to_string())));
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "v");
        }
    }

    #[tokio::test]
    async fn second_resolve_is_ignored() {
        let promise = Promise::new();
        assert!(promise.resolve(Ok(1)));
        assert!(!promise.resolve(Ok(2)));
        assert!(!promise.resolve(Err(ComputeError::Cancelled)));
        let token = CancellationToken::new();
        assert_eq!(promise.future().wait(&token).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn errors_fan_out_identically() {
        let promise = Promise::<u32>::new();
        let a = promise.future();
        let b = promise.future();
        promise.resolve(Err(ComputeError::internal("broken")));
        let token = CancellationToken::new();
        let ea = a.wait(&token).await.unwrap_err();
        let eb = b.wait(&token).await.unwrap_err();
        assert_eq!(ea.to_string(), eb.to_string());
    }

    #[tokio::test]
    async fn cancelling_one_waiter_leaves_the_other() {
        let promise = Arc::new(Promise::<u32>::new());
        let cancelled = CancellationToken::new();
        let live = CancellationToken::new();

        let first = promise.future();
        let second = promise.future();
        cancelled.cancel();
        assert!(first.wait(&cancelled).await.unwrap_err().is_cancelled());

        let p = promise.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            p.resolve(Ok(42));
        });
        assert_eq!(second.wait(&live).await.unwrap(), 42);
        assert_eq!(promise.peek().unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn dropped_promise_is_an_internal_error() {
        let promise = Promise::<u32>::new();
        let waiter = promise.future();
        drop(promise);
        let token = CancellationToken::new();
        let err = waiter.wait(&token).await.unwrap_err();
        assert!(matches!(err, ComputeError::Internal(_)));
    }

    #[tokio::test]
    async fn pre_resolved_promise() {
        let promise = Promise::resolved(Ok("done"));
        assert!(promise.is_resolved());
        let token = CancellationToken::new();
        token.cancel();
        // A resolved outcome wins over a cancelled token.
        assert_eq!(promise.future().wait(&token).await.unwrap(), "done");
    }

    #[test]
    fn interest_cancels_after_the_last_guard() {
        let (interest, first) = RunInterest::new();
        let second = interest.join().unwrap();
        let token = interest.token();

        drop(first);
        assert!(!token.is_cancelled());
        drop(second);
        assert!(token.is_cancelled());
        assert!(interest.is_abandoned());
    }

    #[test]
    fn abandoned_interest_cannot_be_joined() {
        let (interest, guard) = RunInterest::new();
        drop(guard);
        assert!(interest.join().is_none());
        assert!(interest.is_abandoned());
    }
}
