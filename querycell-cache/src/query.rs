//! A single cached result wrapping one producer.
//!
//! [`AsyncResult`] tracks the loading/data/error state of one producer and
//! collapses overlapping `run` calls into a single shared [`Operation`].
//! Failures are captured as data: awaiting an operation never yields the
//! producer's error, callers read it from [`AsyncResult::error`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::FutureExt;
use querycell_core::{Producer, QuerySnapshot, QueryStatus, RegistryConfig, SharedProducer};
use tokio::sync::watch;

use crate::observe::{ObserverSet, Subscription};
use crate::operation::Operation;

const ANONYMOUS: &str = "anonymous";

/// Mutable fields of a result. Only touched under the state lock.
struct QueryState<D, E> {
    data: Option<Arc<D>>,
    error: Option<Arc<E>>,
    pending: Option<Operation<D>>,
    revision: u64,
}

impl<D, E> QueryState<D, E> {
    fn status(&self) -> QueryStatus {
        QueryStatus::derive(
            self.pending.is_some(),
            self.data.is_some(),
            self.error.is_some(),
        )
    }

    fn snapshot(&self) -> QuerySnapshot<D, E> {
        QuerySnapshot {
            status: self.status(),
            data: self.data.clone(),
            error: self.error.clone(),
            revision: self.revision,
        }
    }
}

struct QueryInner<D, E, P> {
    key: String,
    producer: SharedProducer<P, D, E>,
    eager_poll: bool,
    spawn_driver: bool,
    state: Mutex<QueryState<D, E>>,
    observers: Arc<ObserverSet<QuerySnapshot<D, E>>>,
    changes: watch::Sender<QuerySnapshot<D, E>>,
}

/// Cached result of one producer.
///
/// Cloning is cheap and yields another handle onto the same state.
///
/// # Example
///
/// ```ignore
/// let query = AsyncResult::new(producer_fn(|(): ()| fetch_prices()));
/// let first = query.run(());
/// let second = query.run(()); // joins the pending invocation
/// assert!(first.same_as(&second));
/// first.await;
/// assert_eq!(query.status(), QueryStatus::Succeeded);
/// ```
pub struct AsyncResult<D, E, P = ()> {
    inner: Arc<QueryInner<D, E, P>>,
}

impl<D, E, P> AsyncResult<D, E, P>
where
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
    P: Send + 'static,
{
    /// Create a standalone result with default configuration.
    pub fn new<Pr>(producer: Pr) -> Self
    where
        Pr: Producer<Params = P, Output = D, Error = E>,
    {
        Self::with_config(producer, &RegistryConfig::default())
    }

    /// Create a standalone result with explicit configuration.
    pub fn with_config<Pr>(producer: Pr, config: &RegistryConfig) -> Self
    where
        Pr: Producer<Params = P, Output = D, Error = E>,
    {
        Self::keyed(ANONYMOUS, Arc::new(producer), config)
    }

    pub(crate) fn keyed(
        key: impl Into<String>,
        producer: SharedProducer<P, D, E>,
        config: &RegistryConfig,
    ) -> Self {
        let (changes, _) = watch::channel(QuerySnapshot::idle());
        Self {
            inner: Arc::new(QueryInner {
                key: key.into(),
                producer,
                eager_poll: config.eager_poll,
                spawn_driver: config.spawn_driver,
                state: Mutex::new(QueryState {
                    data: None,
                    error: None,
                    pending: None,
                    revision: 0,
                }),
                observers: Arc::new(ObserverSet::new()),
                changes,
            }),
        }
    }

    /// Start the producer unless an invocation is already pending.
    ///
    /// While an invocation is pending every call returns that same
    /// operation and `params` is dropped; the producer is not called again.
    /// Otherwise the result moves to `Loading` before this returns.
    ///
    /// A producer that panics is not a failure: the result leaves `Loading`
    /// without recording an error, and the panic resumes in whoever polls
    /// the operation (the caller of `run` itself when the eager poll hits
    /// it). The next `run` starts a new invocation.
    pub fn run(&self, params: P) -> Operation<D> {
        let (operation, snapshot) = {
            let mut state = self.inner.lock_state();
            if let Some(pending) = &state.pending {
                tracing::debug!(
                    key = %self.inner.key,
                    operation_id = pending.id(),
                    "joining pending operation"
                );
                return pending.clone();
            }

            let operation = QueryInner::start(&self.inner, params);
            state.pending = Some(operation.clone());
            state.revision += 1;
            (operation, state.snapshot())
        };

        tracing::debug!(
            key = %self.inner.key,
            operation_id = operation.id(),
            revision = snapshot.revision,
            "operation started"
        );
        self.inner.publish(snapshot);
        self.inner.drive(&operation);
        operation
    }

    /// Resolve immediately with `value` as a successful result.
    ///
    /// A pending invocation is superseded: it still runs to completion for
    /// whoever awaits it, but its outcome is no longer recorded here.
    pub fn seed(&self, value: D) {
        let snapshot = {
            let mut state = self.inner.lock_state();
            if let Some(superseded) = state.pending.take() {
                tracing::debug!(
                    key = %self.inner.key,
                    operation_id = superseded.id(),
                    "seed supersedes pending operation"
                );
            }
            state.data = Some(Arc::new(value));
            state.error = None;
            state.revision += 1;
            state.snapshot()
        };

        tracing::debug!(key = %self.inner.key, revision = snapshot.revision, "result seeded");
        self.inner.publish(snapshot);
    }

    pub fn status(&self) -> QueryStatus {
        self.inner.lock_state().status()
    }

    pub fn is_loading(&self) -> bool {
        self.status().is_loading()
    }

    /// Last successful payload. Survives later failures.
    pub fn data(&self) -> Option<Arc<D>> {
        self.inner.lock_state().data.clone()
    }

    /// Last failure. Cleared by the next success.
    pub fn error(&self) -> Option<Arc<E>> {
        self.inner.lock_state().error.clone()
    }

    pub fn revision(&self) -> u64 {
        self.inner.lock_state().revision
    }

    /// All observable fields, read atomically.
    pub fn snapshot(&self) -> QuerySnapshot<D, E> {
        self.inner.lock_state().snapshot()
    }

    /// The in-flight operation, if any.
    pub fn pending_operation(&self) -> Option<Operation<D>> {
        self.inner.lock_state().pending.clone()
    }

    /// Key this result is registered under, or `"anonymous"`.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Call `callback` with the new snapshot after every state transition.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QuerySnapshot<D, E>) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }

    /// Receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<QuerySnapshot<D, E>> {
        self.inner.changes.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Returns true if both handles refer to the same result.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<D, E, P> QueryInner<D, E, P>
where
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
    P: Send + 'static,
{
    fn start(this: &Arc<Self>, params: P) -> Operation<D> {
        let id = Operation::<D>::next_id();
        let producer = Arc::clone(&this.producer);
        let owner: Weak<Self> = Arc::downgrade(this);

        Operation::new(id, async move {
            let outcome = match AssertUnwindSafe(producer.produce(params))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(payload) => {
                    if let Some(inner) = owner.upgrade() {
                        inner.abandon(id);
                    }
                    panic::resume_unwind(payload);
                }
            };
            match owner.upgrade() {
                Some(inner) => inner.complete(id, outcome),
                None => outcome.ok().map(Arc::new),
            }
        })
    }

    /// Clear operation `id` after its producer panicked.
    ///
    /// Data and error stay as they were, so the status falls back to
    /// whatever they describe, and the next `run` starts a fresh invocation.
    fn abandon(&self, id: u64) {
        let snapshot = {
            let mut state = self.lock_state();
            if state.pending.as_ref().map(Operation::id) != Some(id) {
                return;
            }
            state.pending = None;
            state.revision += 1;
            state.snapshot()
        };

        tracing::error!(
            key = %self.key,
            operation_id = id,
            status = %snapshot.status,
            "producer panicked; operation abandoned"
        );
        self.publish(snapshot);
    }

    /// Record the outcome of operation `id` and clear it, in one transition.
    fn complete(&self, id: u64, outcome: Result<D, E>) -> Option<Arc<D>> {
        let (data, snapshot) = {
            let mut state = self.lock_state();
            let current = state.pending.as_ref().map(Operation::id) == Some(id);

            let data = match outcome {
                Ok(value) => {
                    let value = Arc::new(value);
                    if current {
                        state.data = Some(Arc::clone(&value));
                        state.error = None;
                    }
                    Some(value)
                }
                Err(err) => {
                    if current {
                        state.error = Some(Arc::new(err));
                    }
                    None
                }
            };

            if !current {
                tracing::debug!(
                    key = %self.key,
                    operation_id = id,
                    "superseded operation finished; outcome discarded"
                );
                return data;
            }

            state.pending = None;
            state.revision += 1;
            (data, state.snapshot())
        };

        tracing::debug!(
            key = %self.key,
            operation_id = id,
            status = %snapshot.status,
            revision = snapshot.revision,
            "operation completed"
        );
        self.publish(snapshot);
        data
    }

    fn drive(&self, operation: &Operation<D>) {
        if self.eager_poll && operation.clone().now_or_never().is_some() {
            return;
        }
        if !self.spawn_driver {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(operation.clone());
            }
            Err(_) => {
                tracing::debug!(
                    key = %self.key,
                    operation_id = operation.id(),
                    "no runtime for driver task; operation advances when awaited"
                );
            }
        }
    }

    /// Fan a snapshot out to the watch channel and observers.
    ///
    /// Snapshots older than the last one published are dropped, so a slow
    /// publisher can never roll observers back to an earlier state. Accepted
    /// snapshots are queued for observers inside the watch channel's update,
    /// so callbacks see revisions in increasing order even when threads
    /// publish concurrently.
    fn publish(&self, snapshot: QuerySnapshot<D, E>) {
        self.changes.send_if_modified(|current| {
            if snapshot.revision > current.revision {
                *current = snapshot.clone();
                self.observers.enqueue(snapshot);
                true
            } else {
                false
            }
        });
        self.observers.flush();
    }

    // No critical section can leave the state half-updated, so a poisoned
    // lock still guards consistent fields.
    fn lock_state(&self) -> MutexGuard<'_, QueryState<D, E>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(key = %self.key, "recovering poisoned result state");
            poisoned.into_inner()
        })
    }
}

impl<D, E, P> Clone for AsyncResult<D, E, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D, E, P> fmt::Debug for AsyncResult<D, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}
