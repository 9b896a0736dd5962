//! Shared handle to one in-flight producer invocation.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Awaitable handle to a single producer invocation.
///
/// Every caller that joins the same invocation holds a clone of the same
/// operation and observes the same outcome. The output is the payload of
/// this attempt, or `None` if the producer failed; the failure itself is
/// recorded on the result, never surfaced here.
pub struct Operation<D> {
    id: u64,
    inner: Shared<BoxFuture<'static, Option<Arc<D>>>>,
}

impl<D> Operation<D>
where
    D: Send + Sync + 'static,
{
    pub(crate) fn new<F>(id: u64, future: F) -> Self
    where
        F: Future<Output = Option<Arc<D>>> + Send + 'static,
    {
        Self {
            id,
            inner: future.boxed().shared(),
        }
    }

    pub(crate) fn next_id() -> u64 {
        NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Process-unique identifier of this invocation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true if both handles refer to the same invocation.
    pub fn same_as(&self, other: &Self) -> bool {
        self.id == other.id
    }

    /// Returns true once the invocation has finished.
    pub fn is_complete(&self) -> bool {
        self.inner.peek().is_some()
    }

    /// The outcome, if the invocation has finished.
    pub fn peek(&self) -> Option<Option<Arc<D>>> {
        self.inner.peek().cloned()
    }
}

impl<D> Clone for Operation<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: self.inner.clone(),
        }
    }
}

impl<D> Future for Operation<D> {
    type Output = Option<Arc<D>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<D> fmt::Debug for Operation<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future;

    #[tokio::test]
    async fn test_clones_share_outcome() {
        let op = Operation::new(Operation::<u32>::next_id(), async { Some(Arc::new(5u32)) });
        let other = op.clone();

        let a = op.await.unwrap();
        let b = other.await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_peek_after_completion() {
        let op = Operation::<u32>::new(Operation::<u32>::next_id(), future::ready(None));
        assert!(!op.is_complete());
        assert_eq!(op.clone().await, None);
        assert!(op.is_complete());
        assert_eq!(op.peek(), Some(None));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Operation::<u32>::next_id();
        let b = Operation::<u32>::next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_as_compares_invocations() {
        let op = Operation::<u32>::new(Operation::<u32>::next_id(), future::ready(None));
        let other = Operation::new(Operation::<u32>::next_id(), future::ready(None));
        assert!(op.same_as(&op.clone()));
        assert!(!op.same_as(&other));
    }
}
