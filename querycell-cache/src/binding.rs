//! Subscription adapter tying a consumer to one registry entry.
//!
//! A binding does what every consumer of the cache otherwise repeats by hand:
//! look the result up, make sure it is running, watch it, and stop watching
//! when the consumer goes away.

use querycell_core::{Producer, QueryCellResult, QuerySnapshot};
use tokio::sync::watch;

use crate::observe::Subscription;
use crate::operation::Operation;
use crate::query::AsyncResult;
use crate::registry::ResultRegistry;

/// A consumer's live view of one cached result.
///
/// Dropping the binding deregisters its observer; the result itself stays
/// in the registry.
pub struct QueryBinding<D, E, P = ()> {
    result: AsyncResult<D, E, P>,
    changes: watch::Receiver<QuerySnapshot<D, E>>,
    subscription: Subscription,
}

impl<D, E, P> QueryBinding<D, E, P>
where
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
    P: Send + 'static,
{
    /// Bind to the result under `key`, run it, and call `on_change` after
    /// every transition until the binding is dropped.
    ///
    /// The observer is registered before the result is run, so a producer
    /// that completes synchronously is still reported.
    pub fn bind<Pr, F, C>(
        registry: &ResultRegistry,
        key: &str,
        factory: F,
        params: P,
        on_change: C,
    ) -> QueryCellResult<Self>
    where
        Pr: Producer<Params = P, Output = D, Error = E>,
        F: FnOnce() -> Pr,
        C: Fn(&QuerySnapshot<D, E>) + Send + Sync + 'static,
    {
        let result = registry.get_or_create(key, factory)?;
        let subscription = result.subscribe(on_change);
        let changes = result.watch();
        result.run(params);

        tracing::debug!(key, observer = subscription.id(), "binding attached");
        Ok(Self {
            result,
            changes,
            subscription,
        })
    }

    /// The bound result.
    pub fn result(&self) -> &AsyncResult<D, E, P> {
        &self.result
    }

    /// Current state of the bound result.
    pub fn snapshot(&self) -> QuerySnapshot<D, E> {
        self.result.snapshot()
    }

    /// Run the bound result again (or join its pending operation).
    pub fn refresh(&self, params: P) -> Operation<D> {
        self.result.run(params)
    }

    /// Wait for the next transition the binding has not seen yet.
    pub async fn changed(&mut self) -> QuerySnapshot<D, E> {
        // The sender lives inside `self.result`, so it cannot close.
        if self.changes.changed().await.is_err() {
            return self.result.snapshot();
        }
        self.changes.borrow_and_update().clone()
    }

    /// Wait until the bound result is no longer loading or idle.
    pub async fn settled(&mut self) -> QuerySnapshot<D, E> {
        match self
            .changes
            .wait_for(|snapshot| snapshot.status.is_settled())
            .await
        {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.result.snapshot(),
        }
    }

    /// Stop observing. Equivalent to dropping the binding.
    pub fn release(self) {
        tracing::debug!(
            key = self.result.key(),
            observer = self.subscription.id(),
            "binding released"
        );
    }
}
