//! Observer registration and fan-out.
//!
//! Observers are plain callbacks invoked synchronously after a state
//! transition. Registration returns a [`Subscription`]; releasing it (or
//! dropping it) stops further notifications.
//!
//! Values published through [`ObserverSet::enqueue`] and
//! [`ObserverSet::flush`] reach callbacks one at a time and in enqueue
//! order, even when several threads publish at once.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Values waiting for delivery, and whether some thread is delivering.
struct Outbox<S> {
    queue: VecDeque<S>,
    delivering: bool,
}

/// Ordered set of observer callbacks for values of type `S`.
pub struct ObserverSet<S> {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, Callback<S>)>>,
    outbox: Mutex<Outbox<S>>,
}

/// Clears the delivering flag if a callback panics mid-delivery.
struct Delivery<'a, S> {
    outbox: &'a Mutex<Outbox<S>>,
    finished: bool,
}

impl<S> Drop for Delivery<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            self.outbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .delivering = false;
        }
    }
}

impl<S: Send + 'static> ObserverSet<S> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: Mutex::new(Vec::new()),
            outbox: Mutex::new(Outbox {
                queue: VecDeque::new(),
                delivering: false,
            }),
        }
    }

    /// Register a callback. It stays registered until the returned
    /// subscription is released.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(callback)));

        let set: Weak<Self> = Arc::downgrade(self);
        Subscription {
            id,
            release: Some(Box::new(move || {
                if let Some(set) = set.upgrade() {
                    set.remove(id);
                }
            })),
        }
    }

    /// Invoke every registered callback with `value`, in registration order.
    ///
    /// The callback list is copied before invoking anything, so callbacks may
    /// subscribe, unsubscribe, or read the observed state themselves.
    /// Callbacks registered during a fan-out are first called on the next one.
    pub fn notify(&self, value: &S) {
        let callbacks: Vec<Callback<S>> = self
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        tracing::trace!(observers = callbacks.len(), "notifying observers");
        for callback in callbacks {
            callback(value);
        }
    }

    /// Queue `value` for ordered delivery by [`flush`](Self::flush).
    ///
    /// Callers that need a global order enqueue while holding whatever
    /// serializes their values.
    pub fn enqueue(&self, value: S) {
        self.outbox().queue.push_back(value);
    }

    /// Deliver queued values in order.
    ///
    /// Only one thread delivers at a time. A flush that finds delivery in
    /// progress returns at once and leaves its values to that deliverer, so
    /// a callback that publishes again (directly or on another thread) sees
    /// its value delivered after the current one, never interleaved.
    pub fn flush(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }
        let mut delivery = Delivery {
            outbox: &self.outbox,
            finished: false,
        };

        loop {
            // Emptiness check and flag reset share one critical section so a
            // concurrent enqueue is never stranded.
            let next = {
                let mut outbox = self.outbox();
                let next = outbox.queue.pop_front();
                if next.is_none() {
                    outbox.delivering = false;
                }
                next
            };
            match next {
                Some(value) => self.notify(&value),
                None => {
                    delivery.finished = true;
                    return;
                }
            }
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove(&self, id: u64) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox<S>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Callbacks never run under this lock, so poisoning can only come from a
    // panic in Vec bookkeeping; the list is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Callback<S>)>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Send + 'static> Default for ObserverSet<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for ObserverSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Handle to a registered observer.
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Identifier of the observer within its set.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true until the subscription is released or detached.
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    /// Stop receiving notifications.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the observer registered for the lifetime of the observed value.
    pub fn detach(mut self) {
        self.release = None;
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        (count, move |_: &u32| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_notify_reaches_every_observer() {
        let set = Arc::new(ObserverSet::new());
        let (a, on_a) = counter();
        let (b, on_b) = counter();
        let _sub_a = set.subscribe(on_a);
        let _sub_b = set.subscribe(on_b);

        set.notify(&1);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let set = Arc::new(ObserverSet::new());
        let (count, on_change) = counter();
        let sub = set.subscribe(on_change);
        assert_eq!(set.len(), 1);

        drop(sub);
        set.notify(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_explicit_unsubscribe() {
        let set = Arc::new(ObserverSet::new());
        let (count, on_change) = counter();
        let sub = set.subscribe(on_change);
        assert!(sub.is_active());

        sub.unsubscribe();
        set.notify(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detach_keeps_observer() {
        let set = Arc::new(ObserverSet::new());
        let (count, on_change) = counter();
        set.subscribe(on_change).detach();

        set.notify(&1);
        set.notify(&2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscription_outliving_set_is_harmless() {
        let set = Arc::new(ObserverSet::<u32>::new());
        let sub = set.subscribe(|_| {});
        drop(set);
        drop(sub);
    }

    #[test]
    fn test_observer_can_unsubscribe_during_fanout() {
        let set = Arc::new(ObserverSet::<u32>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let seen = Arc::new(AtomicUsize::new(0));

        let slot_in = Arc::clone(&slot);
        let seen_in = Arc::clone(&seen);
        let sub = set.subscribe(move |_| {
            seen_in.fetch_add(1, Ordering::SeqCst);
            slot_in.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        set.notify(&1);
        set.notify(&2);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let set = Arc::new(ObserverSet::<u32>::new());
        let a = set.subscribe(|_| {});
        let b = set.subscribe(|_| {});
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_flush_delivers_in_enqueue_order() {
        let set = Arc::new(ObserverSet::<u32>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = set.subscribe(move |value| sink.lock().unwrap().push(*value));

        set.enqueue(1);
        set.enqueue(2);
        set.flush();
        set.flush();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_reentrant_publish_is_delivered_after_current_value() {
        let set = Arc::new(ObserverSet::<u32>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&set);
        let first = Arc::clone(&seen);
        let _a = set.subscribe(move |value| {
            first.lock().unwrap().push(("a", *value));
            if *value == 1 {
                if let Some(set) = weak.upgrade() {
                    set.enqueue(2);
                    set.flush();
                }
            }
        });
        let second = Arc::clone(&seen);
        let _b = set.subscribe(move |value| second.lock().unwrap().push(("b", *value)));

        set.enqueue(1);
        set.flush();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
    }

    #[test]
    fn test_panicking_observer_does_not_stall_delivery() {
        let set = Arc::new(ObserverSet::<u32>::new());
        let (count, on_change) = counter();
        let _counting = set.subscribe(on_change);
        let panicking = set.subscribe(|value| {
            if *value == 1 {
                panic!("observer failed");
            }
        });

        set.enqueue(1);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| set.flush()));
        assert!(outcome.is_err());
        drop(panicking);

        set.enqueue(2);
        set.flush();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
