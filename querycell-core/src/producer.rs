//! The producer seam.
//!
//! A producer is the opaque asynchronous function a cached result wraps.
//! The cache knows nothing about what it does (HTTP, disk, computation);
//! it only invokes it and records the outcome.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Asynchronous source of values for a cached result.
///
/// # Implementation Requirements
///
/// - `produce` may be called many times over the lifetime of a result, but
///   never concurrently for the same result
/// - Failures are returned, not panicked; the cache stores them as data
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    /// Arguments passed to each invocation.
    type Params: Send + 'static;
    /// Payload of a successful invocation.
    type Output: Send + Sync + 'static;
    /// Payload of a failed invocation.
    type Error: Send + Sync + 'static;

    /// Run the producer once.
    async fn produce(&self, params: Self::Params) -> Result<Self::Output, Self::Error>;
}

/// Type-erased producer handle.
pub type SharedProducer<P, D, E> = Arc<dyn Producer<Params = P, Output = D, Error = E>>;

#[async_trait]
impl<T> Producer for Arc<T>
where
    T: Producer + ?Sized,
{
    type Params = T::Params;
    type Output = T::Output;
    type Error = T::Error;

    async fn produce(&self, params: Self::Params) -> Result<Self::Output, Self::Error> {
        (**self).produce(params).await
    }
}

/// Producer backed by a closure returning a future.
pub struct FnProducer<F, P> {
    f: F,
    _params: PhantomData<fn(P)>,
}

/// Wrap a closure as a [`Producer`].
///
/// ```ignore
/// let producer = producer_fn(|(): ()| async { Ok::<_, String>(42u32) });
/// ```
pub fn producer_fn<F, Fut, P, D, E>(f: F) -> FnProducer<F, P>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<D, E>> + Send + 'static,
{
    FnProducer {
        f,
        _params: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, P, D, E> Producer for FnProducer<F, P>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<D, E>> + Send + 'static,
    P: Send + 'static,
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    type Params = P;
    type Output = D;
    type Error = E;

    async fn produce(&self, params: P) -> Result<D, E> {
        (self.f)(params).await
    }
}

/// Producer that resolves instantly to a fixed value.
///
/// Created by the registry when a key is first populated by seeding, so that
/// a later `run` reproduces the seeded value.
pub struct SeededProducer<D, E, P = ()> {
    value: D,
    _marker: PhantomData<fn(P) -> E>,
}

impl<D, E, P> SeededProducer<D, E, P> {
    pub fn new(value: D) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub fn value(&self) -> &D {
        &self.value
    }
}

#[async_trait]
impl<D, E, P> Producer for SeededProducer<D, E, P>
where
    D: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    P: Send + 'static,
{
    type Params = P;
    type Output = D;
    type Error = E;

    async fn produce(&self, _params: P) -> Result<D, E> {
        Ok(self.value.clone())
    }
}
