//! querycell Cache - Results, Registry and Subscriptions
//!
//! A keyed cache of asynchronous results with at-most-one invocation in
//! flight per key.
//!
//! # Overview
//!
//! - [`AsyncResult`] wraps one producer. Overlapping `run` calls share a single
//!   [`Operation`]; the outcome lands in the result's `data`/`error` fields in
//!   one observable transition.
//! - [`ResultRegistry`] maps string keys to results of any payload type,
//!   creating them on first use and type-checking every later lookup.
//! - [`QueryBinding`] is the consumer-side glue: look up, run, observe, and
//!   release on drop.
//!
//! Failures never escape through an operation. They are stored on the result
//! and stay there until the next success, while the last successful payload
//! remains readable (stale-while-revalidate).
//!
//! # Example
//!
//! ```ignore
//! let registry = ResultRegistry::new();
//! let coins = registry.get_or_create("coins", || producer_fn(|(): ()| fetch_coins()))?;
//!
//! let _subscription = coins.subscribe(|snapshot| render(snapshot));
//! coins.run(()).await;
//!
//! if let Some(error) = coins.error() {
//!     tracing::warn!(%error, "price refresh failed");
//! }
//! ```

pub mod binding;
pub mod observe;
pub mod operation;
pub mod query;
pub mod registry;

pub use binding::QueryBinding;
pub use observe::{ObserverSet, Subscription};
pub use operation::Operation;
pub use query::AsyncResult;
pub use registry::{RegistryStats, ResultRegistry};

// Re-export core types so most callers need only this crate
pub use querycell_core::{
    producer_fn, ConfigError, FnProducer, Producer, QueryCellError, QueryCellResult,
    QuerySnapshot, QueryStatus, RegistryConfig, RegistryError, SeededProducer, SharedProducer,
};
