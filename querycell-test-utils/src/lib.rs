//! querycell Test Utilities
//!
//! Centralized test infrastructure for the querycell workspace:
//! - Mock producers with call counting, scripted outcomes and release gates
//! - Fixtures for the price document used in scenario tests
//! - Proptest generators
//! - Test tracing initialization

// Re-export core types for convenience
pub use querycell_core::{
    producer_fn, Producer, QueryCellError, QueryCellResult, QuerySnapshot, QueryStatus,
    RegistryConfig, RegistryError,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

// ============================================================================
// MOCK PRODUCERS
// ============================================================================

/// Shared count of producer invocations.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invocations so far.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Record one invocation, returning the new total.
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Release valve for gated producers.
///
/// Each permit lets exactly one pending invocation finish.
#[derive(Debug, Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    /// A gate with no permits.
    pub fn closed() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    /// Let `n` invocations through.
    pub fn open(&self, n: usize) {
        self.0.add_permits(n);
    }

    /// Wait for a permit and consume it.
    pub async fn pass(&self) {
        if let Ok(permit) = self.0.acquire().await {
            permit.forget();
        }
    }
}

/// Producer with scripted outcomes.
///
/// Outcomes are returned in order; the last one repeats once the script is
/// exhausted. When gated, each invocation picks its outcome immediately and
/// then waits on the [`Gate`] before returning it.
pub struct MockProducer<D, E = String, P = ()> {
    calls: CallCounter,
    gate: Gate,
    gated: bool,
    script: Mutex<VecDeque<Result<D, E>>>,
    _params: PhantomData<fn(P)>,
}

impl<D, E, P> MockProducer<D, E, P>
where
    D: Clone,
    E: Clone,
{
    /// Producer returning `outcomes` in order.
    ///
    /// # Panics
    ///
    /// Panics if `outcomes` is empty.
    pub fn scripted(outcomes: Vec<Result<D, E>>) -> Self {
        assert!(!outcomes.is_empty(), "a scripted producer needs an outcome");
        Self {
            calls: CallCounter::new(),
            gate: Gate::closed(),
            gated: false,
            script: Mutex::new(outcomes.into()),
            _params: PhantomData,
        }
    }

    /// Producer that always succeeds with `value`.
    pub fn succeeding(value: D) -> Self {
        Self::scripted(vec![Ok(value)])
    }

    /// Producer that always fails with `error`.
    pub fn failing(error: impl Into<E>) -> Self {
        Self::scripted(vec![Err(error.into())])
    }

    /// Hold every invocation until the gate lets it through.
    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    /// Handle onto the invocation count.
    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Handle onto the release gate.
    pub fn gate(&self) -> Gate {
        self.gate.clone()
    }

    fn next_outcome(&self) -> Result<D, E> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        if script.len() > 1 {
            script.pop_front().expect("script length checked")
        } else {
            script.front().cloned().expect("script is never empty")
        }
    }
}

#[async_trait]
impl<D, E, P> Producer for MockProducer<D, E, P>
where
    D: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    P: Send + 'static,
{
    type Params = P;
    type Output = D;
    type Error = E;

    async fn produce(&self, _params: P) -> Result<D, E> {
        self.calls.bump();
        let outcome = self.next_outcome();
        if self.gated {
            self.gate.pass().await;
        }
        outcome
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// One currency entry of the price document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub rate: String,
    #[serde(default)]
    pub rate_float: f64,
    #[serde(default)]
    pub symbol: String,
}

impl Rate {
    pub fn new(code: impl Into<String>, rate: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: String::new(),
            rate: rate.into(),
            rate_float: 0.0,
            symbol: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bpi {
    #[serde(rename = "USD")]
    pub usd: Rate,
    #[serde(rename = "EUR")]
    pub eur: Rate,
}

/// Price document used by scenario tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coins {
    pub bpi: Bpi,
}

impl Coins {
    pub fn from_rates(usd: impl Into<String>, eur: impl Into<String>) -> Self {
        Self {
            bpi: Bpi {
                usd: Rate::new("USD", usd),
                eur: Rate::new("EUR", eur),
            },
        }
    }
}

/// A fully populated price document, as a live producer would return it.
pub fn coins_fixture() -> Coins {
    serde_json::from_str(
        r#"{
            "bpi": {
                "USD": {
                    "code": "USD",
                    "description": "United States Dollar",
                    "rate": "29,517.1230",
                    "rate_float": 29517.123,
                    "symbol": "&#36;"
                },
                "EUR": {
                    "code": "EUR",
                    "description": "Euro",
                    "rate": "27,305.4150",
                    "rate_float": 27305.415,
                    "symbol": "&euro;"
                }
            }
        }"#,
    )
    .expect("fixture is valid JSON")
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `warn`. Safe to call from every test;
/// only the first call installs anything.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for registry keys and producer outcomes.

    use proptest::prelude::*;

    /// Generate a registry key.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_:-]{0,15}"
    }

    /// Generate a set of distinct registry keys.
    pub fn arb_distinct_keys(max: usize) -> impl Strategy<Value = Vec<String>> {
        proptest::collection::hash_set(arb_key(), 1..=max)
            .prop_map(|keys| keys.into_iter().collect())
    }

    /// Generate a producer failure message.
    pub fn arb_error() -> impl Strategy<Value = String> {
        "[a-z ]{1,24}"
    }

    /// Generate a single producer outcome.
    pub fn arb_outcome() -> impl Strategy<Value = Result<u32, String>> {
        prop_oneof![any::<u32>().prop_map(Ok), arb_error().prop_map(Err)]
    }

    /// Generate a non-empty script of producer outcomes.
    pub fn arb_outcomes(max: usize) -> impl Strategy<Value = Vec<Result<u32, String>>> {
        proptest::collection::vec(arb_outcome(), 1..=max)
    }

    /// Generate how many callers pile onto one pending operation.
    pub fn arb_caller_count() -> impl Strategy<Value = usize> {
        1usize..=16
    }
}
