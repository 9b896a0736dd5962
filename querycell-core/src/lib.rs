//! querycell Core - Shared Types
//!
//! Leaf crate of the workspace: the status model, the producer seam, the
//! error taxonomy and configuration. It holds no caching logic; see
//! `querycell-cache` for the result and registry implementations.

pub mod config;
pub mod error;
pub mod producer;
pub mod status;

pub use config::{RegistryConfig, ENV_EAGER_POLL, ENV_REGISTRY_NAME, ENV_SPAWN_DRIVER};
pub use error::{ConfigError, QueryCellError, QueryCellResult, RegistryError};
pub use producer::{producer_fn, FnProducer, Producer, SeededProducer, SharedProducer};
pub use status::{QuerySnapshot, QueryStatus};
