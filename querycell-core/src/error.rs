//! Error types for querycell operations
//!
//! Producer failures are not represented here: they are data, stored on the
//! result that ran the producer. These types cover misuse of the registry
//! and invalid configuration only.

use thiserror::Error;

/// Registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Type mismatch for key {key:?}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all querycell errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryCellError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for querycell operations.
pub type QueryCellResult<T> = Result<T, QueryCellError>;

// =============================================================================
// TESTS
// =============================================================================
