//! Error types for repartir.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// repartir error types
#[derive(Error, Debug)]
pub enum Error {
    /// Experiment has neither a persisted definition nor a configuration entry
    #[error("experiment '{0}' not found: no persisted definition and no configuration entry")]
    ExperimentNotFound(String),

    /// Alternative definition rejected at construction/validation
    #[error("invalid alternative: {0}")]
    InvalidAlternative(String),

    /// Goals must be a sequence of strings
    #[error("invalid goals: {0}")]
    InvalidGoals(String),

    /// Persisted algorithm tag does not name a known variant
    #[error("unknown assignment algorithm '{0}' (expected 'weighted_random' or 'deterministic_hash')")]
    UnknownAlgorithm(String),

    /// Store key already holds a different collection kind
    #[error("store key '{0}' holds a different value kind")]
    WrongType(String),

    /// Backend connectivity failure. Propagates unless db-failover is enabled.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
