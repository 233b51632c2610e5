//! Exchange error types.
//!
//! Every fallible public operation returns one of these at the API
//! boundary. Internal invariant violations (ledger inconsistency, a bet
//! indexed by a book that no longer exists) are not represented here: they
//! abort the owning market task instead of flowing back as values.

use thiserror::Error;

/// Errors surfaced by the exchange API.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Exchange already running: {0}")]
    AlreadyRunning(String),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// True when the error indicates a lost market task rather than a
    /// caller mistake.
    pub fn is_internal(&self) -> bool {
        matches!(self, ExchangeError::Internal(_))
    }
}
