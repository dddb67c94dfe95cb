//! Asset Ledger Errors

use lib_types::Amount;
use thiserror::Error;

/// Error during asset ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Asset already exists: {0}")]
    AssetAlreadyExists(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Asset is not reissuable: {0}")]
    NotReissuable(String),

    #[error("Invalid asset name: {0}")]
    InvalidAssetName(String),

    #[error("Invalid asset payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid amount {amount} for {name}")]
    InvalidAmount { name: String, amount: Amount },

    #[error("Asset script has no destination")]
    MissingDestination,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Arithmetic underflow: {0}")]
    Underflow(String),

    #[error("Metadata cache capacity must be non-zero")]
    ZeroCapacity,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

impl TokenError {
    /// Errors that indicate the caller broke a ledger precondition rather
    /// than presenting bad input
    pub fn is_fatal(&self) -> bool {
        matches!(self, TokenError::Underflow(_) | TokenError::Corrupted(_))
    }
}

/// Result type for asset ledger operations
pub type TokenResult<T> = Result<T, TokenError>;
