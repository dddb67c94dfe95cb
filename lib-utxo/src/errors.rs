//! UTXO Errors

use thiserror::Error;
use lib_types::OutPoint;

/// Error during coin cache operations
///
/// Precondition violations are contract breaches by the caller (or by a
/// child cache) and are never a property of the data being validated.
/// Callers must treat them as unrecoverable; see [`UtxoError::is_fatal`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UtxoError {
    // =========================================================================
    // Precondition violations (fatal)
    // =========================================================================

    #[error("attempted to overwrite an unspent coin at {0} without the overwrite flag")]
    OverwriteUnspent(OutPoint),

    #[error("fresh flag misapplied to {0}: the parent cache holds an unspent coin")]
    FreshMisapplied(OutPoint),

    #[error("attempted to add an already spent coin at {0}")]
    SpentCoinAdded(OutPoint),

    // =========================================================================
    // Storage errors
    // =========================================================================

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted coin data: {0}")]
    Corrupted(String),
}

impl UtxoError {
    /// True for contract violations that must abort block processing
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            UtxoError::OverwriteUnspent(_)
                | UtxoError::FreshMisapplied(_)
                | UtxoError::SpentCoinAdded(_)
        )
    }
}

/// Result type for UTXO operations
pub type UtxoResult<T> = Result<T, UtxoError>;
