//! Chain-State Storage Layer
//!
//! Durable backing for the coin and asset caches. The caches never see sled
//! directly; they talk to [`CoinsDb`] and [`AssetsDb`] through the
//! `CoinsView` and `AssetsView` traits.
//!
//! # Data Model Invariants
//!
//! 1. **Writes arrive in batches** - every cache flush is one sled batch per
//!    tree, applied all or nothing.
//! 2. **Zero is absence** - a zero asset balance is never stored.
//! 3. **Errors are not misses** - an I/O or decode failure is reported as an
//!    error, never as "not found".
//! 4. Key encoding is protocol - see `keys.rs`.

pub mod keys;
pub mod sled_store;

use thiserror::Error;

use lib_tokens::TokenError;
use lib_utxo::UtxoError;

pub use keys::AddressIndexKey;
pub use sled_store::{AssetsDb, CoinsDb, SledStore};

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Store format version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<StorageError> for UtxoError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::CorruptedData(msg) => UtxoError::Corrupted(msg),
            other => UtxoError::Storage(other.to_string()),
        }
    }
}

impl From<StorageError> for TokenError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::CorruptedData(msg) => TokenError::Corrupted(msg),
            other => TokenError::Storage(other.to_string()),
        }
    }
}

// =============================================================================
// PAGINATION
// =============================================================================

/// Take `count` items starting at `start`
///
/// A negative `start` counts back from the end of the listing, so
/// `start = -10` with `count = 10` yields the last ten entries.
pub fn paginate<T>(items: Vec<T>, count: usize, start: i64) -> Vec<T> {
    let skip = if start >= 0 {
        usize::try_from(start).unwrap_or(usize::MAX)
    } else {
        let back = usize::try_from(start.unsigned_abs()).unwrap_or(usize::MAX);
        items.len().saturating_sub(back)
    };
    items.into_iter().skip(skip).take(count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_paginate_forward_and_backward() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(paginate(items.clone(), 3, 0), vec![0, 1, 2]);
        assert_eq!(paginate(items.clone(), 3, 8), vec![8, 9]);
        assert_eq!(paginate(items.clone(), 3, -3), vec![7, 8, 9]);
        assert_eq!(paginate(items.clone(), 2, -3), vec![7, 8]);
        assert_eq!(paginate(items.clone(), 5, -50), vec![0, 1, 2, 3, 4]);
        assert!(paginate(items, 5, 50).is_empty());
    }

    #[test]
    fn test_storage_errors_keep_their_meaning() {
        let utxo: UtxoError = StorageError::CorruptedData("bad coin".into()).into();
        assert_eq!(utxo, UtxoError::Corrupted("bad coin".into()));

        let token: TokenError = StorageError::Database("io".into()).into();
        assert!(matches!(token, TokenError::Storage(_)));
    }

    proptest! {
        #[test]
        fn prop_paginate_is_a_contiguous_window(
            len in 0usize..40,
            count in 0usize..20,
            start in -50i64..50,
        ) {
            let items: Vec<usize> = (0..len).collect();
            let page = paginate(items, count, start);
            prop_assert!(page.len() <= count);
            prop_assert!(page.windows(2).all(|w| w[1] == w[0] + 1));
            if start < 0 && count >= len {
                prop_assert_eq!(page.last().copied(), len.checked_sub(1));
            }
        }
    }
}
