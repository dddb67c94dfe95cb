//! Execution Errors
//!
//! A block either applies completely or leaves the tip caches untouched.
//! Rejections of the data carry the failing transaction; contract breaches
//! surface through [`BlockApplyError::is_fatal`].

use thiserror::Error;

use lib_tokens::TokenError;
use lib_types::{BlockHash, OutPoint};
use lib_utxo::UtxoError;

use crate::storage::StorageError;
use crate::validation::TxValidateError;

/// Error during block connection or disconnection
#[derive(Error, Debug)]
pub enum BlockApplyError {
    #[error("Invalid previous block hash: expected {expected}, got {actual}")]
    InvalidPreviousHash { expected: BlockHash, actual: BlockHash },

    #[error("Block {actual} is not the tip {expected}")]
    NotTip { expected: BlockHash, actual: BlockHash },

    #[error("Empty block (no transactions)")]
    EmptyBlock,

    #[error("Invalid transaction root")]
    InvalidTxRoot,

    #[error("First transaction is not a coinbase")]
    MissingCoinbase,

    #[error("Unexpected coinbase at index {index}")]
    UnexpectedCoinbase { index: usize },

    #[error("Transaction rejected at index {index}: {error}")]
    TxRejected { index: usize, error: TxValidateError },

    #[error("Validated input vanished: {0}")]
    MissingInput(OutPoint),

    #[error("Undo data does not match block: {0}")]
    UndoMismatch(String),

    #[error("Coin cache error: {0}")]
    Utxo(#[from] UtxoError),

    #[error("Asset ledger error: {0}")]
    Token(#[from] TokenError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl BlockApplyError {
    /// True when the caches can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        match self {
            BlockApplyError::Utxo(e) => e.is_fatal(),
            BlockApplyError::Token(e) => e.is_fatal(),
            BlockApplyError::MissingInput(_) | BlockApplyError::UndoMismatch(_) => true,
            _ => false,
        }
    }

    /// Stable rejection reason, when the block was rejected for a transaction
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            BlockApplyError::TxRejected { error, .. } => Some(error.reason()),
            _ => None,
        }
    }
}

pub type BlockApplyResult<T> = Result<T, BlockApplyError>;
