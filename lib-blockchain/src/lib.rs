//! Chain-State Core
//!
//! Durable coin and asset state for a UTXO chain with native assets.
//! Blocks are validated for value and token conservation and connected or
//! disconnected through [`ChainState`]; everything below it is reached
//! through the layered caches in `lib-utxo` and `lib-tokens`.

pub mod block;
pub mod config;
pub mod execution;
pub mod storage;
pub mod transaction;
pub mod validation;

// Block and transaction structures
pub use block::{Block, BlockHeader};
pub use transaction::{Transaction, TxIn, TxOut};

// Configuration
pub use config::{ChainStateConfig, ConfigError, MaturitySchedule, MaturityStep, COINBASE_MATURITY};

// Storage layer
pub use storage::{AddressIndexKey, AssetsDb, CoinsDb, SledStore, StorageError, StorageResult};

// Execution layer
pub use execution::{
    add_coins, BlockApplyError, BlockApplyResult, BlockUndo, ChainState, TxApplier, TxUndo,
};

// Validation layer
pub use validation::{
    check_transaction, check_tx_assets, check_tx_inputs, TxValidateError, TxValidateResult,
};

/// Chain-state on-disk format version
pub const CHAIN_STATE_VERSION: u32 = 1;
