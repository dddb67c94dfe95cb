//! Asset Views
//!
//! [`AssetsView`] is implemented by durable stores and by
//! [`crate::AssetsCache`], so ledger caches stack the same way coin caches
//! do. A view separates what is *pending* (held in a cache overlay and not
//! yet durable) from what is *stored*, which lets the top cache consult
//! every overlay before the shared metadata cache and the database.

use std::collections::{BTreeMap, HashMap};

use lib_types::{Address, Amount, BlockHash, TxHash};

use crate::asset::AssetRecord;
use crate::errors::{TokenError, TokenResult};
use crate::journal::{AssetMutation, AssetUndoEntry};

/// One durable write with its final value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetWrite {
    PutAsset(AssetRecord),
    EraseAsset(String),
    PutBalance {
        name: String,
        address: Address,
        amount: Amount,
    },
    EraseBalance {
        name: String,
        address: Address,
    },
    PutBlockUndo {
        block_hash: BlockHash,
        entries: Vec<AssetUndoEntry>,
    },
    EraseBlockUndo(BlockHash),
    PutReissueLocks(BTreeMap<String, TxHash>),
}

/// Ordered writes plus the journal that produced them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetBatch {
    pub writes: Vec<AssetWrite>,
    pub mutations: Vec<AssetMutation>,
}

impl AssetBatch {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.mutations.is_empty()
    }
}

/// Trait for asset ledger storage layers
pub trait AssetsView: Send + Sync {
    /// Pending descriptor state across this view and any view below it
    ///
    /// `Some(None)` means an overlay erased the asset; `None` means no
    /// overlay has an opinion.
    fn pending_asset(&self, _name: &str) -> Option<Option<AssetRecord>> {
        None
    }

    /// Pending balance across this view and any view below it
    fn pending_balance(&self, _name: &str, _address: &Address) -> Option<Amount> {
        None
    }

    /// Descriptor as held by durable storage
    fn stored_asset(&self, name: &str) -> TokenResult<Option<AssetRecord>>;

    /// Balance as held by durable storage (zero when absent)
    fn stored_balance(&self, name: &str, address: &Address) -> TokenResult<Amount>;

    /// Reissue undo entries recorded for a block
    fn block_undo(&self, block_hash: &BlockHash) -> TokenResult<Option<Vec<AssetUndoEntry>>>;

    /// Apply a flushed batch; all or nothing
    fn write_batch(&mut self, batch: &AssetBatch) -> TokenResult<()>;

    /// True for views backed by durable storage
    fn is_durable(&self) -> bool {
        true
    }
}

/// In-memory durable stand-in
///
/// Counts every key it writes and can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    assets: HashMap<String, AssetRecord>,
    balances: HashMap<(String, Address), Amount>,
    undo: HashMap<BlockHash, Vec<AssetUndoEntry>>,
    reissue_locks: BTreeMap<String, TxHash>,
    writes: usize,
    fail_writes: bool,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys written or erased so far
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn reissue_locks(&self) -> &BTreeMap<String, TxHash> {
        &self.reissue_locks
    }

    /// Sum of stored balances for a name
    pub fn circulating(&self, name: &str) -> Amount {
        self.balances
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, amount)| *amount)
            .sum()
    }

    pub fn balance_count(&self) -> usize {
        self.balances.len()
    }
}

impl AssetsView for MemoryAssetStore {
    fn stored_asset(&self, name: &str) -> TokenResult<Option<AssetRecord>> {
        Ok(self.assets.get(name).cloned())
    }

    fn stored_balance(&self, name: &str, address: &Address) -> TokenResult<Amount> {
        Ok(self
            .balances
            .get(&(name.to_string(), *address))
            .copied()
            .unwrap_or(0))
    }

    fn block_undo(&self, block_hash: &BlockHash) -> TokenResult<Option<Vec<AssetUndoEntry>>> {
        Ok(self.undo.get(block_hash).cloned())
    }

    fn write_batch(&mut self, batch: &AssetBatch) -> TokenResult<()> {
        if self.fail_writes {
            return Err(TokenError::Storage("memory store write failure".to_string()));
        }
        for write in &batch.writes {
            match write {
                AssetWrite::PutAsset(record) => {
                    self.assets.insert(record.name().to_string(), record.clone());
                }
                AssetWrite::EraseAsset(name) => {
                    self.assets.remove(name);
                }
                AssetWrite::PutBalance { name, address, amount } => {
                    self.balances.insert((name.clone(), *address), *amount);
                }
                AssetWrite::EraseBalance { name, address } => {
                    self.balances.remove(&(name.clone(), *address));
                }
                AssetWrite::PutBlockUndo { block_hash, entries } => {
                    self.undo.insert(*block_hash, entries.clone());
                }
                AssetWrite::EraseBlockUndo(block_hash) => {
                    self.undo.remove(block_hash);
                }
                AssetWrite::PutReissueLocks(locks) => {
                    self.reissue_locks = locks.clone();
                }
            }
            self.writes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetDescriptor;
    use lib_types::COIN;

    #[test]
    fn test_memory_store_applies_writes_in_order() {
        let mut store = MemoryAssetStore::new();
        let holder = Address::new([2; 20]);
        let record = AssetRecord {
            descriptor: AssetDescriptor::new("GOLD", COIN, 0, true),
            height: 3,
            block_hash: BlockHash::new([3; 32]),
        };
        let batch = AssetBatch {
            writes: vec![
                AssetWrite::PutAsset(record.clone()),
                AssetWrite::PutBalance { name: "GOLD".into(), address: holder, amount: COIN },
                AssetWrite::EraseBalance { name: "GOLD".into(), address: holder },
            ],
            mutations: vec![],
        };
        store.write_batch(&batch).unwrap();

        assert_eq!(store.stored_asset("GOLD").unwrap(), Some(record));
        assert_eq!(store.stored_balance("GOLD", &holder).unwrap(), 0);
        assert_eq!(store.writes(), 3);
    }

    #[test]
    fn test_memory_store_failure_writes_nothing() {
        let mut store = MemoryAssetStore::new();
        store.set_fail_writes(true);
        let batch = AssetBatch {
            writes: vec![AssetWrite::EraseAsset("GOLD".into())],
            mutations: vec![],
        };
        assert!(matches!(store.write_batch(&batch), Err(TokenError::Storage(_))));
        assert_eq!(store.writes(), 0);
    }
}
