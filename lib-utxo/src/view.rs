//! Coin Views
//!
//! A [`CoinsView`] answers "is this output unspent, and what is it?" and
//! accepts batches of dirty entries from a cache stacked on top of it.
//! Durable stores and [`crate::CoinsViewCache`] both implement it, so caches
//! can be layered to any depth.

use std::collections::HashMap;

use lib_types::{BlockHash, OutPoint};

use crate::errors::{UtxoError, UtxoResult};
use crate::types::{Coin, CoinsMap};

/// Trait for coin storage layers
///
/// Implementations must only return unspent coins from `get_coin`.
pub trait CoinsView: Send + Sync {
    /// Look up an unspent coin
    fn get_coin(&self, outpoint: &OutPoint) -> UtxoResult<Option<Coin>>;

    /// Check whether an unspent coin exists
    fn have_coin(&self, outpoint: &OutPoint) -> UtxoResult<bool> {
        Ok(self.get_coin(outpoint)?.is_some())
    }

    /// Hash of the block this view is consistent with
    fn best_block(&self) -> UtxoResult<BlockHash>;

    /// Merge the dirty entries of a child cache and record the new tip
    ///
    /// Entries without the dirty flag are ignored. Implementations must
    /// either apply the whole batch or none of it.
    fn batch_write(&mut self, coins: &CoinsMap, best_block: BlockHash) -> UtxoResult<()>;

    /// Rough on-disk/in-memory size in bytes
    fn estimate_size(&self) -> usize {
        0
    }
}

/// In-memory terminal view
///
/// Counts every key it writes so tests can observe exactly what a flush
/// pushed down, and can be switched into a failing mode to exercise error
/// paths.
#[derive(Debug, Default)]
pub struct MemoryCoinsView {
    coins: HashMap<OutPoint, Coin>,
    best_block: BlockHash,
    writes: usize,
    fail_writes: bool,
}

impl MemoryCoinsView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a coin directly, bypassing any cache
    pub fn insert(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    /// Number of keys written or erased by `batch_write` so far
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    /// Make every subsequent `batch_write` fail with a storage error
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl CoinsView for MemoryCoinsView {
    fn get_coin(&self, outpoint: &OutPoint) -> UtxoResult<Option<Coin>> {
        Ok(self.coins.get(outpoint).filter(|c| !c.is_spent()).cloned())
    }

    fn best_block(&self) -> UtxoResult<BlockHash> {
        Ok(self.best_block)
    }

    fn batch_write(&mut self, coins: &CoinsMap, best_block: BlockHash) -> UtxoResult<()> {
        if self.fail_writes {
            return Err(UtxoError::Storage("memory view write failure".to_string()));
        }
        for (outpoint, entry) in coins.iter().filter(|(_, e)| e.dirty) {
            if entry.coin.is_spent() {
                self.coins.remove(outpoint);
            } else {
                self.coins.insert(*outpoint, entry.coin.clone());
            }
            self.writes += 1;
        }
        self.best_block = best_block;
        Ok(())
    }

    fn estimate_size(&self) -> usize {
        self.coins.values().map(Coin::dynamic_usage).sum()
    }
}
