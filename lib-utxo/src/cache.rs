//! Layered Coin Cache
//!
//! [`CoinsViewCache`] is a write-back cache stacked on a borrowed
//! [`CoinsView`]. Reads fall through to the backing view and are memoized;
//! writes stay local until [`CoinsViewCache::flush`] merges them into the
//! backing view with [`CoinsView::batch_write`].
//!
//! # Flag Rules
//!
//! | operation | effect |
//! |-----------|--------|
//! | miss from backing view | memoized as a spent entry flagged Fresh |
//! | `add_coin` | Dirty; Fresh only if overwrite is not allowed and the slot has no Dirty history |
//! | `spend_coin` on Fresh | entry is dropped, nothing reaches the parent |
//! | `spend_coin` otherwise | coin cleared, Dirty (tombstone propagates) |
//!
//! An entry is never Fresh while the backing view holds an unspent coin for
//! the same outpoint. Breaking that is a precondition violation.

use std::collections::hash_map::Entry;

use parking_lot::Mutex;
use tracing::{debug, error};

use lib_types::{BlockHash, OutPoint};

use crate::errors::{UtxoError, UtxoResult};
use crate::types::{Coin, CoinEntry, CoinsMap};
use crate::view::CoinsView;

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub dirty_entries: usize,
    pub memory_usage: usize,
}

#[derive(Default)]
struct CacheState {
    entries: CoinsMap,
    best_block: Option<BlockHash>,
    memory_usage: usize,
    hits: u64,
    misses: u64,
}

/// Write-back coin cache layered over a borrowed parent view
pub struct CoinsViewCache<'a> {
    base: &'a mut dyn CoinsView,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for CoinsViewCache<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CoinsViewCache")
            .field("entries", &state.entries.len())
            .field("best_block", &state.best_block)
            .finish_non_exhaustive()
    }
}

impl<'a> CoinsViewCache<'a> {
    /// Create an empty cache on top of `base`
    pub fn new(base: &'a mut dyn CoinsView) -> Self {
        Self {
            base,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// The view this cache flushes into
    pub fn base(&self) -> &dyn CoinsView {
        &*self.base
    }

    /// Load the entry for `outpoint` into `state`, consulting the base on a miss
    fn fetch<'s>(
        base: &dyn CoinsView,
        state: &'s mut CacheState,
        outpoint: &OutPoint,
    ) -> UtxoResult<&'s mut CoinEntry> {
        let CacheState { entries, memory_usage, hits, misses, .. } = state;
        match entries.entry(*outpoint) {
            Entry::Occupied(slot) => {
                *hits += 1;
                Ok(slot.into_mut())
            }
            Entry::Vacant(slot) => {
                *misses += 1;
                let entry = match base.get_coin(outpoint)? {
                    Some(coin) if !coin.is_spent() => CoinEntry::clean(coin),
                    _ => CoinEntry::absent(),
                };
                *memory_usage += entry.memory_usage();
                Ok(slot.insert(entry))
            }
        }
    }

    /// Look up an unspent coin, memoizing the answer
    pub fn get_coin(&self, outpoint: &OutPoint) -> UtxoResult<Option<Coin>> {
        let mut state = self.state.lock();
        let entry = Self::fetch(&*self.base, &mut state, outpoint)?;
        Ok((!entry.coin.is_spent()).then(|| entry.coin.clone()))
    }

    /// Check whether an unspent coin exists
    pub fn have_coin(&self, outpoint: &OutPoint) -> UtxoResult<bool> {
        Ok(self.get_coin(outpoint)?.is_some())
    }

    /// Check for an unspent coin without touching the base
    pub fn have_coin_in_cache(&self, outpoint: &OutPoint) -> bool {
        self.state
            .lock()
            .entries
            .get(outpoint)
            .is_some_and(|e| !e.coin.is_spent())
    }

    /// Copy of the local entry, if any, without consulting the base
    pub fn peek_entry(&self, outpoint: &OutPoint) -> Option<CoinEntry> {
        self.state.lock().entries.get(outpoint).cloned()
    }

    /// Add a coin
    ///
    /// With `possible_overwrite == false` the caller asserts the slot holds
    /// no unspent coin; breaking that is a precondition violation.
    /// Unspendable outputs are silently skipped.
    pub fn add_coin(&self, outpoint: &OutPoint, coin: Coin, possible_overwrite: bool) -> UtxoResult<()> {
        if coin.is_spent() {
            error!(%outpoint, "refusing to add spent coin");
            return Err(UtxoError::SpentCoinAdded(*outpoint));
        }
        if coin.is_unspendable() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let CacheState { entries, memory_usage, .. } = &mut *state;
        let entry = entries.entry(*outpoint).or_insert_with(CoinEntry::empty);

        let mut fresh = false;
        if !possible_overwrite {
            if !entry.coin.is_spent() {
                error!(%outpoint, "attempted to overwrite an unspent coin");
                return Err(UtxoError::OverwriteUnspent(*outpoint));
            }
            // A spent entry that is not dirty carries no pending tombstone, so
            // nothing below needs to hear about this slot.
            fresh = !entry.dirty;
        }

        *memory_usage = memory_usage.saturating_sub(entry.memory_usage());
        entry.coin = coin;
        entry.dirty = true;
        if fresh {
            entry.fresh = true;
        }
        *memory_usage += entry.memory_usage();
        Ok(())
    }

    /// Spend a coin, returning it if it was unspent
    pub fn spend_coin(&self, outpoint: &OutPoint) -> UtxoResult<Option<Coin>> {
        let mut state = self.state.lock();
        let entry = Self::fetch(&*self.base, &mut state, outpoint)?;
        if entry.coin.is_spent() {
            return Ok(None);
        }

        let spent = entry.coin.clone();
        let before = entry.memory_usage();
        if entry.fresh {
            state.entries.remove(outpoint);
            state.memory_usage = state.memory_usage.saturating_sub(before);
        } else {
            entry.dirty = true;
            entry.coin.clear();
            let after = entry.memory_usage();
            state.memory_usage = state.memory_usage.saturating_sub(before) + after;
        }
        Ok(Some(spent))
    }

    /// Drop a clean entry to reclaim memory
    pub fn uncache(&self, outpoint: &OutPoint) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(outpoint) {
            if !entry.dirty && !entry.fresh {
                let usage = entry.memory_usage();
                state.entries.remove(outpoint);
                state.memory_usage = state.memory_usage.saturating_sub(usage);
            }
        }
    }

    /// Tip this cache is consistent with, inherited from the base until set
    pub fn best_block(&self) -> UtxoResult<BlockHash> {
        let mut state = self.state.lock();
        if let Some(hash) = state.best_block {
            return Ok(hash);
        }
        let hash = self.base.best_block()?;
        state.best_block = Some(hash);
        Ok(hash)
    }

    pub fn set_best_block(&self, hash: BlockHash) {
        self.state.lock().best_block = Some(hash);
    }

    /// Push every entry into the base and empty the cache
    ///
    /// On failure the cache is left untouched so the flush can be retried.
    pub fn flush(&mut self) -> UtxoResult<()> {
        let best_block = self.best_block()?;
        let state = self.state.get_mut();
        let dirty = state.entries.values().filter(|e| e.dirty).count();

        self.base.batch_write(&state.entries, best_block)?;

        debug!(entries = state.entries.len(), dirty, %best_block, "flushed coin cache");
        state.entries.clear();
        state.memory_usage = 0;
        Ok(())
    }

    pub fn cache_size(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn dynamic_memory_usage(&self) -> usize {
        self.state.lock().memory_usage
    }

    pub fn stats(&self) -> CoinCacheStats {
        let state = self.state.lock();
        CoinCacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
            dirty_entries: state.entries.values().filter(|e| e.dirty).count(),
            memory_usage: state.memory_usage,
        }
    }
}

impl CoinsView for CoinsViewCache<'_> {
    fn get_coin(&self, outpoint: &OutPoint) -> UtxoResult<Option<Coin>> {
        CoinsViewCache::get_coin(self, outpoint)
    }

    fn best_block(&self) -> UtxoResult<BlockHash> {
        CoinsViewCache::best_block(self)
    }

    /// Merge a child cache
    ///
    /// 1. absent here, not (Fresh and spent) in child: insert Dirty, Fresh iff child Fresh
    /// 2. absent here, Fresh and spent in child: nothing to do
    /// 3. Fresh here and spent in child: drop the entry
    /// 4. otherwise: overwrite the coin and mark Dirty; the child's Fresh flag does not carry over
    ///
    /// The batch is checked for fatal conflicts before anything is applied.
    fn batch_write(&mut self, coins: &CoinsMap, best_block: BlockHash) -> UtxoResult<()> {
        let state = self.state.get_mut();

        for outpoint in coins.iter().filter(|(_, e)| e.dirty && e.fresh).map(|(op, _)| op) {
            if let Some(ours) = state.entries.get(outpoint) {
                if !ours.coin.is_spent() {
                    error!(%outpoint, "fresh flag misapplied to coin that exists in parent cache");
                    return Err(UtxoError::FreshMisapplied(*outpoint));
                }
            }
        }

        let CacheState { entries, memory_usage, .. } = &mut *state;
        for (outpoint, child) in coins.iter().filter(|(_, e)| e.dirty) {
            match entries.entry(*outpoint) {
                Entry::Vacant(slot) => {
                    if child.fresh && child.coin.is_spent() {
                        continue;
                    }
                    let entry = CoinEntry::dirty(child.coin.clone(), child.fresh);
                    *memory_usage += entry.memory_usage();
                    slot.insert(entry);
                }
                Entry::Occupied(mut slot) => {
                    let ours = slot.get_mut();
                    let before = ours.memory_usage();
                    if ours.fresh && child.coin.is_spent() {
                        slot.remove();
                        *memory_usage = memory_usage.saturating_sub(before);
                    } else {
                        ours.coin = child.coin.clone();
                        ours.dirty = true;
                        *memory_usage = memory_usage.saturating_sub(before) + ours.memory_usage();
                    }
                }
            }
        }

        state.best_block = Some(best_block);
        Ok(())
    }

    fn estimate_size(&self) -> usize {
        self.base.estimate_size()
    }
}
