//! UTXO Types
//!
//! Coins and the cache entries that wrap them.

use std::collections::HashMap;
use std::mem;

use serde::{Deserialize, Serialize};
use lib_types::{Amount, BlockHeight, OutPoint};

/// First byte of a provably unspendable (data carrier) script
pub const OP_RETURN: u8 = 0x6a;

/// One unspent transaction output together with its creation context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Value of the output in base units
    pub amount: Amount,
    /// Locking script (may embed an asset payload)
    pub script: Vec<u8>,
    /// Height of the block that created the output
    pub height: BlockHeight,
    /// Created by a coinbase transaction
    pub coinbase: bool,
    /// Created by a coinstake transaction
    pub coinstake: bool,
    /// Timestamp of the creating transaction
    pub time: u32,
    spent: bool,
}

impl Coin {
    /// Create a regular (non-reward) coin
    pub fn new(amount: Amount, script: Vec<u8>, height: BlockHeight, time: u32) -> Self {
        Self {
            amount,
            script,
            height,
            coinbase: false,
            coinstake: false,
            time,
            spent: false,
        }
    }

    /// Mark as created by a coinbase transaction
    pub fn with_coinbase(mut self, coinbase: bool) -> Self {
        self.coinbase = coinbase;
        self
    }

    /// Mark as created by a coinstake transaction
    pub fn with_coinstake(mut self, coinstake: bool) -> Self {
        self.coinstake = coinstake;
        self
    }

    /// The placeholder stored in an entry that holds no coin
    pub fn spent_marker() -> Self {
        Self {
            amount: -1,
            script: Vec::new(),
            height: 0,
            coinbase: false,
            coinstake: false,
            time: 0,
            spent: true,
        }
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }

    /// Drop the output data and set the spent marker
    pub fn clear(&mut self) {
        *self = Self::spent_marker();
    }

    /// Requires maturity before it may be spent
    pub fn is_reward(&self) -> bool {
        self.coinbase || self.coinstake
    }

    /// Data-carrier outputs never enter the coin set
    pub fn is_unspendable(&self) -> bool {
        self.script.first() == Some(&OP_RETURN)
    }

    /// Heap plus inline footprint used for cache accounting
    pub fn dynamic_usage(&self) -> usize {
        mem::size_of::<Self>() + self.script.capacity()
    }
}

/// A coin as held by one cache level
///
/// - `dirty`: differs from the backing view and must be written on flush
/// - `fresh`: the backing view has no unspent coin for this outpoint, so a
///   spend may simply drop the entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinEntry {
    pub coin: Coin,
    pub dirty: bool,
    pub fresh: bool,
}

impl CoinEntry {
    /// Clean entry loaded from the backing view
    pub fn clean(coin: Coin) -> Self {
        Self { coin, dirty: false, fresh: false }
    }

    /// Entry with no coin and no flags, ready to be filled in
    pub fn empty() -> Self {
        Self::clean(Coin::spent_marker())
    }

    /// Memoized miss: the backing view has nothing for this outpoint
    pub fn absent() -> Self {
        Self { coin: Coin::spent_marker(), dirty: false, fresh: true }
    }

    pub fn dirty(coin: Coin, fresh: bool) -> Self {
        Self { coin, dirty: true, fresh }
    }

    pub fn memory_usage(&self) -> usize {
        self.coin.dynamic_usage() + mem::size_of::<OutPoint>() + 2
    }
}

/// Map handed from a child cache to its parent on flush
pub type CoinsMap = HashMap<OutPoint, CoinEntry>;
