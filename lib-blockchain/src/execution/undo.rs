//! Block Undo Records
//!
//! Connecting a block spends coins; disconnecting it must put them back
//! exactly. [`BlockUndo`] keeps every spent coin, per transaction, in input
//! order. Reissue priors live with the asset ledger under the block hash.

use serde::{Deserialize, Serialize};

use lib_utxo::Coin;

/// Coins spent by one transaction, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxUndo {
    pub spent: Vec<Coin>,
}

/// Undo data for a connected block, one entry per transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub txs: Vec<TxUndo>,
}

impl BlockUndo {
    pub fn spent_count(&self) -> usize {
        self.txs.iter().map(|tx| tx.spent.len()).sum()
    }
}
