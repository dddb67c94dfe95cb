//! Transaction Application - Cache Mutation Primitives
//!
//! These are the only functions that write transactions into the coin and
//! asset caches. They run against per-block child caches; nothing reaches
//! the tip until the whole block has applied.
//!
//! # Invariants
//!
//! - Inputs are spent before outputs are added
//! - Disconnection walks outputs, then inputs, both in reverse
//! - Every asset movement has a mirrored address index entry

use tracing::warn;

use lib_tokens::{AssetPayload, AssetScriptCodec, AssetUndoEntry, AssetsCache};
use lib_types::{Amount, BlockHash, BlockHeight, OutPoint, TxHash};
use lib_utxo::{Coin, CoinsViewCache, UtxoResult, OP_RETURN};

use crate::storage::keys::{AddressIndexKey, ADDRESS_TYPE_PUBKEY_HASH, NATIVE_ASSET};
use crate::transaction::Transaction;

use super::errors::{BlockApplyError, BlockApplyResult};
use super::undo::TxUndo;

/// Add every output of `tx` to the coin cache
///
/// Coinbase outputs may overwrite an existing coin.
pub fn add_coins(coins: &CoinsViewCache<'_>, tx: &Transaction, height: BlockHeight) -> UtxoResult<()> {
    let txid = tx.hash();
    let coinbase = tx.is_coinbase();
    let coinstake = tx.is_coinstake();
    for (index, output) in (0u32..).zip(&tx.outputs) {
        let coin = Coin::new(output.value, output.script.clone(), height, tx.time)
            .with_coinbase(coinbase)
            .with_coinstake(coinstake);
        coins.add_coin(&OutPoint::new(txid, index), coin, coinbase)?;
    }
    Ok(())
}

/// Cache mutator for one block
pub struct TxApplier<'c, 'p> {
    pub coins: CoinsViewCache<'c>,
    pub assets: AssetsCache<'c>,
    codec: &'p dyn AssetScriptCodec,
    height: BlockHeight,
    block_hash: BlockHash,
    index_enabled: bool,
    /// Reissue priors, in the order the reissuances were applied
    reissue_undo: Vec<AssetUndoEntry>,
    /// Address index entries with their signed amounts
    index: Vec<(AddressIndexKey, Amount)>,
}

impl<'c, 'p> TxApplier<'c, 'p> {
    pub fn new(
        coins: CoinsViewCache<'c>,
        assets: AssetsCache<'c>,
        codec: &'p dyn AssetScriptCodec,
        height: BlockHeight,
        block_hash: BlockHash,
        index_enabled: bool,
    ) -> Self {
        Self {
            coins,
            assets,
            codec,
            height,
            block_hash,
            index_enabled,
            reissue_undo: Vec::new(),
            index: Vec::new(),
        }
    }

    /// Seed the reissue priors of the block being disconnected
    pub fn with_reissue_undo(mut self, entries: Vec<AssetUndoEntry>) -> Self {
        self.reissue_undo = entries;
        self
    }

    pub fn reissue_undo(&self) -> &[AssetUndoEntry] {
        &self.reissue_undo
    }

    pub fn take_reissue_undo(&mut self) -> Vec<AssetUndoEntry> {
        std::mem::take(&mut self.reissue_undo)
    }

    pub fn take_index(&mut self) -> Vec<(AddressIndexKey, Amount)> {
        std::mem::take(&mut self.index)
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Spend the inputs and add the outputs of a validated transaction
    pub fn connect_tx(&mut self, tx: &Transaction, tx_index: u32) -> BlockApplyResult<TxUndo> {
        let txid = tx.hash();
        let mut undo = TxUndo::default();

        if !tx.is_coinbase() {
            for (input_index, input) in (0u32..).zip(&tx.inputs) {
                let coin = self
                    .coins
                    .spend_coin(&input.prevout)?
                    .ok_or(BlockApplyError::MissingInput(input.prevout))?;
                self.assets.spend(&input.prevout, &coin.script)?;
                self.index_coin(&coin.script, coin.amount, tx_index, txid, input_index, true)?;
                undo.spent.push(coin);
            }
        }

        add_coins(&self.coins, tx, self.height)?;

        for (output_index, output) in (0u32..).zip(&tx.outputs) {
            let outpoint = OutPoint::new(txid, output_index);
            if let Some((payload, holder)) = self.codec.decode_script(&output.script)? {
                match &payload {
                    AssetPayload::Issue(asset) => {
                        self.assets.register_issuance(asset, &holder, self.height, self.block_hash)?;
                    }
                    AssetPayload::Reissue(reissue) => {
                        let prior = self.assets.register_reissuance(reissue, &holder, &outpoint)?;
                        self.reissue_undo.push(prior);
                    }
                    AssetPayload::Transfer(transfer) => {
                        self.assets.register_transfer(transfer, &holder, &outpoint)?;
                    }
                    AssetPayload::Owner(name) => {
                        self.assets.register_owner_creation(name, &holder)?;
                    }
                }
            }
            self.index_coin(&output.script, output.value, tx_index, txid, output_index, false)?;
        }

        Ok(undo)
    }

    // =========================================================================
    // Disconnection
    // =========================================================================

    /// Remove the outputs and restore the inputs of a connected transaction
    pub fn disconnect_tx(&mut self, tx: &Transaction, tx_index: u32, undo: &TxUndo) -> BlockApplyResult<()> {
        let txid = tx.hash();

        for (output_index, output) in tx.outputs.iter().enumerate().rev() {
            let output_index = output_index as u32;
            let outpoint = OutPoint::new(txid, output_index);
            let spendable = output.script.first() != Some(&OP_RETURN);
            if self.coins.spend_coin(&outpoint)?.is_none() && spendable {
                warn!(%outpoint, "disconnected output was not in the coin set");
            }

            if let Some((payload, holder)) = self.codec.decode_script(&output.script)? {
                match &payload {
                    AssetPayload::Issue(asset) => self.assets.remove_issuance(&asset.name, &holder)?,
                    AssetPayload::Reissue(reissue) => {
                        let prior = self.reissue_undo.pop().ok_or_else(|| {
                            BlockApplyError::UndoMismatch(format!("no reissue undo for {}", reissue.name))
                        })?;
                        if prior.name != reissue.name {
                            return Err(BlockApplyError::UndoMismatch(format!(
                                "reissue undo for {} found {}",
                                reissue.name, prior.name
                            )));
                        }
                        self.assets.undo_reissuance(reissue, &holder, &outpoint, &prior)?;
                    }
                    AssetPayload::Transfer(transfer) => {
                        self.assets.remove_transfer(transfer, &holder, &outpoint)?;
                    }
                    AssetPayload::Owner(name) => self.assets.remove_owner_creation(name, &holder)?,
                }
            }
            self.index_coin(&output.script, output.value, tx_index, txid, output_index, false)?;
        }

        if tx.is_coinbase() {
            return Ok(());
        }
        if undo.spent.len() != tx.inputs.len() {
            return Err(BlockApplyError::UndoMismatch(format!(
                "tx {txid} has {} inputs, undo holds {}",
                tx.inputs.len(),
                undo.spent.len()
            )));
        }
        for (input_index, (input, coin)) in tx.inputs.iter().zip(&undo.spent).enumerate().rev() {
            let input_index = input_index as u32;
            self.coins.add_coin(&input.prevout, coin.clone(), true)?;
            self.assets.undo_spend(coin, &input.prevout)?;
            self.index_coin(&coin.script, coin.amount, tx_index, txid, input_index, true)?;
        }
        Ok(())
    }

    // =========================================================================
    // Address Index
    // =========================================================================

    /// Record index entries for a coin created or spent by `txid`
    fn index_coin(
        &mut self,
        script: &[u8],
        value: Amount,
        tx_index: u32,
        txid: TxHash,
        index: u32,
        spending: bool,
    ) -> BlockApplyResult<()> {
        if !self.index_enabled {
            return Ok(());
        }
        let Some(address) = self.codec.destination(script) else {
            return Ok(());
        };
        let height = self.height;
        let sign = if spending { -1 } else { 1 };
        let entry = |asset: &str| AddressIndexKey {
            address_type: ADDRESS_TYPE_PUBKEY_HASH,
            address,
            asset: asset.to_string(),
            height,
            tx_index,
            txid,
            index,
            spending,
        };

        let mut entries = vec![(entry(NATIVE_ASSET), sign * value)];
        if let Some((payload, _)) = self.codec.decode_script(script)? {
            entries.push((entry(payload.name()), sign * payload.amount()));
        }
        self.index.extend(entries);
        Ok(())
    }
}
