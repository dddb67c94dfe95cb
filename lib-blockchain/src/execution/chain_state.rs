//! Chain State - Block Connection and Disconnection
//!
//! [`ChainState`] owns the tip caches. Each block runs against a fresh pair
//! of child caches; they are merged into the tip only after every
//! transaction has validated and applied. A rejected block leaves the tip
//! exactly as it was.
//!
//! Undo records and address index entries are held until [`ChainState::flush`],
//! which writes the coin tree, the asset tree and the side trees in that
//! order.

use std::collections::BTreeMap;

use tracing::{debug, info};

use lib_tokens::{AssetScriptCodec, AssetsCache, AssetsView, MetadataCache};
use lib_types::{Amount, BlockHash, BlockHeight, TxHash};
use lib_utxo::CoinsViewCache;

use crate::block::Block;
use crate::config::ChainStateConfig;
use crate::storage::{AddressIndexKey, AssetsDb, CoinsDb, SledStore};
use crate::validation::{check_transaction, check_tx_assets, check_tx_inputs};

use super::errors::{BlockApplyError, BlockApplyResult};
use super::tx_apply::TxApplier;
use super::undo::BlockUndo;

/// Tip caches over the durable store
pub struct ChainState<'a> {
    coins: CoinsViewCache<'a>,
    assets: AssetsCache<'a>,
    store: &'a SledStore,
    config: &'a ChainStateConfig,
    /// Reissue locks taken by the last connected block
    reissue_locks: BTreeMap<String, TxHash>,
    pending_undo: Vec<(BlockHash, Option<BlockUndo>)>,
    pending_index: Vec<(AddressIndexKey, Option<Amount>)>,
}

impl std::fmt::Debug for ChainState<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainState")
            .field("coins", &self.coins)
            .field("assets", &self.assets)
            .field("pending_undo", &self.pending_undo.len())
            .field("pending_index", &self.pending_index.len())
            .finish_non_exhaustive()
    }
}

impl<'a> ChainState<'a> {
    pub fn new(
        coins_db: &'a mut CoinsDb,
        assets_db: &'a mut AssetsDb,
        store: &'a SledStore,
        metadata: &'a MetadataCache,
        codec: &'a dyn AssetScriptCodec,
        config: &'a ChainStateConfig,
    ) -> BlockApplyResult<Self> {
        let reissue_locks = assets_db.reissue_locks()?;
        Ok(Self {
            coins: CoinsViewCache::new(coins_db),
            assets: AssetsCache::new(assets_db, metadata, codec),
            store,
            config,
            reissue_locks,
            pending_undo: Vec::new(),
            pending_index: Vec::new(),
        })
    }

    pub fn coins(&self) -> &CoinsViewCache<'a> {
        &self.coins
    }

    pub fn assets(&self) -> &AssetsCache<'a> {
        &self.assets
    }

    pub fn reissue_locks(&self) -> &BTreeMap<String, TxHash> {
        &self.reissue_locks
    }

    pub fn best_block(&self) -> BlockApplyResult<BlockHash> {
        Ok(self.coins.best_block()?)
    }

    // =========================================================================
    // Connection
    // =========================================================================

    fn check_block_structure(block: &Block) -> BlockApplyResult<()> {
        let Some(first) = block.transactions.first() else {
            return Err(BlockApplyError::EmptyBlock);
        };
        if !block.verify_tx_root() {
            return Err(BlockApplyError::InvalidTxRoot);
        }
        if !first.is_coinbase() {
            return Err(BlockApplyError::MissingCoinbase);
        }
        if let Some(index) = block.transactions.iter().skip(1).position(|tx| tx.is_coinbase()) {
            return Err(BlockApplyError::UnexpectedCoinbase { index: index + 1 });
        }
        Ok(())
    }

    /// Validate and apply `block` on top of the current tip
    ///
    /// Returns the coin undo record; it is also staged for the next flush.
    pub fn connect_block(&mut self, block: &Block, height: BlockHeight) -> BlockApplyResult<BlockUndo> {
        let hash = block.hash();
        let tip = self.coins.best_block()?;
        if block.previous_hash() != tip {
            return Err(BlockApplyError::InvalidPreviousHash {
                expected: tip,
                actual: block.previous_hash(),
            });
        }
        Self::check_block_structure(block)?;

        let config = self.config;
        let codec = self.assets.codec();
        let mut applier = TxApplier::new(
            CoinsViewCache::new(&mut self.coins),
            self.assets.child(),
            codec,
            height,
            hash,
            config.address_index,
        );

        let mut locks = BTreeMap::new();
        let mut undo = BlockUndo::default();
        let mut fees: Amount = 0;

        for (index, tx) in block.transactions.iter().enumerate() {
            let rejected = |error| BlockApplyError::TxRejected { index, error };
            check_transaction(tx).map_err(rejected)?;
            // zero fee for the coinbase; its asset check rejects any asset output
            let fee = check_tx_inputs(tx, &applier.coins, height, config).map_err(rejected)?;
            check_tx_assets(
                tx,
                &applier.coins,
                &applier.assets,
                codec,
                height,
                block.timestamp(),
                &mut locks,
            )
            .map_err(rejected)?;
            fees = fees.saturating_add(fee);
            undo.txs.push(applier.connect_tx(tx, index as u32)?);
        }

        let reissue_undo = applier.take_reissue_undo();
        if !reissue_undo.is_empty() {
            applier.assets.record_block_undo(hash, reissue_undo);
        }
        let index = applier.take_index();
        applier.coins.set_best_block(hash);
        applier.coins.flush()?;
        applier.assets.flush()?;
        drop(applier);

        self.reissue_locks = locks;
        self.pending_undo.push((hash, Some(undo.clone())));
        self.pending_index
            .extend(index.into_iter().map(|(key, amount)| (key, Some(amount))));

        info!(
            %hash,
            height,
            txs = block.transactions.len(),
            spent = undo.spent_count(),
            fees,
            "connected block"
        );
        Ok(undo)
    }

    // =========================================================================
    // Disconnection
    // =========================================================================

    /// Undo the tip block
    ///
    /// `undo` must be the record produced when `block` was connected.
    pub fn disconnect_block(&mut self, block: &Block, height: BlockHeight, undo: &BlockUndo) -> BlockApplyResult<()> {
        let hash = block.hash();
        let tip = self.coins.best_block()?;
        if hash != tip {
            return Err(BlockApplyError::NotTip { expected: tip, actual: hash });
        }
        if undo.txs.len() != block.transactions.len() {
            return Err(BlockApplyError::UndoMismatch(format!(
                "block {hash} has {} transactions, undo holds {}",
                block.transactions.len(),
                undo.txs.len()
            )));
        }

        let priors = AssetsView::block_undo(&self.assets, &hash)?.unwrap_or_default();
        let config = self.config;
        let codec = self.assets.codec();
        let mut applier = TxApplier::new(
            CoinsViewCache::new(&mut self.coins),
            self.assets.child(),
            codec,
            height,
            hash,
            config.address_index,
        )
        .with_reissue_undo(priors);

        for (index, (tx, tx_undo)) in block.transactions.iter().zip(&undo.txs).enumerate().rev() {
            applier.disconnect_tx(tx, index as u32, tx_undo)?;
        }
        if !applier.reissue_undo().is_empty() {
            return Err(BlockApplyError::UndoMismatch(format!(
                "{} reissue undo entries left for block {hash}",
                applier.reissue_undo().len()
            )));
        }

        let index = applier.take_index();
        applier.assets.erase_block_undo(hash);
        applier.coins.set_best_block(block.previous_hash());
        applier.coins.flush()?;
        applier.assets.flush()?;
        drop(applier);

        self.reissue_locks.clear();
        self.pending_undo.push((hash, None));
        self.pending_index.extend(index.into_iter().map(|(key, _)| (key, None)));

        info!(%hash, height, txs = block.transactions.len(), "disconnected block");
        Ok(())
    }

    /// Coin undo record of a connected block, staged or stored
    pub fn load_block_undo(&self, hash: &BlockHash) -> BlockApplyResult<Option<BlockUndo>> {
        if let Some((_, staged)) = self.pending_undo.iter().rev().find(|(h, _)| h == hash) {
            return Ok(staged.clone());
        }
        Ok(self.store.block_undo(hash)?)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Stage the current reissue locks for the next asset flush
    pub fn persist_reissue_locks(&mut self) {
        self.assets.set_reissue_locks(self.reissue_locks.clone());
    }

    /// Write every staged change to the store
    pub fn flush(&mut self) -> BlockApplyResult<()> {
        self.persist_reissue_locks();
        self.coins.flush()?;
        self.assets.flush()?;

        self.store.write_block_undo(&self.pending_undo)?;
        self.store.write_address_index(&self.pending_index)?;
        self.store.flush()?;

        debug!(
            undo = self.pending_undo.len(),
            index = self.pending_index.len(),
            "flushed side trees"
        );
        self.pending_undo.clear();
        self.pending_index.clear();

        info!(tip = %self.coins.best_block()?, "chain state flushed");
        Ok(())
    }
}
