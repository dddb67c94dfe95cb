//! Asset Ledger Cache
//!
//! [`AssetsCache`] layers pending asset state over a borrowed [`AssetsView`].
//! Every change lands in an overlay (descriptors and balances hold their
//! final values) and is appended to the mutation journal. `flush` turns the
//! journal into an ordered [`AssetBatch`] and hands it to the base in one
//! call; pending state is cleared only when that call succeeds.
//!
//! # Lookup precedence
//!
//! 1. this cache's overlay
//! 2. overlays of every cache below it
//! 3. the shared [`MetadataCache`]
//! 4. durable storage (populates the metadata cache)

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use lib_types::{checked_money_add, Address, Amount, BlockHash, BlockHeight, OutPoint, TxHash};
use lib_utxo::Coin;

use crate::asset::{
    is_owner_name, owner_name, AssetDescriptor, AssetRecord, AssetTransfer, ReissueAsset,
    OWNER_ASSET_AMOUNT,
};
use crate::errors::{TokenError, TokenResult};
use crate::journal::{AssetMutation, AssetUndoEntry, LedgerDiagnostics, LedgerKey};
use crate::metadata::MetadataCache;
use crate::script::AssetScriptCodec;
use crate::view::{AssetBatch, AssetWrite, AssetsView};

/// Asset amount carried by an output that was spent or restored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMovement {
    pub name: String,
    pub holder: Address,
    pub amount: Amount,
}

/// Write-back asset ledger layered over a borrowed parent view
pub struct AssetsCache<'a> {
    base: &'a mut dyn AssetsView,
    metadata: &'a MetadataCache,
    codec: &'a dyn AssetScriptCodec,
    journal: Vec<AssetMutation>,
    assets: HashMap<String, Option<AssetRecord>>,
    balances: HashMap<(String, Address), Amount>,
    undo: BTreeMap<BlockHash, Option<Vec<AssetUndoEntry>>>,
    reissue_locks: Option<BTreeMap<String, TxHash>>,
}

impl std::fmt::Debug for AssetsCache<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetsCache")
            .field("journal", &self.journal.len())
            .field("assets", &self.assets.len())
            .field("balances", &self.balances.len())
            .finish_non_exhaustive()
    }
}

impl<'a> AssetsCache<'a> {
    pub fn new(
        base: &'a mut dyn AssetsView,
        metadata: &'a MetadataCache,
        codec: &'a dyn AssetScriptCodec,
    ) -> Self {
        Self {
            base,
            metadata,
            codec,
            journal: Vec::new(),
            assets: HashMap::new(),
            balances: HashMap::new(),
            undo: BTreeMap::new(),
            reissue_locks: None,
        }
    }

    /// A cache stacked on this one, sharing its metadata cache and codec
    pub fn child(&mut self) -> AssetsCache<'_> {
        let metadata = self.metadata;
        let codec = self.codec;
        AssetsCache::new(self, metadata, codec)
    }

    pub fn metadata(&self) -> &'a MetadataCache {
        self.metadata
    }

    pub fn codec(&self) -> &'a dyn AssetScriptCodec {
        self.codec
    }

    pub fn base(&self) -> &dyn AssetsView {
        &*self.base
    }

    pub fn journal(&self) -> &[AssetMutation] {
        &self.journal
    }

    pub fn has_pending(&self) -> bool {
        !self.journal.is_empty()
            || !self.assets.is_empty()
            || !self.balances.is_empty()
            || !self.undo.is_empty()
            || self.reissue_locks.is_some()
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Current descriptor for `name`
    pub fn lookup_descriptor(&self, name: &str) -> TokenResult<Option<AssetRecord>> {
        if let Some(pending) = self.pending_asset(name) {
            return Ok(pending);
        }
        if let Some(record) = self.metadata.get(name) {
            return Ok(Some(record));
        }
        let stored = self.base.stored_asset(name)?;
        if let Some(record) = &stored {
            self.metadata.put(record.clone());
        }
        Ok(stored)
    }

    pub fn asset_exists(&self, name: &str) -> TokenResult<bool> {
        Ok(self.lookup_descriptor(name)?.is_some())
    }

    pub fn balance(&self, name: &str, address: &Address) -> TokenResult<Amount> {
        match self.pending_balance(name, address) {
            Some(amount) => Ok(amount),
            None => self.base.stored_balance(name, address),
        }
    }

    fn require_descriptor(&self, name: &str) -> TokenResult<AssetRecord> {
        self.lookup_descriptor(name)?
            .ok_or_else(|| TokenError::AssetNotFound(name.to_string()))
    }

    // ------------------------------------------------------------------------
    // Overlay helpers
    // ------------------------------------------------------------------------

    fn credit(&mut self, name: &str, address: &Address, amount: Amount) -> TokenResult<Amount> {
        let current = self.balance(name, address)?;
        let updated = checked_money_add(current, amount).ok_or(TokenError::Overflow)?;
        self.balances.insert((name.to_string(), *address), updated);
        Ok(updated)
    }

    /// Debit floored at zero
    fn debit(&mut self, name: &str, address: &Address, amount: Amount) -> TokenResult<Amount> {
        let current = self.balance(name, address)?;
        let updated = current - amount;
        if updated < 0 {
            warn!(asset = %name, holder = %address, current, amount, "asset debit floored at zero");
        }
        let updated = updated.max(0);
        self.balances.insert((name.to_string(), *address), updated);
        Ok(updated)
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Create a new asset held entirely by `holder`
    pub fn register_issuance(
        &mut self,
        asset: &AssetDescriptor,
        holder: &Address,
        height: BlockHeight,
        block_hash: BlockHash,
    ) -> TokenResult<()> {
        if self.asset_exists(&asset.name)? {
            return Err(TokenError::AssetAlreadyExists(asset.name.clone()));
        }

        let record = AssetRecord {
            descriptor: asset.clone(),
            height,
            block_hash,
        };
        self.assets.insert(asset.name.clone(), Some(record));
        self.balances.insert((asset.name.clone(), *holder), asset.amount);
        self.journal.push(AssetMutation::Issue {
            asset: asset.clone(),
            holder: *holder,
            height,
            block_hash,
        });

        debug!(asset = %asset.name, amount = asset.amount, holder = %holder, height, "registered issuance");
        Ok(())
    }

    /// Apply a reissuance, answering the prior fields needed to undo it
    pub fn register_reissuance(
        &mut self,
        reissue: &ReissueAsset,
        holder: &Address,
        outpoint: &OutPoint,
    ) -> TokenResult<AssetUndoEntry> {
        let mut record = self.require_descriptor(&reissue.name)?;
        if !record.descriptor.reissuable {
            return Err(TokenError::NotReissuable(reissue.name.clone()));
        }

        let descriptor = &mut record.descriptor;
        let undo = AssetUndoEntry {
            name: reissue.name.clone(),
            ipfs_changed: reissue.ipfs_hash.is_some(),
            units_changed: reissue.units.is_some(),
            prior_ipfs: descriptor.ipfs_hash.clone(),
            prior_units: descriptor.units,
            prior_reissuable: descriptor.reissuable,
        };

        descriptor.amount =
            checked_money_add(descriptor.amount, reissue.amount).ok_or(TokenError::Overflow)?;
        descriptor.reissuable = reissue.reissuable;
        if let Some(units) = reissue.units {
            descriptor.units = units;
        }
        if let Some(hash) = &reissue.ipfs_hash {
            descriptor.ipfs_hash = Some(hash.clone());
        }

        self.credit(&reissue.name, holder, reissue.amount)?;
        self.assets.insert(reissue.name.clone(), Some(record));
        self.journal.push(AssetMutation::Reissue {
            reissue: reissue.clone(),
            holder: *holder,
            outpoint: *outpoint,
        });

        debug!(asset = %reissue.name, delta = reissue.amount, %outpoint, "registered reissuance");
        Ok(undo)
    }

    /// Credit a transfer output to its holder
    ///
    /// Owner tokens are always credited exactly one unit.
    pub fn register_transfer(
        &mut self,
        transfer: &AssetTransfer,
        holder: &Address,
        outpoint: &OutPoint,
    ) -> TokenResult<()> {
        if is_owner_name(&transfer.name) {
            if transfer.amount != OWNER_ASSET_AMOUNT {
                warn!(
                    asset = %transfer.name,
                    encoded = transfer.amount,
                    %outpoint,
                    "owner token transfer amount normalised"
                );
            }
            self.balances
                .insert((transfer.name.clone(), *holder), OWNER_ASSET_AMOUNT);
        } else {
            self.credit(&transfer.name, holder, transfer.amount)?;
        }

        self.journal.push(AssetMutation::Transfer {
            transfer: transfer.clone(),
            holder: *holder,
            outpoint: *outpoint,
        });
        Ok(())
    }

    /// Give `holder` the owner token of `name` (`GOLD` or `GOLD!`)
    pub fn register_owner_creation(&mut self, name: &str, holder: &Address) -> TokenResult<()> {
        let owner = Self::owner_token(name)?;
        self.balances.insert((owner.clone(), *holder), OWNER_ASSET_AMOUNT);
        self.journal.push(AssetMutation::OwnerCreate {
            name: owner,
            holder: *holder,
        });
        Ok(())
    }

    fn owner_token(name: &str) -> TokenResult<String> {
        let owner = if is_owner_name(name) { name.to_string() } else { owner_name(name) };
        if is_owner_name(&owner) {
            Ok(owner)
        } else {
            Err(TokenError::InvalidAssetName(name.to_string()))
        }
    }

    /// Debit the asset held by a consumed output
    ///
    /// Plain scripts are ignored.
    pub fn spend(&mut self, outpoint: &OutPoint, script: &[u8]) -> TokenResult<Option<AssetMovement>> {
        let Some((payload, holder)) = self.codec.decode_script(script)? else {
            return Ok(None);
        };
        let name = payload.name().to_string();
        let amount = payload.amount();

        self.debit(&name, &holder, amount)?;
        self.journal.push(AssetMutation::Spend {
            name: name.clone(),
            holder,
            amount,
            outpoint: *outpoint,
        });
        Ok(Some(AssetMovement { name, holder, amount }))
    }

    // ------------------------------------------------------------------------
    // Disconnection
    // ------------------------------------------------------------------------

    /// Re-credit the asset held by a restored output
    pub fn undo_spend(&mut self, coin: &Coin, outpoint: &OutPoint) -> TokenResult<Option<AssetMovement>> {
        let Some((payload, holder)) = self.codec.decode_script(&coin.script)? else {
            return Ok(None);
        };
        let name = payload.name().to_string();
        let amount = payload.amount();

        if is_owner_name(&name) {
            self.balances.insert((name.clone(), holder), OWNER_ASSET_AMOUNT);
        } else {
            self.credit(&name, &holder, amount)?;
        }
        self.journal.push(AssetMutation::UndoSpend {
            name: name.clone(),
            holder,
            amount,
            outpoint: *outpoint,
        });
        Ok(Some(AssetMovement { name, holder, amount }))
    }

    /// Restore the descriptor captured by `prior` and take back the delta
    pub fn undo_reissuance(
        &mut self,
        reissue: &ReissueAsset,
        holder: &Address,
        outpoint: &OutPoint,
        prior: &AssetUndoEntry,
    ) -> TokenResult<()> {
        let mut record = self.require_descriptor(&reissue.name)?;
        let descriptor = &mut record.descriptor;

        let restored = descriptor.amount - reissue.amount;
        if restored < 0 {
            return Err(TokenError::Underflow(format!(
                "reissue of {} larger than supply {}",
                reissue.amount, descriptor.amount
            )));
        }
        descriptor.amount = restored;
        descriptor.reissuable = prior.prior_reissuable;
        if prior.units_changed {
            descriptor.units = prior.prior_units;
        }
        if prior.ipfs_changed {
            descriptor.ipfs_hash = prior.prior_ipfs.clone();
        }

        self.debit(&reissue.name, holder, reissue.amount)?;
        self.assets.insert(reissue.name.clone(), Some(record));
        self.journal.push(AssetMutation::UndoReissue {
            reissue: reissue.clone(),
            holder: *holder,
            outpoint: *outpoint,
        });

        debug!(asset = %reissue.name, delta = reissue.amount, %outpoint, "undid reissuance");
        Ok(())
    }

    /// Erase an asset created by a disconnected block
    pub fn remove_issuance(&mut self, name: &str, holder: &Address) -> TokenResult<()> {
        let record = self.require_descriptor(name)?;
        self.debit(name, holder, record.descriptor.amount)?;
        self.assets.insert(name.to_string(), None);
        self.journal.push(AssetMutation::RemoveIssue {
            name: name.to_string(),
            holder: *holder,
        });
        debug!(asset = %name, "removed issuance");
        Ok(())
    }

    /// Take back a transfer output created by a disconnected block
    pub fn remove_transfer(
        &mut self,
        transfer: &AssetTransfer,
        holder: &Address,
        outpoint: &OutPoint,
    ) -> TokenResult<()> {
        self.debit(&transfer.name, holder, transfer.credited_amount())?;
        self.journal.push(AssetMutation::RemoveTransfer {
            transfer: transfer.clone(),
            holder: *holder,
            outpoint: *outpoint,
        });
        Ok(())
    }

    pub fn remove_owner_creation(&mut self, name: &str, holder: &Address) -> TokenResult<()> {
        let owner = Self::owner_token(name)?;
        self.debit(&owner, holder, OWNER_ASSET_AMOUNT)?;
        self.journal.push(AssetMutation::RemoveOwner {
            name: owner,
            holder: *holder,
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Block records
    // ------------------------------------------------------------------------

    /// Record the reissue undo entries of a connected block
    pub fn record_block_undo(&mut self, block_hash: BlockHash, entries: Vec<AssetUndoEntry>) {
        self.undo.insert(block_hash, Some(entries));
    }

    pub fn erase_block_undo(&mut self, block_hash: BlockHash) {
        self.undo.insert(block_hash, None);
    }

    /// Stage a snapshot of the reissue locks for the next flush
    pub fn set_reissue_locks(&mut self, locks: BTreeMap<String, TxHash>) {
        self.reissue_locks = Some(locks);
    }

    // ------------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------------

    pub fn diagnostics(&self) -> LedgerDiagnostics {
        let mut diagnostics = LedgerDiagnostics {
            pending_assets: self.assets.len(),
            pending_balances: self.balances.len(),
            pending_undo_blocks: self.undo.len(),
            ..Default::default()
        };
        for mutation in &self.journal {
            *diagnostics.mutations.entry(mutation.kind()).or_insert(0) += 1;
            diagnostics.estimated_bytes += mutation.estimated_size();
        }
        diagnostics.estimated_bytes += self
            .assets
            .keys()
            .map(|name| name.len() + std::mem::size_of::<Option<AssetRecord>>())
            .sum::<usize>();
        diagnostics.estimated_bytes += self
            .balances
            .keys()
            .map(|(name, _)| name.len() + std::mem::size_of::<(String, Address, Amount)>())
            .sum::<usize>();
        diagnostics
    }

    /// Final value of every touched key, in order of first touch
    fn build_batch(&self) -> AssetBatch {
        let mut writes = Vec::new();
        let mut seen = HashSet::new();

        for key in self.journal.iter().flat_map(AssetMutation::touched_keys) {
            if !seen.insert(key.clone()) {
                continue;
            }
            match key {
                LedgerKey::Asset(name) => match self.assets.get(&name) {
                    Some(Some(record)) => writes.push(AssetWrite::PutAsset(record.clone())),
                    Some(None) => writes.push(AssetWrite::EraseAsset(name)),
                    None => {}
                },
                LedgerKey::Balance(name, address) => match self.balances.get(&(name.clone(), address)) {
                    Some(amount) if *amount > 0 => writes.push(AssetWrite::PutBalance {
                        name,
                        address,
                        amount: *amount,
                    }),
                    Some(_) => writes.push(AssetWrite::EraseBalance { name, address }),
                    None => {}
                },
            }
        }

        for (block_hash, entries) in &self.undo {
            writes.push(match entries {
                Some(entries) => AssetWrite::PutBlockUndo {
                    block_hash: *block_hash,
                    entries: entries.clone(),
                },
                None => AssetWrite::EraseBlockUndo(*block_hash),
            });
        }

        if let Some(locks) = &self.reissue_locks {
            writes.push(AssetWrite::PutReissueLocks(locks.clone()));
        }

        AssetBatch {
            writes,
            mutations: self.journal.clone(),
        }
    }

    fn clear_pending(&mut self) {
        self.journal.clear();
        self.assets.clear();
        self.balances.clear();
        self.undo.clear();
        self.reissue_locks = None;
    }

    /// Push all pending state to the base
    ///
    /// Nothing is written when nothing is pending. On failure the pending
    /// state is left exactly as it was.
    pub fn flush(&mut self) -> TokenResult<()> {
        if !self.has_pending() {
            return Ok(());
        }

        let batch = self.build_batch();
        self.base.write_batch(&batch)?;

        if self.base.is_durable() {
            for write in &batch.writes {
                match write {
                    AssetWrite::PutAsset(record) => self.metadata.put(record.clone()),
                    AssetWrite::EraseAsset(name) => self.metadata.erase(name),
                    _ => {}
                }
            }
        }

        debug!(
            mutations = batch.mutations.len(),
            writes = batch.writes.len(),
            durable = self.base.is_durable(),
            "flushed asset cache"
        );
        self.clear_pending();
        Ok(())
    }
}

impl AssetsView for AssetsCache<'_> {
    fn pending_asset(&self, name: &str) -> Option<Option<AssetRecord>> {
        match self.assets.get(name) {
            Some(pending) => Some(pending.clone()),
            None => self.base.pending_asset(name),
        }
    }

    fn pending_balance(&self, name: &str, address: &Address) -> Option<Amount> {
        match self.balances.get(&(name.to_string(), *address)) {
            Some(amount) => Some(*amount),
            None => self.base.pending_balance(name, address),
        }
    }

    fn stored_asset(&self, name: &str) -> TokenResult<Option<AssetRecord>> {
        self.base.stored_asset(name)
    }

    fn stored_balance(&self, name: &str, address: &Address) -> TokenResult<Amount> {
        self.base.stored_balance(name, address)
    }

    fn block_undo(&self, block_hash: &BlockHash) -> TokenResult<Option<Vec<AssetUndoEntry>>> {
        match self.undo.get(block_hash) {
            Some(pending) => Ok(pending.clone()),
            None => self.base.block_undo(block_hash),
        }
    }

    /// Absorb a child's batch into this overlay and journal
    fn write_batch(&mut self, batch: &AssetBatch) -> TokenResult<()> {
        for write in &batch.writes {
            match write {
                AssetWrite::PutAsset(record) => {
                    self.assets.insert(record.name().to_string(), Some(record.clone()));
                }
                AssetWrite::EraseAsset(name) => {
                    self.assets.insert(name.clone(), None);
                }
                AssetWrite::PutBalance { name, address, amount } => {
                    self.balances.insert((name.clone(), *address), *amount);
                }
                AssetWrite::EraseBalance { name, address } => {
                    self.balances.insert((name.clone(), *address), 0);
                }
                AssetWrite::PutBlockUndo { block_hash, entries } => {
                    self.undo.insert(*block_hash, Some(entries.clone()));
                }
                AssetWrite::EraseBlockUndo(block_hash) => {
                    self.undo.insert(*block_hash, None);
                }
                AssetWrite::PutReissueLocks(locks) => {
                    self.reissue_locks = Some(locks.clone());
                }
            }
        }
        self.journal.extend(batch.mutations.iter().cloned());
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

// ============================================================================
// TESTS
// ============================================================================
