//! Sled-based Chain-State Store
//!
//! One sled database with a tree per concern. [`CoinsDb`] and [`AssetsDb`]
//! are cheap handles onto their trees and are what the caches stack on.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use sled::{Batch, Db, Tree};
use tracing::debug;

use lib_tokens::{
    AssetBatch, AssetRecord, AssetUndoEntry, AssetWrite, AssetsView, TokenResult,
};
use lib_types::{Address, Amount, BlockHash, OutPoint, TxHash};
use lib_utxo::{Coin, CoinsMap, CoinsView, UtxoResult};

use crate::CHAIN_STATE_VERSION;

use super::keys::{self, AddressIndexKey};
use super::{paginate, StorageError, StorageResult};

// =============================================================================
// TREE NAMES (FIXED - DO NOT CHANGE)
// =============================================================================

const TREE_COINS: &str = "coins";
const TREE_ASSETS: &str = "assets";
const TREE_ADDRESS_INDEX: &str = "address_index";
const TREE_BLOCK_UNDO: &str = "block_undo";

/// Format version key in the default tree
const KEY_VERSION: &[u8] = b"version";

/// Helper to serialize a value
fn serialize<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Helper to deserialize a value
fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_version(bytes: &[u8]) -> StorageResult<u32> {
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StorageError::CorruptedData(format!("version of {} bytes", bytes.len())))?;
    Ok(u32::from_be_bytes(bytes))
}

/// Sled database holding every chain-state tree
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    coins: Tree,
    assets: Tree,
    address_index: Tree,
    block_undo: Tree,
}

impl SledStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path).map_err(|e| StorageError::Database(e.to_string()))?;
        Self::from_db(db)
    }

    /// Open a temporary store that is deleted on drop
    pub fn open_temporary() -> StorageResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        Self::check_version(&db)?;
        let coins = db.open_tree(TREE_COINS)?;
        let assets = db.open_tree(TREE_ASSETS)?;
        let address_index = db.open_tree(TREE_ADDRESS_INDEX)?;
        let block_undo = db.open_tree(TREE_BLOCK_UNDO)?;
        Ok(Self {
            db,
            coins,
            assets,
            address_index,
            block_undo,
        })
    }

    /// Stamp a new database with the format version, reject any other
    fn check_version(db: &Db) -> StorageResult<()> {
        let found = match db.get(KEY_VERSION)? {
            Some(bytes) => decode_version(&bytes)?,
            None => {
                db.insert(KEY_VERSION, &CHAIN_STATE_VERSION.to_be_bytes())?;
                debug!(version = CHAIN_STATE_VERSION, "stamped new chain-state store");
                return Ok(());
            }
        };
        if found != CHAIN_STATE_VERSION {
            return Err(StorageError::VersionMismatch {
                found,
                expected: CHAIN_STATE_VERSION,
            });
        }
        Ok(())
    }

    /// On-disk format version of this store
    pub fn version(&self) -> StorageResult<u32> {
        match self.db.get(KEY_VERSION)? {
            Some(bytes) => decode_version(&bytes),
            None => Err(StorageError::CorruptedData("missing version".to_string())),
        }
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db
            .flush()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn coins_db(&self) -> CoinsDb {
        CoinsDb {
            db: self.db.clone(),
            tree: self.coins.clone(),
        }
    }

    pub fn assets_db(&self) -> AssetsDb {
        AssetsDb {
            tree: self.assets.clone(),
        }
    }

    // =========================================================================
    // Block undo
    // =========================================================================

    pub fn block_undo<T: DeserializeOwned>(&self, hash: &BlockHash) -> StorageResult<Option<T>> {
        match self.block_undo.get(hash.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(deserialize(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Database(e.to_string())),
        }
    }

    /// Write and erase undo records in one batch (`None` erases)
    pub fn write_block_undo<T: Serialize>(
        &self,
        records: &[(BlockHash, Option<T>)],
    ) -> StorageResult<()> {
        let mut batch = Batch::default();
        for (hash, record) in records {
            match record {
                Some(record) => batch.insert(&hash.as_bytes()[..], serialize(record)?),
                None => batch.remove(&hash.as_bytes()[..]),
            }
        }
        self.block_undo.apply_batch(batch)?;
        Ok(())
    }

    // =========================================================================
    // Address index
    // =========================================================================

    /// Write and erase address index entries in one batch (`None` erases)
    pub fn write_address_index(&self, entries: &[(AddressIndexKey, Option<Amount>)]) -> StorageResult<()> {
        let mut batch = Batch::default();
        for (key, amount) in entries {
            let key = key.encode()?;
            match amount {
                Some(amount) => batch.insert(key, &keys::encode_amount(*amount)[..]),
                None => batch.remove(key),
            }
        }
        self.address_index.apply_batch(batch)?;
        debug!(entries = entries.len(), "wrote address index");
        Ok(())
    }

    /// Index entries for an address in height order, optionally for one asset
    pub fn address_entries(
        &self,
        address_type: u8,
        address: &Address,
        asset: Option<&str>,
    ) -> StorageResult<Vec<(AddressIndexKey, Amount)>> {
        let prefix = keys::address_index_prefix(address_type, address, asset)?;
        let mut entries = Vec::new();
        for item in self.address_index.scan_prefix(prefix) {
            let (key, value) = item?;
            let key = AddressIndexKey::decode(&key)
                .ok_or_else(|| StorageError::CorruptedData("address index key".to_string()))?;
            entries.push((key, keys::decode_amount(&value)?));
        }
        Ok(entries)
    }

    /// Net amount received by an address for one asset
    pub fn address_balance(&self, address_type: u8, address: &Address, asset: &str) -> StorageResult<Amount> {
        Ok(self
            .address_entries(address_type, address, Some(asset))?
            .into_iter()
            .map(|(_, amount)| amount)
            .sum())
    }
}

// =============================================================================
// COINS
// =============================================================================

/// Durable terminal coin view
#[derive(Debug, Clone)]
pub struct CoinsDb {
    db: Db,
    tree: Tree,
}

impl CoinsDb {
    /// Number of stored unspent coins
    pub fn coin_count(&self) -> usize {
        self.tree
            .iter()
            .keys()
            .filter(|key| key.as_ref().is_ok_and(|k| k.len() == 36))
            .count()
    }
}

impl CoinsView for CoinsDb {
    fn get_coin(&self, outpoint: &OutPoint) -> UtxoResult<Option<Coin>> {
        match self.tree.get(keys::coin_key(outpoint)) {
            Ok(Some(bytes)) => {
                let coin: Coin = deserialize(&bytes)?;
                Ok((!coin.is_spent()).then_some(coin))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Database(e.to_string()).into()),
        }
    }

    fn best_block(&self) -> UtxoResult<BlockHash> {
        match self.tree.get(keys::BEST_BLOCK_KEY) {
            Ok(Some(bytes)) => {
                let raw: [u8; 32] = bytes.as_ref().try_into().map_err(|_| {
                    StorageError::CorruptedData("Invalid best_block length".to_string())
                })?;
                Ok(BlockHash::new(raw))
            }
            Ok(None) => Ok(BlockHash::zero()),
            Err(e) => Err(StorageError::Database(e.to_string()).into()),
        }
    }

    fn batch_write(&mut self, coins: &CoinsMap, best_block: BlockHash) -> UtxoResult<()> {
        let mut batch = Batch::default();
        let mut written = 0usize;
        for (outpoint, entry) in coins.iter().filter(|(_, e)| e.dirty) {
            let key = keys::coin_key(outpoint);
            if entry.coin.is_spent() {
                batch.remove(&key[..]);
            } else {
                batch.insert(&key[..], serialize(&entry.coin)?);
            }
            written += 1;
        }
        batch.insert(keys::BEST_BLOCK_KEY, &best_block.as_bytes()[..]);

        self.tree
            .apply_batch(batch)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        debug!(written, %best_block, "wrote coin batch");
        Ok(())
    }

    fn estimate_size(&self) -> usize {
        self.db
            .size_on_disk()
            .map(|bytes| usize::try_from(bytes).unwrap_or(usize::MAX))
            .unwrap_or(0)
    }
}

// =============================================================================
// ASSETS
// =============================================================================

/// Durable terminal asset view plus the directory queries
#[derive(Debug, Clone)]
pub struct AssetsDb {
    tree: Tree,
}

impl AssetsDb {
    fn get_amount(&self, key: &[u8]) -> StorageResult<Amount> {
        match self.tree.get(key) {
            Ok(Some(bytes)) => keys::decode_amount(&bytes),
            Ok(None) => Ok(0),
            Err(e) => Err(StorageError::Database(e.to_string())),
        }
    }

    pub fn asset(&self, name: &str) -> StorageResult<Option<AssetRecord>> {
        match self.tree.get(keys::asset_key(name)) {
            Ok(Some(bytes)) => Ok(Some(deserialize(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Database(e.to_string())),
        }
    }

    /// Assets whose names start with `prefix`, in name order
    pub fn list_assets(&self, prefix: &str, count: usize, start: i64) -> StorageResult<Vec<AssetRecord>> {
        let mut records = Vec::new();
        for item in self.tree.scan_prefix(keys::asset_prefix(prefix)) {
            let (_, value) = item?;
            records.push(deserialize(&value)?);
        }
        Ok(paginate(records, count, start))
    }

    pub fn asset_count(&self) -> StorageResult<usize> {
        let mut count = 0;
        for item in self.tree.scan_prefix([keys::TAG_ASSET]) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Holders of `name` with their balances, in address order
    pub fn holders(&self, name: &str, count: usize, start: i64) -> StorageResult<Vec<(Address, Amount)>> {
        let mut holders = Vec::new();
        for item in self.tree.scan_prefix(keys::balance_prefix(name)?) {
            let (key, value) = item?;
            let (_, address) = keys::parse_balance_key(&key)
                .ok_or_else(|| StorageError::CorruptedData("balance key".to_string()))?;
            holders.push((address, keys::decode_amount(&value)?));
        }
        Ok(paginate(holders, count, start))
    }

    /// Assets held by `address` with their balances, in name order
    pub fn holdings(&self, address: &Address, count: usize, start: i64) -> StorageResult<Vec<(String, Amount)>> {
        let mut holdings = Vec::new();
        for item in self.tree.scan_prefix(keys::holding_prefix(address)) {
            let (key, value) = item?;
            let (_, name) = keys::parse_holding_key(&key)
                .ok_or_else(|| StorageError::CorruptedData("holding key".to_string()))?;
            holdings.push((name, keys::decode_amount(&value)?));
        }
        Ok(paginate(holdings, count, start))
    }

    pub fn holding(&self, address: &Address, name: &str) -> StorageResult<Amount> {
        self.get_amount(&keys::holding_key(address, name))
    }

    pub fn reissue_locks(&self) -> StorageResult<std::collections::BTreeMap<String, TxHash>> {
        match self.tree.get(keys::REISSUE_LOCKS_KEY) {
            Ok(Some(bytes)) => deserialize(&bytes),
            Ok(None) => Ok(Default::default()),
            Err(e) => Err(StorageError::Database(e.to_string())),
        }
    }

    fn stage(&self, batch: &mut Batch, write: &AssetWrite) -> StorageResult<()> {
        match write {
            AssetWrite::PutAsset(record) => {
                batch.insert(keys::asset_key(record.name()), serialize(record)?);
            }
            AssetWrite::EraseAsset(name) => batch.remove(keys::asset_key(name)),
            AssetWrite::PutBalance { name, address, amount } if *amount > 0 => {
                let value = keys::encode_amount(*amount);
                batch.insert(keys::balance_key(name, address)?, &value[..]);
                batch.insert(keys::holding_key(address, name), &value[..]);
            }
            AssetWrite::PutBalance { name, address, .. } | AssetWrite::EraseBalance { name, address } => {
                batch.remove(keys::balance_key(name, address)?);
                batch.remove(keys::holding_key(address, name));
            }
            AssetWrite::PutBlockUndo { block_hash, entries } => {
                batch.insert(&keys::block_undo_key(block_hash)[..], serialize(entries)?);
            }
            AssetWrite::EraseBlockUndo(block_hash) => {
                batch.remove(&keys::block_undo_key(block_hash)[..]);
            }
            AssetWrite::PutReissueLocks(locks) => {
                batch.insert(keys::REISSUE_LOCKS_KEY, serialize(locks)?);
            }
        }
        Ok(())
    }
}

impl AssetsView for AssetsDb {
    fn stored_asset(&self, name: &str) -> TokenResult<Option<AssetRecord>> {
        Ok(self.asset(name)?)
    }

    fn stored_balance(&self, name: &str, address: &Address) -> TokenResult<Amount> {
        Ok(self.get_amount(&keys::balance_key(name, address)?)?)
    }

    fn block_undo(&self, block_hash: &BlockHash) -> TokenResult<Option<Vec<AssetUndoEntry>>> {
        match self.tree.get(keys::block_undo_key(block_hash)) {
            Ok(Some(bytes)) => Ok(Some(deserialize(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Database(e.to_string()).into()),
        }
    }

    fn write_batch(&mut self, batch: &AssetBatch) -> TokenResult<()> {
        let mut sled_batch = Batch::default();
        for write in &batch.writes {
            self.stage(&mut sled_batch, write)?;
        }
        self.tree
            .apply_batch(sled_batch)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        debug!(writes = batch.writes.len(), mutations = batch.mutations.len(), "wrote asset batch");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
