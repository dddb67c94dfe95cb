//! Key Encoding Helpers
//!
//! Key encoding is PROTOCOL. These functions define the canonical byte layout
//! for all storage keys. Never inline key construction in business logic.
//!
//! # Format Conventions
//!
//! - Heights and indexes are big-endian (sorts numerically)
//! - Hashes and addresses are raw bytes
//! - Variable-length names are length-prefixed wherever something follows them
//! - Amounts are big-endian `i64`

use lib_types::{Address, Amount, BlockHash, BlockHeight, OutPoint, TxHash};

use super::{StorageError, StorageResult};

// =============================================================================
// COIN KEYS
// =============================================================================

/// Key for the best block hash in the coins tree
///
/// Ten bytes, so it never collides with a 36-byte coin key.
pub const BEST_BLOCK_KEY: &[u8] = b"best_block";

/// Key for coins tree: tx_hash (32 bytes) + output_index (4 bytes BE) → coin
#[inline]
pub fn coin_key(outpoint: &OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(outpoint.tx.as_bytes());
    key[32..].copy_from_slice(&outpoint.index.to_be_bytes());
    key
}

/// Parse an outpoint from a coin key
#[inline]
pub fn parse_coin_key(key: &[u8]) -> Option<OutPoint> {
    if key.len() != 36 {
        return None;
    }
    let mut tx_bytes = [0u8; 32];
    tx_bytes.copy_from_slice(&key[..32]);
    let index = u32::from_be_bytes([key[32], key[33], key[34], key[35]]);
    Some(OutPoint::new(TxHash::new(tx_bytes), index))
}

// =============================================================================
// ASSET KEYS
// =============================================================================

/// Asset record: `T | name`
pub const TAG_ASSET: u8 = b'T';
/// Balance by asset: `B | name_len | name | address`
pub const TAG_BALANCE: u8 = b'B';
/// Balance by holder: `C | address | name`
pub const TAG_HOLDING: u8 = b'C';
/// Reissue undo entries of a block: `U | block_hash`
pub const TAG_BLOCK_UNDO: u8 = b'U';
/// Reissue lock snapshot
pub const REISSUE_LOCKS_KEY: &[u8] = b"Z";

fn name_len(name: &str) -> StorageResult<u8> {
    u8::try_from(name.len()).map_err(|_| StorageError::InvalidKey(format!("name too long: {name}")))
}

#[inline]
pub fn asset_key(name: &str) -> Vec<u8> {
    asset_prefix(name)
}

/// Prefix matching every asset whose name starts with `name_prefix`
#[inline]
pub fn asset_prefix(name_prefix: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name_prefix.len());
    key.push(TAG_ASSET);
    key.extend_from_slice(name_prefix.as_bytes());
    key
}

pub fn parse_asset_key(key: &[u8]) -> Option<String> {
    match key.split_first() {
        Some((&TAG_ASSET, name)) => String::from_utf8(name.to_vec()).ok(),
        _ => None,
    }
}

pub fn balance_key(name: &str, address: &Address) -> StorageResult<Vec<u8>> {
    let mut key = balance_prefix(name)?;
    key.extend_from_slice(address.as_bytes());
    Ok(key)
}

/// Prefix matching every holder of `name`
pub fn balance_prefix(name: &str) -> StorageResult<Vec<u8>> {
    let mut key = Vec::with_capacity(2 + name.len() + Address::LEN);
    key.push(TAG_BALANCE);
    key.push(name_len(name)?);
    key.extend_from_slice(name.as_bytes());
    Ok(key)
}

pub fn parse_balance_key(key: &[u8]) -> Option<(String, Address)> {
    let (&tag, rest) = key.split_first()?;
    if tag != TAG_BALANCE {
        return None;
    }
    let (&len, rest) = rest.split_first()?;
    let len = len as usize;
    if rest.len() != len + Address::LEN {
        return None;
    }
    let name = String::from_utf8(rest[..len].to_vec()).ok()?;
    let address = Address::from_slice(&rest[len..])?;
    Some((name, address))
}

pub fn holding_key(address: &Address, name: &str) -> Vec<u8> {
    let mut key = holding_prefix(address);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Prefix matching every asset held by `address`
pub fn holding_prefix(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + Address::LEN);
    key.push(TAG_HOLDING);
    key.extend_from_slice(address.as_bytes());
    key
}

pub fn parse_holding_key(key: &[u8]) -> Option<(Address, String)> {
    let (&tag, rest) = key.split_first()?;
    if tag != TAG_HOLDING || rest.len() < Address::LEN {
        return None;
    }
    let address = Address::from_slice(&rest[..Address::LEN])?;
    let name = String::from_utf8(rest[Address::LEN..].to_vec()).ok()?;
    Some((address, name))
}

#[inline]
pub fn block_undo_key(hash: &BlockHash) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = TAG_BLOCK_UNDO;
    key[1..].copy_from_slice(hash.as_bytes());
    key
}

#[inline]
pub fn encode_amount(amount: Amount) -> [u8; 8] {
    amount.to_be_bytes()
}

pub fn decode_amount(bytes: &[u8]) -> StorageResult<Amount> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::CorruptedData(format!("amount of {} bytes", bytes.len())))?;
    Ok(Amount::from_be_bytes(raw))
}

// =============================================================================
// ADDRESS INDEX KEYS
// =============================================================================

/// Address type byte for pay-to-pubkey-hash destinations
pub const ADDRESS_TYPE_PUBKEY_HASH: u8 = 1;

/// Asset name used for native coin entries in the address index
pub const NATIVE_ASSET: &str = "";

/// One address index entry
///
/// Layout: `type(1) | hash160(20) | name_len(1) | name | height(4 BE) |
/// tx_index(4 BE) | txid(32) | index(4 BE) | spending(1)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressIndexKey {
    pub address_type: u8,
    pub address: Address,
    pub asset: String,
    pub height: BlockHeight,
    pub tx_index: u32,
    pub txid: TxHash,
    /// Output index, or input index for spending entries
    pub index: u32,
    pub spending: bool,
}

impl AddressIndexKey {
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let mut key = address_index_prefix(self.address_type, &self.address, Some(&self.asset))?;
        key.extend_from_slice(&self.height.to_be_bytes());
        key.extend_from_slice(&self.tx_index.to_be_bytes());
        key.extend_from_slice(self.txid.as_bytes());
        key.extend_from_slice(&self.index.to_be_bytes());
        key.push(u8::from(self.spending));
        Ok(key)
    }

    pub fn decode(key: &[u8]) -> Option<Self> {
        const FIXED_TAIL: usize = 4 + 4 + 32 + 4 + 1;
        let address_type = *key.first()?;
        let address = Address::from_slice(key.get(1..21)?)?;
        let len = *key.get(21)? as usize;
        let rest = key.get(22..)?;
        if rest.len() != len + FIXED_TAIL {
            return None;
        }
        let asset = String::from_utf8(rest[..len].to_vec()).ok()?;
        let tail = &rest[len..];

        let be32 = |b: &[u8]| u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&tail[8..40]);
        Some(Self {
            address_type,
            address,
            asset,
            height: be32(&tail[0..4]),
            tx_index: be32(&tail[4..8]),
            txid: TxHash::new(txid),
            index: be32(&tail[40..44]),
            spending: tail[44] != 0,
        })
    }
}

/// Prefix over (type, address) or (type, address, asset)
pub fn address_index_prefix(
    address_type: u8,
    address: &Address,
    asset: Option<&str>,
) -> StorageResult<Vec<u8>> {
    let mut key = Vec::with_capacity(22 + asset.map_or(0, str::len));
    key.push(address_type);
    key.extend_from_slice(address.as_bytes());
    if let Some(asset) = asset {
        key.push(name_len(asset)?);
        key.extend_from_slice(asset.as_bytes());
    }
    Ok(key)
}

// =============================================================================
// TESTS
// =============================================================================
