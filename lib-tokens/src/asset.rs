//! Asset Domain Types
//!
//! Names, descriptors and payloads of the asset ledger.
//!
//! # Naming
//!
//! | kind   | form          | example       |
//! |--------|---------------|---------------|
//! | root   | `NAME`        | `GOLD`        |
//! | sub    | `ROOT/CHILD`  | `GOLD/BAR`    |
//! | unique | `BASE#TAG`    | `GOLD#1oz`    |
//! | owner  | `BASE!`       | `GOLD!`       |
//!
//! Root names are 3 to 30 characters of `A-Z 0-9 . _` with no leading,
//! trailing or doubled punctuation.

use serde::{Deserialize, Serialize};

use lib_types::{Amount, BlockHash, BlockHeight, COIN, MAX_MONEY};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Amount carried by every owner token
pub const OWNER_ASSET_AMOUNT: Amount = COIN;

/// Amount carried by every unique asset
pub const UNIQUE_ASSET_AMOUNT: Amount = COIN;

/// Highest divisibility an asset can declare
pub const MAX_UNITS: u8 = 8;

pub const MIN_ROOT_LENGTH: usize = 3;
pub const MAX_ROOT_LENGTH: usize = 30;

/// Longest full name, including sub-asset paths and tags
pub const MAX_NAME_LENGTH: usize = 32;

pub const OWNER_TAG: char = '!';
pub const SUB_DELIMITER: char = '/';
pub const UNIQUE_DELIMITER: char = '#';

/// Lock values below this are block heights, above are unix timestamps
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

const UNIQUE_TAG_EXTRA: &str = "-_.@$%&*()[]{}?:";

// ============================================================================
// NAMES
// ============================================================================

/// Kind of asset a name denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Root,
    Sub,
    Unique,
    Owner,
}

fn is_punct(c: char) -> bool {
    c == '.' || c == '_'
}

/// Check one `/`-separated segment; roots carry the length bounds
fn is_segment_valid(segment: &str, root: bool) -> bool {
    let len = segment.len();
    if root && !(MIN_ROOT_LENGTH..=MAX_ROOT_LENGTH).contains(&len) {
        return false;
    }
    if len == 0 {
        return false;
    }
    if !segment.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || is_punct(c)) {
        return false;
    }
    let bytes = segment.as_bytes();
    if is_punct(bytes[0] as char) || is_punct(bytes[len - 1] as char) {
        return false;
    }
    !bytes.windows(2).any(|w| is_punct(w[0] as char) && is_punct(w[1] as char))
}

/// Check a root or `ROOT/CHILD/...` path
fn is_base_valid(base: &str) -> bool {
    let mut segments = base.split(SUB_DELIMITER);
    match segments.next() {
        Some(root) if is_segment_valid(root, true) => segments.all(|s| is_segment_valid(s, false)),
        _ => false,
    }
}

fn is_unique_tag_valid(tag: &str) -> bool {
    !tag.is_empty()
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || UNIQUE_TAG_EXTRA.contains(c))
}

/// Classify a name, `None` if it is not a valid asset name
pub fn asset_type(name: &str) -> Option<AssetType> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return None;
    }

    if let Some(base) = name.strip_suffix(OWNER_TAG) {
        return is_base_valid(base).then_some(AssetType::Owner);
    }

    if let Some((base, tag)) = name.split_once(UNIQUE_DELIMITER) {
        return (is_base_valid(base) && is_unique_tag_valid(tag)).then_some(AssetType::Unique);
    }

    if !is_base_valid(name) {
        return None;
    }
    if name.contains(SUB_DELIMITER) {
        Some(AssetType::Sub)
    } else {
        Some(AssetType::Root)
    }
}

pub fn is_asset_name_valid(name: &str) -> bool {
    asset_type(name).is_some()
}

pub fn is_owner_name(name: &str) -> bool {
    asset_type(name) == Some(AssetType::Owner)
}

/// Owner token name for an issuable base (`GOLD` -> `GOLD!`)
pub fn owner_name(name: &str) -> String {
    format!("{name}{OWNER_TAG}")
}

/// The asset whose owner token authorises creating `name`
///
/// Roots have no parent. Sub-assets answer their parent path, uniques
/// their base, owner tokens the asset they own.
pub fn parent_name(name: &str) -> Option<&str> {
    match asset_type(name)? {
        AssetType::Root => None,
        AssetType::Owner => name.strip_suffix(OWNER_TAG),
        AssetType::Unique => name.split_once(UNIQUE_DELIMITER).map(|(base, _)| base),
        AssetType::Sub => name.rsplit_once(SUB_DELIMITER).map(|(parent, _)| parent),
    }
}

// ============================================================================
// AMOUNTS
// ============================================================================

/// Smallest amount step an asset with `units` decimals can express
pub fn unit_multiple(units: u8) -> Amount {
    10i64.pow(u32::from(MAX_UNITS.saturating_sub(units.min(MAX_UNITS))))
}

/// True if `amount` is expressible with `units` decimals
pub fn check_amount_with_units(amount: Amount, units: u8) -> bool {
    units <= MAX_UNITS && amount % unit_multiple(units) == 0
}

/// Native locktime semantics for asset time-locks
///
/// A lock of zero is always final. Below [`LOCKTIME_THRESHOLD`] it is a
/// height, otherwise a timestamp; either way it must be strictly in the past.
pub fn is_time_lock_final(lock: u32, height: BlockHeight, time: u32) -> bool {
    if lock == 0 {
        return true;
    }
    let reference = if lock < LOCKTIME_THRESHOLD { height } else { time };
    lock < reference
}

// ============================================================================
// DESCRIPTORS AND PAYLOADS
// ============================================================================

/// Issued state of an asset, and the payload of an issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub name: String,
    pub amount: Amount,
    pub units: u8,
    pub reissuable: bool,
    pub ipfs_hash: Option<Vec<u8>>,
}

impl AssetDescriptor {
    pub fn new(name: impl Into<String>, amount: Amount, units: u8, reissuable: bool) -> Self {
        Self {
            name: name.into(),
            amount,
            units,
            reissuable,
            ipfs_hash: None,
        }
    }

    pub fn with_ipfs_hash(mut self, hash: Vec<u8>) -> Self {
        self.ipfs_hash = Some(hash);
        self
    }

    /// Stateless issuance checks, returning a rejection message
    pub fn check(&self) -> Result<(), String> {
        let kind = asset_type(&self.name).ok_or_else(|| format!("invalid name {}", self.name))?;
        if kind == AssetType::Owner {
            return Err("owner tokens cannot be issued directly".to_string());
        }
        if self.units > MAX_UNITS {
            return Err(format!("units {} out of range", self.units));
        }
        if self.amount <= 0 || self.amount > MAX_MONEY {
            return Err(format!("amount {} out of range", self.amount));
        }
        if kind == AssetType::Unique
            && (self.amount != UNIQUE_ASSET_AMOUNT || self.units != 0 || self.reissuable)
        {
            return Err("unique assets must be a single indivisible unit".to_string());
        }
        if !check_amount_with_units(self.amount, self.units) {
            return Err(format!("amount {} does not match units {}", self.amount, self.units));
        }
        Ok(())
    }
}

/// Descriptor as stored, with the block that created it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub descriptor: AssetDescriptor,
    pub height: BlockHeight,
    pub block_hash: BlockHash,
}

impl AssetRecord {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Reissuance payload; `amount` is the supply delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReissueAsset {
    pub name: String,
    pub amount: Amount,
    pub units: Option<u8>,
    pub reissuable: bool,
    pub ipfs_hash: Option<Vec<u8>>,
}

impl ReissueAsset {
    pub fn new(name: impl Into<String>, amount: Amount) -> Self {
        Self {
            name: name.into(),
            amount,
            units: None,
            reissuable: true,
            ipfs_hash: None,
        }
    }
}

/// Transfer payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTransfer {
    pub name: String,
    pub amount: Amount,
    /// Height or timestamp before which the output may not be spent
    pub time_lock: u32,
}

impl AssetTransfer {
    pub fn new(name: impl Into<String>, amount: Amount) -> Self {
        Self {
            name: name.into(),
            amount,
            time_lock: 0,
        }
    }

    /// Amount credited to the holder; owner tokens always carry one unit
    pub fn credited_amount(&self) -> Amount {
        if is_owner_name(&self.name) {
            OWNER_ASSET_AMOUNT
        } else {
            self.amount
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
