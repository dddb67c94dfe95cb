//! Mutation Journal
//!
//! Every change the ledger cache makes is recorded as an [`AssetMutation`]
//! in the order it happened. The journal lives until the cache flushes and
//! tells the flush which keys it must write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lib_types::{Address, Amount, BlockHash, BlockHeight, OutPoint};

use crate::asset::{AssetDescriptor, AssetTransfer, ReissueAsset};

/// Prior descriptor fields captured when a reissuance is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUndoEntry {
    pub name: String,
    pub ipfs_changed: bool,
    pub units_changed: bool,
    pub prior_ipfs: Option<Vec<u8>>,
    pub prior_units: u8,
    pub prior_reissuable: bool,
}

/// A single ledger change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetMutation {
    Issue {
        asset: AssetDescriptor,
        holder: Address,
        height: BlockHeight,
        block_hash: BlockHash,
    },
    Reissue {
        reissue: ReissueAsset,
        holder: Address,
        outpoint: OutPoint,
    },
    Transfer {
        transfer: AssetTransfer,
        holder: Address,
        outpoint: OutPoint,
    },
    OwnerCreate {
        name: String,
        holder: Address,
    },
    /// An asset output was consumed
    Spend {
        name: String,
        holder: Address,
        amount: Amount,
        outpoint: OutPoint,
    },
    /// A consumed asset output was restored during disconnection
    UndoSpend {
        name: String,
        holder: Address,
        amount: Amount,
        outpoint: OutPoint,
    },
    RemoveIssue {
        name: String,
        holder: Address,
    },
    UndoReissue {
        reissue: ReissueAsset,
        holder: Address,
        outpoint: OutPoint,
    },
    RemoveTransfer {
        transfer: AssetTransfer,
        holder: Address,
        outpoint: OutPoint,
    },
    RemoveOwner {
        name: String,
        holder: Address,
    },
}

/// Discriminant of [`AssetMutation`], used for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MutationKind {
    Issue,
    Reissue,
    Transfer,
    OwnerCreate,
    Spend,
    UndoSpend,
    RemoveIssue,
    UndoReissue,
    RemoveTransfer,
    RemoveOwner,
}

/// Storage key touched by a mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LedgerKey {
    Asset(String),
    Balance(String, Address),
}

impl AssetMutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            AssetMutation::Issue { .. } => MutationKind::Issue,
            AssetMutation::Reissue { .. } => MutationKind::Reissue,
            AssetMutation::Transfer { .. } => MutationKind::Transfer,
            AssetMutation::OwnerCreate { .. } => MutationKind::OwnerCreate,
            AssetMutation::Spend { .. } => MutationKind::Spend,
            AssetMutation::UndoSpend { .. } => MutationKind::UndoSpend,
            AssetMutation::RemoveIssue { .. } => MutationKind::RemoveIssue,
            AssetMutation::UndoReissue { .. } => MutationKind::UndoReissue,
            AssetMutation::RemoveTransfer { .. } => MutationKind::RemoveTransfer,
            AssetMutation::RemoveOwner { .. } => MutationKind::RemoveOwner,
        }
    }

    pub fn asset_name(&self) -> &str {
        match self {
            AssetMutation::Issue { asset, .. } => &asset.name,
            AssetMutation::Reissue { reissue, .. } | AssetMutation::UndoReissue { reissue, .. } => {
                &reissue.name
            }
            AssetMutation::Transfer { transfer, .. }
            | AssetMutation::RemoveTransfer { transfer, .. } => &transfer.name,
            AssetMutation::OwnerCreate { name, .. }
            | AssetMutation::Spend { name, .. }
            | AssetMutation::UndoSpend { name, .. }
            | AssetMutation::RemoveIssue { name, .. }
            | AssetMutation::RemoveOwner { name, .. } => name,
        }
    }

    pub fn holder(&self) -> Address {
        match self {
            AssetMutation::Issue { holder, .. }
            | AssetMutation::Reissue { holder, .. }
            | AssetMutation::Transfer { holder, .. }
            | AssetMutation::OwnerCreate { holder, .. }
            | AssetMutation::Spend { holder, .. }
            | AssetMutation::UndoSpend { holder, .. }
            | AssetMutation::RemoveIssue { holder, .. }
            | AssetMutation::UndoReissue { holder, .. }
            | AssetMutation::RemoveTransfer { holder, .. }
            | AssetMutation::RemoveOwner { holder, .. } => *holder,
        }
    }

    /// Keys whose final value a flush must write for this mutation
    pub fn touched_keys(&self) -> Vec<LedgerKey> {
        let name = self.asset_name().to_string();
        let balance = LedgerKey::Balance(name.clone(), self.holder());
        match self.kind() {
            MutationKind::Issue
            | MutationKind::Reissue
            | MutationKind::RemoveIssue
            | MutationKind::UndoReissue => vec![LedgerKey::Asset(name), balance],
            _ => vec![balance],
        }
    }

    /// Approximate in-memory footprint
    pub fn estimated_size(&self) -> usize {
        let payload = match self {
            AssetMutation::Issue { asset, .. } => {
                asset.ipfs_hash.as_ref().map_or(0, Vec::len) + std::mem::size_of::<AssetDescriptor>()
            }
            AssetMutation::Reissue { reissue, .. } | AssetMutation::UndoReissue { reissue, .. } => {
                reissue.ipfs_hash.as_ref().map_or(0, Vec::len) + std::mem::size_of::<ReissueAsset>()
            }
            _ => 0,
        };
        std::mem::size_of::<AssetMutation>() + self.asset_name().len() + payload
    }
}

/// Snapshot of a cache's pending state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerDiagnostics {
    pub mutations: BTreeMap<MutationKind, usize>,
    pub pending_assets: usize,
    pub pending_balances: usize,
    pub pending_undo_blocks: usize,
    pub estimated_bytes: usize,
}

impl LedgerDiagnostics {
    pub fn count(&self, kind: MutationKind) -> usize {
        self.mutations.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_mutations(&self) -> usize {
        self.mutations.values().sum()
    }
}
