//! Asset Ledger
//!
//! Secondary token ledger carried on transaction outputs.
//!
//! # Key Types
//!
//! - [`AssetsCache`]: write-back ledger cache with an ordered mutation journal
//! - [`AssetsView`]: storage layer trait implemented by caches and durable stores
//! - [`MetadataCache`]: bounded LRU of asset records in front of durable storage
//! - [`AssetScriptCodec`]: classifier/decoder for asset-carrying scripts
//!
//! Consensus checks over these types live in `lib-blockchain`.

pub mod asset;
pub mod cache;
pub mod errors;
pub mod journal;
pub mod metadata;
pub mod script;
pub mod view;

pub use asset::*;
pub use cache::{AssetMovement, AssetsCache};
pub use errors::{TokenError, TokenResult};
pub use journal::{AssetMutation, AssetUndoEntry, LedgerDiagnostics, LedgerKey, MutationKind};
pub use metadata::{MetadataCache, MetadataStats, DEFAULT_METADATA_CAPACITY};
pub use script::{AssetPayload, AssetScriptCodec, AssetScriptInfo, AssetScriptKind, StandardAssetScript};
pub use view::{AssetBatch, AssetWrite, AssetsView, MemoryAssetStore};
