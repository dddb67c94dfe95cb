//! Unspent Output Cache
//!
//! This crate provides the layered coin cache that sits between block
//! processing and the durable coin database.
//!
//! # Key Rules
//!
//! 1. **Write-back**: mutations stay in the top cache until flushed
//! 2. **Dirty** entries differ from the parent and must be written
//! 3. **Fresh** entries have no unspent counterpart in the parent, so spending
//!    them never produces a write below
//! 4. **Contract violations are fatal**: see [`UtxoError::is_fatal`]
//!
//! # Usage
//!
//! ```ignore
//! use lib_utxo::{CoinsViewCache, MemoryCoinsView};
//!
//! let mut db = MemoryCoinsView::new();
//! let mut cache = CoinsViewCache::new(&mut db);
//! cache.add_coin(&outpoint, coin, false)?;
//! cache.flush()?;
//! ```

pub mod cache;
pub mod errors;
pub mod types;
pub mod view;

pub use cache::{CoinCacheStats, CoinsViewCache};
pub use errors::{UtxoError, UtxoResult};
pub use types::{Coin, CoinEntry, CoinsMap, OP_RETURN};
pub use view::{CoinsView, MemoryCoinsView};
