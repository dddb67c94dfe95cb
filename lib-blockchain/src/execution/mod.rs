//! Block Execution Module
//!
//! The only path by which blocks reach the chain-state caches.
//!
//! # Architecture
//!
//! ```text
//! ChainState::connect_block(block, height)
//!     │
//!     ├── 1. Prechecks (tip, structure, tx root, coinbase position)
//!     │
//!     ├── 2. Child caches over the tip (coins + assets)
//!     │
//!     ├── 3. For each transaction:
//!     │       ├── check_transaction(tx)
//!     │       ├── check_tx_inputs(tx)     [reads only]
//!     │       ├── check_tx_assets(tx)     [reads only]
//!     │       └── TxApplier::connect_tx   [writes the child caches]
//!     │
//!     ├── 4. Record reissue undo, move best block
//!     │
//!     └── 5. Flush children into the tip
//!
//!     On error: children are dropped, tip unchanged
//! ```
//!
//! # Key Types
//!
//! - [`ChainState`] - tip caches and the connect/disconnect entry points
//! - [`TxApplier`] - per-block cache mutation primitives
//! - [`BlockUndo`] - coins spent by a block, for disconnection
//!
//! # Invariants
//!
//! - Disconnecting a block restores the exact pre-block coin and asset state
//! - Deterministic: same block + same pre-state = same mutations

pub mod chain_state;
pub mod errors;
pub mod tx_apply;
pub mod undo;

pub use chain_state::ChainState;
pub use errors::{BlockApplyError, BlockApplyResult};
pub use tx_apply::{add_coins, TxApplier};
pub use undo::{BlockUndo, TxUndo};
