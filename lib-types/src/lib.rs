//! Chain-state primitives.
//! Stable, protocol-neutral, behavior-free.

pub mod money;
pub mod primitives;

pub use money::{checked_money_add, money_range, COIN, MAX_MONEY};
pub use primitives::{Address, Amount, BlockHash, BlockHeight, OutPoint, TxHash};
