//! Validation Module
//!
//! Transaction checks run before a transaction is applied.
//!
//! # Validation vs Execution
//!
//! - **Validation**: reads the coin and asset caches and decides
//! - **Execution**: applies an accepted transaction to the caches
//!
//! Validation never mutates cache state. The only thing it writes is the
//! per-block reissue lock map, and only for transactions it accepts.

pub mod asset_validate;
pub mod errors;
pub mod tx_validate;

pub use asset_validate::check_tx_assets;
pub use errors::{TxValidateError, TxValidateResult};
pub use tx_validate::{check_transaction, check_tx_inputs};
