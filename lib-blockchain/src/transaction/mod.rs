//! Transactions
//!
//! Inputs reference prior outputs by [`OutPoint`](lib_types::OutPoint);
//! outputs carry a native value and a locking script that may embed an
//! asset payload.

pub mod core;

pub use self::core::{Transaction, TxIn, TxOut};
