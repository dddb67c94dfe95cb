//! Block structures

pub mod core;

pub use self::core::{Block, BlockHeader};
