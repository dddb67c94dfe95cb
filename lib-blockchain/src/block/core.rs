//! Core block structures

use serde::{Deserialize, Serialize};

use lib_types::BlockHash;

use crate::transaction::Transaction;

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    /// Hash of the parent block; zero for genesis
    pub previous_block_hash: BlockHash,
    /// Commitment to the ordered transaction list
    pub tx_root: [u8; 32],
    pub timestamp: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Calculate the hash of this block header
    pub fn calculate_hash(&self) -> BlockHash {
        let mut hasher = blake3::Hasher::new();

        hasher.update(&self.version.to_le_bytes());
        hasher.update(self.previous_block_hash.as_bytes());
        hasher.update(&self.tx_root);
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(&self.nonce.to_le_bytes());

        BlockHash::new(*hasher.finalize().as_bytes())
    }
}

/// A block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(previous_block_hash: BlockHash, timestamp: u32, transactions: Vec<Transaction>) -> Self {
        let tx_root = Self::calculate_tx_root(&transactions);
        Self {
            header: BlockHeader {
                version: 1,
                previous_block_hash,
                tx_root,
                timestamp,
                nonce: 0,
            },
            transactions,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.calculate_hash()
    }

    pub fn previous_hash(&self) -> BlockHash {
        self.header.previous_block_hash
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    /// Hash over the ordered transaction hashes
    pub fn calculate_tx_root(transactions: &[Transaction]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for tx in transactions {
            hasher.update(tx.hash().as_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    pub fn verify_tx_root(&self) -> bool {
        Self::calculate_tx_root(&self.transactions) == self.header.tx_root
    }
}
