//! Core transaction structures

use serde::{Deserialize, Serialize};

use lib_types::{checked_money_add, Amount, OutPoint, TxHash};

/// Reference to the output being spent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            sequence: u32::MAX,
        }
    }

    /// The single input of a coinbase transaction
    pub fn coinbase() -> Self {
        Self::new(OutPoint::null())
    }
}

/// Value locked by a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script: Vec<u8>,
}

impl TxOut {
    pub fn new(value: Amount, script: Vec<u8>) -> Self {
        Self { value, script }
    }

    /// Zero-value, script-less marker output opening a coinstake
    pub fn empty() -> Self {
        Self {
            value: 0,
            script: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script.is_empty()
    }
}

/// A transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    /// Creation timestamp; inputs may not be younger than this
    pub time: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(time: u32, inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self {
            version: 1,
            time,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Content hash identifying this transaction
    pub fn hash(&self) -> TxHash {
        let mut hasher = blake3::Hasher::new();

        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.time.to_le_bytes());
        hasher.update(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.prevout.tx.as_bytes());
            hasher.update(&input.prevout.index.to_le_bytes());
            hasher.update(&input.sequence.to_le_bytes());
        }
        hasher.update(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            hasher.update(&output.value.to_le_bytes());
            hasher.update(&(output.script.len() as u32).to_le_bytes());
            hasher.update(&output.script);
        }
        hasher.update(&self.lock_time.to_le_bytes());

        TxHash::new(*hasher.finalize().as_bytes())
    }

    /// Reference to output `index` of this transaction
    pub fn outpoint(&self, index: u32) -> OutPoint {
        OutPoint::new(self.hash(), index)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Proof-of-stake reward transaction: real inputs, empty first output
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Sum of output values, `None` when it leaves the money range
    pub fn value_out(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0, |total, output| checked_money_add(total, output.value))
    }
}
