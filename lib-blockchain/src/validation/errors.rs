//! Validation Errors
//!
//! Rejections are expected, data-dependent outcomes. Each one carries a
//! stable reason string (see [`TxValidateError::reason`]) that peers and
//! logs can match on; the display text adds the detail.

use thiserror::Error;

use lib_tokens::TokenError;
use lib_types::{Amount, BlockHeight, OutPoint};
use lib_utxo::UtxoError;

/// Transaction validation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxValidateError {
    // =========================================================================
    // Structural Errors
    // =========================================================================

    #[error("Transaction has no inputs")]
    EmptyInputs,

    #[error("Transaction has no outputs")]
    EmptyOutputs,

    #[error("Output {index} has negative value")]
    NegativeOutput { index: usize },

    #[error("Output {index} value too large")]
    OutputTooLarge { index: usize },

    #[error("Total output value out of range")]
    OutputTotalTooLarge,

    #[error("Duplicate input: {0}")]
    DuplicateInput(OutPoint),

    #[error("Null prevout in non-coinbase transaction")]
    NullPrevout,

    // =========================================================================
    // Value Errors
    // =========================================================================

    #[error("Input missing or spent: {0}")]
    MissingOrSpentInput(OutPoint),

    #[error("Coinbase output {outpoint} spent at depth {depth}, needs {required}")]
    PrematureCoinbaseSpend { outpoint: OutPoint, depth: BlockHeight, required: u32 },

    #[error("Coinstake output {outpoint} spent at depth {depth}, needs {required}")]
    PrematureCoinstakeSpend { outpoint: OutPoint, depth: BlockHeight, required: u32 },

    #[error("Input {outpoint} is younger than the transaction ({coin_time} > {tx_time})")]
    InputAfterTransaction { outpoint: OutPoint, coin_time: u32, tx_time: u32 },

    #[error("Input values out of range")]
    InputValuesOutOfRange,

    #[error("Inputs {value_in} below outputs {value_out}")]
    InputsBelowOutputs { value_in: Amount, value_out: Amount },

    #[error("Fee out of range: {0}")]
    FeeOutOfRange(Amount),

    // =========================================================================
    // Asset Errors
    // =========================================================================

    #[error("Invalid asset script: {0}")]
    InvalidAssetScript(String),

    #[error("Asset input {outpoint} is time-locked until {lock}")]
    AssetTimeLocked { outpoint: OutPoint, lock: u32 },

    #[error("Asset input values out of range for {0}")]
    AssetInputValuesOutOfRange(String),

    #[error("Asset output values out of range for {0}")]
    AssetOutputValuesOutOfRange(String),

    #[error("Invalid transfer amount {amount} for {name}")]
    InvalidTransferAmount { name: String, amount: Amount },

    #[error("Owner token transfer of {name} must carry exactly one unit, got {amount}")]
    OwnerTransferAmount { name: String, amount: Amount },

    #[error("Unique asset transfer of {name} must carry exactly one unit, got {amount}")]
    UniqueTransferAmount { name: String, amount: Amount },

    #[error("Transferred asset does not exist: {0}")]
    TransferAssetNotFound(String),

    #[error("Transfer amount {amount} of {name} does not match its units")]
    TransferUnitsMismatch { name: String, amount: Amount },

    #[error("Invalid issuance of {name}: {reason}")]
    InvalidIssue { name: String, reason: String },

    #[error("Asset already exists: {0}")]
    IssueAssetExists(String),

    #[error("Issuance of {0} has no owner token output")]
    IssueOwnerMissing(String),

    #[error("Issuance of {name} requires spending {owner}")]
    IssueParentOwnerNotSpent { name: String, owner: String },

    #[error("Owner token output {0} without a matching issuance")]
    OwnerWithoutIssue(String),

    #[error("Asset {0} reissued twice in one transaction")]
    DuplicateReissue(String),

    #[error("Reissued asset does not exist: {0}")]
    ReissueAssetNotFound(String),

    #[error("Asset is not reissuable: {0}")]
    ReissueNotReissuable(String),

    #[error("Invalid reissue amount {amount} for {name}")]
    InvalidReissueAmount { name: String, amount: Amount },

    #[error("Reissue of {name} may not decrease units from {current} to {requested}")]
    ReissueUnitsDecreasing { name: String, current: u8, requested: u8 },

    #[error("Reissue of {name} requires spending {owner}")]
    ReissueOwnerNotSpent { name: String, owner: String },

    #[error("Asset {0} already reissued by another transaction in this block")]
    ReissueChaining(String),

    #[error("Asset {0} appears on only one side of the transaction")]
    AssetSetMismatch(String),

    #[error("Asset {name} inputs {inputs} do not match outputs {outputs}")]
    AssetAmountMismatch { name: String, inputs: Amount, outputs: Amount },

    // =========================================================================
    // Storage Errors
    // =========================================================================

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TxValidateError {
    /// Stable rejection reason
    pub fn reason(&self) -> &'static str {
        match self {
            TxValidateError::EmptyInputs => "bad-txns-vin-empty",
            TxValidateError::EmptyOutputs => "bad-txns-vout-empty",
            TxValidateError::NegativeOutput { .. } => "bad-txns-vout-negative",
            TxValidateError::OutputTooLarge { .. } => "bad-txns-vout-toolarge",
            TxValidateError::OutputTotalTooLarge => "bad-txns-txouttotal-toolarge",
            TxValidateError::DuplicateInput(_) => "bad-txns-inputs-duplicate",
            TxValidateError::NullPrevout => "bad-txns-prevout-null",
            TxValidateError::MissingOrSpentInput(_) => "bad-txns-inputs-missingorspent",
            TxValidateError::PrematureCoinbaseSpend { .. } => "bad-txns-premature-spend-of-coinbase",
            TxValidateError::PrematureCoinstakeSpend { .. } => "bad-txns-premature-spend-of-coinstake",
            TxValidateError::InputAfterTransaction { .. } => "bad-txns-spent-too-early",
            TxValidateError::InputValuesOutOfRange => "bad-txns-inputvalues-outofrange",
            TxValidateError::InputsBelowOutputs { .. } => "bad-txns-in-belowout",
            TxValidateError::FeeOutOfRange(_) => "bad-txns-fee-outofrange",
            TxValidateError::InvalidAssetScript(_) => "bad-txns-asset-script-invalid",
            TxValidateError::AssetTimeLocked { .. } => "bad-txns-asset-timelocked",
            TxValidateError::AssetInputValuesOutOfRange(_) => "bad-txns-asset-inputs-outofrange",
            TxValidateError::AssetOutputValuesOutOfRange(_) => "bad-txns-asset-outputs-outofrange",
            TxValidateError::InvalidTransferAmount { .. } => "bad-txns-transfer-amount-invalid",
            TxValidateError::OwnerTransferAmount { .. } => "bad-txns-transfer-owner-amount-was-not-1",
            TxValidateError::UniqueTransferAmount { .. } => "bad-txns-transfer-unique-amount-was-not-1",
            TxValidateError::TransferAssetNotFound(_) => "bad-txns-transfer-asset-not-exist",
            TxValidateError::TransferUnitsMismatch { .. } => "bad-txns-transfer-asset-amount-not-match-units",
            TxValidateError::InvalidIssue { .. } => "bad-txns-issue-invalid",
            TxValidateError::IssueAssetExists(_) => "bad-txns-issue-asset-already-exists",
            TxValidateError::IssueOwnerMissing(_) => "bad-txns-issue-owner-output-missing",
            TxValidateError::IssueParentOwnerNotSpent { .. } => "bad-txns-issue-parent-owner-not-spent",
            TxValidateError::OwnerWithoutIssue(_) => "bad-txns-owner-without-issue",
            TxValidateError::DuplicateReissue(_) => "bad-txns-reissue-duplicate",
            TxValidateError::ReissueAssetNotFound(_) => "bad-txns-reissue-asset-not-exist",
            TxValidateError::ReissueNotReissuable(_) => "bad-txns-reissue-asset-not-reissuable",
            TxValidateError::InvalidReissueAmount { .. } => "bad-txns-reissue-amount-invalid",
            TxValidateError::ReissueUnitsDecreasing { .. } => "bad-txns-reissue-units-decreasing",
            TxValidateError::ReissueOwnerNotSpent { .. } => "bad-txns-reissue-owner-not-spent",
            TxValidateError::ReissueChaining(_) => "bad-txns-reissue-chaining-not-allowed",
            TxValidateError::AssetSetMismatch(_) => "bad-txns-asset-names-mismatch",
            TxValidateError::AssetAmountMismatch { .. } => "bad-txns-asset-amounts-mismatch",
            TxValidateError::Storage(_) => "storage-error",
        }
    }
}

impl From<UtxoError> for TxValidateError {
    fn from(e: UtxoError) -> Self {
        TxValidateError::Storage(e.to_string())
    }
}

impl From<TokenError> for TxValidateError {
    fn from(e: TokenError) -> Self {
        TxValidateError::Storage(e.to_string())
    }
}

/// Result type for transaction validation
pub type TxValidateResult<T> = Result<T, TxValidateError>;
