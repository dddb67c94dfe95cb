//! Transaction Validation
//!
//! # Validation Phases
//!
//! 1. **Stateless** ([`check_transaction`]) - structure only
//!    - Non-empty inputs and outputs
//!    - Output values and their sum within the money range
//!    - No duplicate or null inputs outside coinbase
//!
//! 2. **Value conservation** ([`check_tx_inputs`]) - reads the coin view
//!    - Every input exists and is unspent
//!    - Reward outputs have matured
//!    - No input is younger than the spending transaction
//!    - Inputs cover outputs; the fee is in range
//!
//! Neither phase writes to any cache.

use std::collections::HashSet;

use tracing::debug;

use lib_types::{checked_money_add, money_range, Amount, BlockHeight};
use lib_utxo::CoinsView;

use crate::config::ChainStateConfig;
use crate::transaction::Transaction;

use super::errors::{TxValidateError, TxValidateResult};

// =============================================================================
// Stateless Validation
// =============================================================================

/// Validate transaction structure without chain state
pub fn check_transaction(tx: &Transaction) -> TxValidateResult<()> {
    if tx.inputs.is_empty() {
        return Err(TxValidateError::EmptyInputs);
    }
    if tx.outputs.is_empty() {
        return Err(TxValidateError::EmptyOutputs);
    }

    let mut total: Amount = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value < 0 {
            return Err(TxValidateError::NegativeOutput { index });
        }
        if !money_range(output.value) {
            return Err(TxValidateError::OutputTooLarge { index });
        }
        total = checked_money_add(total, output.value).ok_or(TxValidateError::OutputTotalTooLarge)?;
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Err(TxValidateError::DuplicateInput(input.prevout));
        }
    }

    if !tx.is_coinbase() && tx.inputs.iter().any(|input| input.prevout.is_null()) {
        return Err(TxValidateError::NullPrevout);
    }

    Ok(())
}

// =============================================================================
// Value Conservation
// =============================================================================

/// Check the native value of a transaction against the coin view
///
/// Returns the fee. Coinbase transactions and coinstakes mint their reward
/// and report a fee of zero; coinstake inputs are still checked.
pub fn check_tx_inputs(
    tx: &Transaction,
    coins: &dyn CoinsView,
    spend_height: BlockHeight,
    config: &ChainStateConfig,
) -> TxValidateResult<Amount> {
    if tx.is_coinbase() {
        return Ok(0);
    }

    let maturity = config.maturity.maturity_at(spend_height);
    let mut value_in: Amount = 0;

    for input in &tx.inputs {
        let outpoint = input.prevout;
        let coin = coins
            .get_coin(&outpoint)?
            .ok_or(TxValidateError::MissingOrSpentInput(outpoint))?;

        let depth = spend_height.saturating_sub(coin.height);
        if coin.coinbase && depth < maturity {
            return Err(TxValidateError::PrematureCoinbaseSpend { outpoint, depth, required: maturity });
        }
        if coin.coinstake && depth < maturity {
            return Err(TxValidateError::PrematureCoinstakeSpend { outpoint, depth, required: maturity });
        }

        if coin.time > tx.time {
            return Err(TxValidateError::InputAfterTransaction {
                outpoint,
                coin_time: coin.time,
                tx_time: tx.time,
            });
        }

        if !config.money_range(coin.amount) {
            return Err(TxValidateError::InputValuesOutOfRange);
        }
        value_in = value_in
            .checked_add(coin.amount)
            .filter(|total| config.money_range(*total))
            .ok_or(TxValidateError::InputValuesOutOfRange)?;
    }

    let value_out = tx
        .value_out()
        .filter(|total| config.money_range(*total))
        .ok_or(TxValidateError::OutputTotalTooLarge)?;

    if tx.is_coinstake() {
        debug!(tx = %tx.hash(), value_in, value_out, "coinstake exempt from fee");
        return Ok(0);
    }

    if value_in < value_out {
        return Err(TxValidateError::InputsBelowOutputs { value_in, value_out });
    }
    let fee = value_in - value_out;
    if !config.money_range(fee) {
        return Err(TxValidateError::FeeOutOfRange(fee));
    }
    Ok(fee)
}
