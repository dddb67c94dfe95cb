//! Monetary constants and range checks
//!
//! Every amount that crosses a consensus boundary (coin values, fees, asset
//! quantities) must satisfy [`money_range`].

use crate::primitives::Amount;

/// Base units per whole coin (8 decimal places)
pub const COIN: Amount = 100_000_000;

/// Hard cap on any single amount and on sums of amounts
pub const MAX_MONEY: Amount = 21_000_000_000 * COIN;

/// Check that an amount is within `[0, MAX_MONEY]`
#[inline]
pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// Add two amounts, returning `None` on overflow or when the sum leaves the money range
#[inline]
pub fn checked_money_add(a: Amount, b: Amount) -> Option<Amount> {
    let sum = a.checked_add(b)?;
    money_range(sum).then_some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_range_bounds() {
        assert!(money_range(0));
        assert!(money_range(MAX_MONEY));
        assert!(!money_range(-1));
        assert!(!money_range(MAX_MONEY + 1));
    }

    #[test]
    fn test_checked_money_add() {
        assert_eq!(checked_money_add(COIN, COIN), Some(2 * COIN));
        assert_eq!(checked_money_add(MAX_MONEY, 1), None);
        assert_eq!(checked_money_add(i64::MAX, 1), None);
    }
}
