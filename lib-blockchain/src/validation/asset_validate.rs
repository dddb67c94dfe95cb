//! Asset Conservation
//!
//! Every asset a transaction spends must leave it again, name for name and
//! amount for amount. Issuance and reissuance outputs mint and are kept out
//! of the totals; the owner tokens that authorise them are transferred
//! through the transaction like any other asset.
//!
//! Reissuances within one block are serialised through a lock map of
//! asset name to the transaction that reissued it. A transaction only
//! takes its locks once every other check has passed.

use std::collections::{BTreeMap, BTreeSet};

use lib_tokens::{
    asset_type, check_amount_with_units, is_owner_name, is_time_lock_final, owner_name,
    parent_name, AssetDescriptor, AssetPayload, AssetScriptCodec, AssetTransfer, AssetType,
    AssetsCache, ReissueAsset, MAX_UNITS, OWNER_ASSET_AMOUNT, UNIQUE_ASSET_AMOUNT,
};
use lib_types::{checked_money_add, money_range, Amount, BlockHeight, TxHash};
use lib_utxo::CoinsView;

use crate::transaction::Transaction;

use super::errors::{TxValidateError, TxValidateResult};

/// Asset outputs of one transaction, grouped by payload kind
#[derive(Default)]
struct AssetOutputs {
    transfers: Vec<AssetTransfer>,
    issues: Vec<AssetDescriptor>,
    reissues: Vec<ReissueAsset>,
    owners: Vec<String>,
}

fn decode(codec: &dyn AssetScriptCodec, script: &[u8]) -> TxValidateResult<Option<AssetPayload>> {
    codec
        .decode_script(script)
        .map(|decoded| decoded.map(|(payload, _)| payload))
        .map_err(|e| TxValidateError::InvalidAssetScript(e.to_string()))
}

fn accumulate(
    totals: &mut BTreeMap<String, Amount>,
    name: &str,
    amount: Amount,
    out_of_range: impl FnOnce(String) -> TxValidateError,
) -> TxValidateResult<()> {
    let total = totals.entry(name.to_string()).or_insert(0);
    *total = checked_money_add(*total, amount).ok_or_else(|| out_of_range(name.to_string()))?;
    Ok(())
}

/// Check the asset movements of a transaction
///
/// On success every asset this transaction reissues is locked to it in
/// `locks`. On failure `locks` is untouched.
pub fn check_tx_assets(
    tx: &Transaction,
    coins: &dyn CoinsView,
    assets: &AssetsCache<'_>,
    codec: &dyn AssetScriptCodec,
    spend_height: BlockHeight,
    spend_time: u32,
    locks: &mut BTreeMap<String, TxHash>,
) -> TxValidateResult<()> {
    let outputs = collect_outputs(tx, codec)?;

    if tx.is_coinbase() {
        if outputs.is_empty() {
            return Ok(());
        }
        return Err(TxValidateError::InvalidAssetScript("coinbase carries an asset".to_string()));
    }

    let inputs = input_totals(tx, coins, codec, spend_height, spend_time)?;

    let mut output_totals = BTreeMap::new();
    for transfer in &outputs.transfers {
        check_transfer(transfer, assets, &outputs.issues)?;
        accumulate(&mut output_totals, &transfer.name, transfer.amount, TxValidateError::AssetOutputValuesOutOfRange)?;
    }

    check_issues(&outputs, assets, &inputs)?;
    let txid = tx.hash();
    check_reissues(&outputs.reissues, assets, &inputs, locks, &txid)?;
    check_conservation(&inputs, &output_totals)?;

    for reissue in &outputs.reissues {
        locks.insert(reissue.name.clone(), txid);
    }
    Ok(())
}

impl AssetOutputs {
    fn is_empty(&self) -> bool {
        self.transfers.is_empty() && self.issues.is_empty() && self.reissues.is_empty() && self.owners.is_empty()
    }
}

fn collect_outputs(tx: &Transaction, codec: &dyn AssetScriptCodec) -> TxValidateResult<AssetOutputs> {
    let mut outputs = AssetOutputs::default();
    for output in &tx.outputs {
        match decode(codec, &output.script)? {
            Some(AssetPayload::Transfer(transfer)) => outputs.transfers.push(transfer),
            Some(AssetPayload::Issue(asset)) => outputs.issues.push(asset),
            Some(AssetPayload::Reissue(reissue)) => outputs.reissues.push(reissue),
            Some(AssetPayload::Owner(name)) => outputs.owners.push(name),
            None => {}
        }
    }
    Ok(outputs)
}

/// Per-name totals of the asset inputs, rejecting unexpired time-locks
fn input_totals(
    tx: &Transaction,
    coins: &dyn CoinsView,
    codec: &dyn AssetScriptCodec,
    spend_height: BlockHeight,
    spend_time: u32,
) -> TxValidateResult<BTreeMap<String, Amount>> {
    let mut totals = BTreeMap::new();
    for input in &tx.inputs {
        let outpoint = input.prevout;
        let coin = coins
            .get_coin(&outpoint)?
            .ok_or(TxValidateError::MissingOrSpentInput(outpoint))?;
        let Some(payload) = decode(codec, &coin.script)? else {
            continue;
        };

        let lock = payload.time_lock();
        if !is_time_lock_final(lock, spend_height, spend_time) {
            return Err(TxValidateError::AssetTimeLocked { outpoint, lock });
        }
        accumulate(&mut totals, payload.name(), payload.amount(), TxValidateError::AssetInputValuesOutOfRange)?;
    }
    Ok(totals)
}

fn exists(assets: &AssetsCache<'_>, issues: &[AssetDescriptor], name: &str) -> TxValidateResult<bool> {
    Ok(issues.iter().any(|asset| asset.name == name) || assets.asset_exists(name)?)
}

fn check_transfer(
    transfer: &AssetTransfer,
    assets: &AssetsCache<'_>,
    issues: &[AssetDescriptor],
) -> TxValidateResult<()> {
    let name = transfer.name.clone();
    let amount = transfer.amount;
    if amount <= 0 || !money_range(amount) {
        return Err(TxValidateError::InvalidTransferAmount { name, amount });
    }

    match asset_type(&name) {
        Some(AssetType::Owner) => {
            if amount != OWNER_ASSET_AMOUNT {
                return Err(TxValidateError::OwnerTransferAmount { name, amount });
            }
            let base = parent_name(&name).unwrap_or_default();
            if !exists(assets, issues, base)? {
                return Err(TxValidateError::TransferAssetNotFound(name));
            }
        }
        Some(AssetType::Unique) => {
            if amount != UNIQUE_ASSET_AMOUNT {
                return Err(TxValidateError::UniqueTransferAmount { name, amount });
            }
            if !exists(assets, issues, &name)? {
                return Err(TxValidateError::TransferAssetNotFound(name));
            }
        }
        Some(AssetType::Root | AssetType::Sub) => {
            let units = match issues.iter().find(|asset| asset.name == name) {
                Some(asset) => asset.units,
                None => match assets.lookup_descriptor(&name)? {
                    Some(record) => record.descriptor.units,
                    None => return Err(TxValidateError::TransferAssetNotFound(name)),
                },
            };
            if !check_amount_with_units(amount, units) {
                return Err(TxValidateError::TransferUnitsMismatch { name, amount });
            }
        }
        None => return Err(TxValidateError::TransferAssetNotFound(name)),
    }
    Ok(())
}

fn check_issues(
    outputs: &AssetOutputs,
    assets: &AssetsCache<'_>,
    inputs: &BTreeMap<String, Amount>,
) -> TxValidateResult<()> {
    let mut issued = BTreeSet::new();
    let mut owners_needed = BTreeSet::new();

    for asset in &outputs.issues {
        let name = asset.name.clone();
        asset
            .check()
            .map_err(|reason| TxValidateError::InvalidIssue { name: name.clone(), reason })?;
        if !issued.insert(name.clone()) || assets.asset_exists(&name)? {
            return Err(TxValidateError::IssueAssetExists(name));
        }

        let kind = asset_type(&name);
        if matches!(kind, Some(AssetType::Root | AssetType::Sub)) {
            let owner = owner_name(&name);
            if !outputs.owners.contains(&owner) {
                return Err(TxValidateError::IssueOwnerMissing(name));
            }
            owners_needed.insert(owner);
        }
        if matches!(kind, Some(AssetType::Sub | AssetType::Unique)) {
            let parent = parent_name(&name).map(owner_name).unwrap_or_default();
            if !inputs.contains_key(&parent) {
                return Err(TxValidateError::IssueParentOwnerNotSpent { name, owner: parent });
            }
        }
    }

    for owner in &outputs.owners {
        if !is_owner_name(owner) || !owners_needed.contains(owner) {
            return Err(TxValidateError::OwnerWithoutIssue(owner.clone()));
        }
    }
    Ok(())
}

fn check_reissues(
    reissues: &[ReissueAsset],
    assets: &AssetsCache<'_>,
    inputs: &BTreeMap<String, Amount>,
    locks: &BTreeMap<String, TxHash>,
    txid: &TxHash,
) -> TxValidateResult<()> {
    let mut seen = BTreeSet::new();

    for reissue in reissues {
        let name = reissue.name.clone();
        if !seen.insert(name.clone()) {
            return Err(TxValidateError::DuplicateReissue(name));
        }

        let record = assets
            .lookup_descriptor(&name)?
            .ok_or_else(|| TxValidateError::ReissueAssetNotFound(name.clone()))?;
        let current = &record.descriptor;
        if !current.reissuable {
            return Err(TxValidateError::ReissueNotReissuable(name));
        }

        let units = reissue.units.unwrap_or(current.units);
        if units < current.units {
            return Err(TxValidateError::ReissueUnitsDecreasing {
                name,
                current: current.units,
                requested: units,
            });
        }
        let amount = reissue.amount;
        let amount_valid = units <= MAX_UNITS
            && money_range(amount)
            && checked_money_add(current.amount, amount).is_some()
            && check_amount_with_units(amount, units);
        if !amount_valid {
            return Err(TxValidateError::InvalidReissueAmount { name, amount });
        }

        let owner = owner_name(&name);
        if !inputs.contains_key(&owner) {
            return Err(TxValidateError::ReissueOwnerNotSpent { name, owner });
        }

        if locks.get(&name).is_some_and(|holder| holder != txid) {
            return Err(TxValidateError::ReissueChaining(name));
        }
    }
    Ok(())
}

fn check_conservation(
    inputs: &BTreeMap<String, Amount>,
    outputs: &BTreeMap<String, Amount>,
) -> TxValidateResult<()> {
    if let Some(name) = inputs
        .keys()
        .find(|name| !outputs.contains_key(*name))
        .or_else(|| outputs.keys().find(|name| !inputs.contains_key(*name)))
    {
        return Err(TxValidateError::AssetSetMismatch(name.clone()));
    }

    for (name, &input) in inputs {
        let output = outputs.get(name).copied().unwrap_or(0);
        if input != output {
            return Err(TxValidateError::AssetAmountMismatch {
                name: name.clone(),
                inputs: input,
                outputs: output,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxIn, TxOut};
    use lib_tokens::{AssetsView, MemoryAssetStore, MetadataCache, StandardAssetScript};
    use lib_types::{Address, BlockHash, OutPoint, COIN};
    use lib_utxo::{Coin, MemoryCoinsView};

    const ISSUER: Address = Address::new([1; 20]);
    const BOB: Address = Address::new([2; 20]);

    fn op(n: u8) -> OutPoint {
        OutPoint::new(TxHash::new([n; 32]), 0)
    }

    fn script(holder: Address, payload: AssetPayload) -> Vec<u8> {
        StandardAssetScript::build(&holder, &payload).unwrap()
    }

    fn transfer(name: &str, amount: Amount) -> AssetPayload {
        AssetPayload::Transfer(AssetTransfer::new(name, amount))
    }

    fn asset_out(holder: Address, payload: AssetPayload) -> TxOut {
        TxOut::new(0, script(holder, payload))
    }

    /// Ledger with GOLD (units 2) issued to ISSUER
    struct Fixture {
        coins: MemoryCoinsView,
        store: MemoryAssetStore,
        metadata: MetadataCache,
    }

    impl Fixture {
        fn new() -> Self {
            let mut fixture = Self {
                coins: MemoryCoinsView::new(),
                store: MemoryAssetStore::new(),
                metadata: MetadataCache::new(16).unwrap(),
            };
            let codec = StandardAssetScript;
            let store: &mut dyn AssetsView = &mut fixture.store;
            let mut ledger = AssetsCache::new(store, &fixture.metadata, &codec);
            ledger
                .register_issuance(&AssetDescriptor::new("GOLD", 1_000 * COIN, 2, true), &ISSUER, 1, BlockHash::zero())
                .unwrap();
            ledger.register_owner_creation("GOLD", &ISSUER).unwrap();
            ledger.flush().unwrap();
            fixture
        }

        fn fund(&mut self, n: u8, holder: Address, payload: Option<AssetPayload>) -> OutPoint {
            let script = match payload {
                Some(payload) => script(holder, payload),
                None => StandardAssetScript::p2pkh(&holder),
            };
            self.coins.insert(op(n), Coin::new(COIN, script, 1, 10));
            op(n)
        }

        fn check(&mut self, tx: &Transaction, locks: &mut BTreeMap<String, TxHash>) -> TxValidateResult<()> {
            let codec = StandardAssetScript;
            let store: &mut dyn AssetsView = &mut self.store;
            let ledger = AssetsCache::new(store, &self.metadata, &codec);
            check_tx_assets(tx, &self.coins, &ledger, &codec, 100, 1_000_000, locks)
        }
    }

    fn tx(inputs: &[OutPoint], outputs: Vec<TxOut>) -> Transaction {
        Transaction::new(100, inputs.iter().copied().map(TxIn::new).collect(), outputs)
    }

    fn reason(result: TxValidateResult<()>) -> &'static str {
        result.unwrap_err().reason()
    }

    #[test]
    fn test_balanced_transfer_passes() {
        let mut f = Fixture::new();
        let input = f.fund(1, ISSUER, Some(transfer("GOLD", 500 * COIN)));
        let spend = tx(
            &[input],
            vec![
                asset_out(BOB, transfer("GOLD", 400 * COIN)),
                asset_out(ISSUER, transfer("GOLD", 100 * COIN)),
            ],
        );
        assert!(f.check(&spend, &mut BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_mint_and_burn_rejected() {
        let mut f = Fixture::new();
        let input = f.fund(1, ISSUER, Some(transfer("GOLD", 500 * COIN)));

        let mint = tx(&[input], vec![asset_out(BOB, transfer("GOLD", 501 * COIN))]);
        assert_eq!(reason(f.check(&mint, &mut BTreeMap::new())), "bad-txns-asset-amounts-mismatch");

        let burn = tx(&[input], vec![TxOut::new(COIN, StandardAssetScript::p2pkh(&BOB))]);
        assert_eq!(reason(f.check(&burn, &mut BTreeMap::new())), "bad-txns-asset-names-mismatch");

        let plain = f.fund(2, ISSUER, None);
        let conjure = tx(&[plain], vec![asset_out(BOB, transfer("GOLD", COIN))]);
        assert_eq!(reason(f.check(&conjure, &mut BTreeMap::new())), "bad-txns-asset-names-mismatch");
    }

    #[test]
    fn test_owner_transfer_amount_must_be_one() {
        let mut f = Fixture::new();
        let owner = f.fund(1, ISSUER, Some(AssetPayload::Owner("GOLD!".into())));
        let spend = tx(&[owner], vec![asset_out(BOB, transfer("GOLD!", 2 * COIN))]);
        let err = f.check(&spend, &mut BTreeMap::new()).unwrap_err();
        assert_eq!(err.reason(), "bad-txns-transfer-owner-amount-was-not-1");

        let spend = tx(&[owner], vec![asset_out(BOB, transfer("GOLD!", COIN))]);
        assert!(f.check(&spend, &mut BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_units_and_existence() {
        let mut f = Fixture::new();
        let input = f.fund(1, ISSUER, Some(transfer("GOLD", 500 * COIN)));
        let odd = tx(
            &[input],
            vec![
                asset_out(BOB, transfer("GOLD", 1)),
                asset_out(ISSUER, transfer("GOLD", 500 * COIN - 1)),
            ],
        );
        assert_eq!(reason(f.check(&odd, &mut BTreeMap::new())), "bad-txns-transfer-asset-amount-not-match-units");

        let missing = tx(&[input], vec![asset_out(BOB, transfer("SILVER", COIN))]);
        assert_eq!(reason(f.check(&missing, &mut BTreeMap::new())), "bad-txns-transfer-asset-not-exist");
    }

    #[test]
    fn test_time_locked_input() {
        let mut f = Fixture::new();
        let mut locked = AssetTransfer::new("GOLD", 5 * COIN);
        locked.time_lock = 150;
        let input = f.fund(1, ISSUER, Some(AssetPayload::Transfer(locked)));
        let spend = tx(&[input], vec![asset_out(BOB, transfer("GOLD", 5 * COIN))]);
        assert_eq!(reason(f.check(&spend, &mut BTreeMap::new())), "bad-txns-asset-timelocked");
    }

    #[test]
    fn test_issue_requires_owner_output() {
        let mut f = Fixture::new();
        let fee = f.fund(1, ISSUER, None);
        let silver = AssetDescriptor::new("SILVER", 10 * COIN, 0, true);

        let no_owner = tx(&[fee], vec![asset_out(ISSUER, AssetPayload::Issue(silver.clone()))]);
        assert_eq!(reason(f.check(&no_owner, &mut BTreeMap::new())), "bad-txns-issue-owner-output-missing");

        let issue = tx(
            &[fee],
            vec![
                asset_out(ISSUER, AssetPayload::Issue(silver)),
                asset_out(ISSUER, AssetPayload::Owner("SILVER!".into())),
            ],
        );
        assert!(f.check(&issue, &mut BTreeMap::new()).is_ok());

        let again = tx(
            &[fee],
            vec![
                asset_out(ISSUER, AssetPayload::Issue(AssetDescriptor::new("GOLD", COIN, 0, true))),
                asset_out(ISSUER, AssetPayload::Owner("GOLD!".into())),
            ],
        );
        assert_eq!(reason(f.check(&again, &mut BTreeMap::new())), "bad-txns-issue-asset-already-exists");

        let stray = tx(&[fee], vec![asset_out(ISSUER, AssetPayload::Owner("COPPER!".into()))]);
        assert_eq!(reason(f.check(&stray, &mut BTreeMap::new())), "bad-txns-owner-without-issue");
    }

    #[test]
    fn test_sub_asset_needs_parent_owner() {
        let mut f = Fixture::new();
        let fee = f.fund(1, ISSUER, None);
        let owner = f.fund(2, ISSUER, Some(AssetPayload::Owner("GOLD!".into())));
        let bar = AssetDescriptor::new("GOLD/BAR", COIN, 0, false);
        let outputs = |with_owner_back: bool| {
            let mut outputs = vec![
                asset_out(ISSUER, AssetPayload::Issue(bar.clone())),
                asset_out(ISSUER, AssetPayload::Owner("GOLD/BAR!".into())),
            ];
            if with_owner_back {
                outputs.push(asset_out(ISSUER, transfer("GOLD!", COIN)));
            }
            outputs
        };

        let without = tx(&[fee], outputs(false));
        assert_eq!(reason(f.check(&without, &mut BTreeMap::new())), "bad-txns-issue-parent-owner-not-spent");

        let with = tx(&[fee, owner], outputs(true));
        assert!(f.check(&with, &mut BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_reissue_rules() {
        let mut f = Fixture::new();
        let owner = f.fund(1, ISSUER, Some(AssetPayload::Owner("GOLD!".into())));
        let fee = f.fund(2, ISSUER, None);
        let reissue = |r: ReissueAsset, spend_owner: bool| {
            let inputs = if spend_owner { vec![owner, fee] } else { vec![fee] };
            let mut outputs = vec![asset_out(ISSUER, AssetPayload::Reissue(r))];
            if spend_owner {
                outputs.push(asset_out(ISSUER, transfer("GOLD!", COIN)));
            }
            tx(&inputs, outputs)
        };

        assert!(f.check(&reissue(ReissueAsset::new("GOLD", 10 * COIN), true), &mut BTreeMap::new()).is_ok());
        assert_eq!(
            reason(f.check(&reissue(ReissueAsset::new("GOLD", 10 * COIN), false), &mut BTreeMap::new())),
            "bad-txns-reissue-owner-not-spent"
        );
        assert_eq!(
            reason(f.check(&reissue(ReissueAsset::new("SILVER", COIN), true), &mut BTreeMap::new())),
            "bad-txns-reissue-asset-not-exist"
        );

        let mut fewer_units = ReissueAsset::new("GOLD", COIN);
        fewer_units.units = Some(1);
        assert_eq!(
            reason(f.check(&reissue(fewer_units, true), &mut BTreeMap::new())),
            "bad-txns-reissue-units-decreasing"
        );

        assert_eq!(
            reason(f.check(&reissue(ReissueAsset::new("GOLD", 1), true), &mut BTreeMap::new())),
            "bad-txns-reissue-amount-invalid"
        );
    }

    #[test]
    fn test_second_reissue_in_block_is_chaining() {
        let mut f = Fixture::new();
        let owner = f.fund(1, ISSUER, Some(AssetPayload::Owner("GOLD!".into())));
        let other_owner = f.fund(2, ISSUER, Some(AssetPayload::Owner("GOLD!".into())));
        let make = |input: OutPoint, delta: Amount| {
            tx(
                &[input],
                vec![
                    asset_out(ISSUER, AssetPayload::Reissue(ReissueAsset::new("GOLD", delta))),
                    asset_out(ISSUER, transfer("GOLD!", COIN)),
                ],
            )
        };
        let first = make(owner, 10 * COIN);
        let second = make(other_owner, 20 * COIN);

        let mut locks = BTreeMap::new();
        f.check(&first, &mut locks).unwrap();
        assert_eq!(locks.get("GOLD"), Some(&first.hash()));

        let err = f.check(&second, &mut locks).unwrap_err();
        assert_eq!(err.reason(), "bad-txns-reissue-chaining-not-allowed");
        assert_eq!(locks.get("GOLD"), Some(&first.hash()));

        // the holder of the lock may be checked again
        assert!(f.check(&first, &mut locks).is_ok());
    }

    #[test]
    fn test_failed_check_takes_no_lock() {
        let mut f = Fixture::new();
        let owner = f.fund(1, ISSUER, Some(AssetPayload::Owner("GOLD!".into())));
        // reissues but burns the owner token
        let bad = tx(&[owner], vec![asset_out(ISSUER, AssetPayload::Reissue(ReissueAsset::new("GOLD", COIN)))]);
        let mut locks = BTreeMap::new();
        assert_eq!(reason(f.check(&bad, &mut locks)), "bad-txns-asset-names-mismatch");
        assert!(locks.is_empty());
    }
}
