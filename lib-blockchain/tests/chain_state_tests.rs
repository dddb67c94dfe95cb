//! Chain State Tests
//!
//! Blocks connected and disconnected against a temporary sled store.

use anyhow::Result;

use lib_blockchain::storage::keys::{ADDRESS_TYPE_PUBKEY_HASH, NATIVE_ASSET};
use lib_blockchain::{
    AssetsDb, Block, BlockApplyError, ChainState, ChainStateConfig, CoinsDb, MaturitySchedule,
    SledStore, Transaction, TxIn, TxOut, CHAIN_STATE_VERSION,
};
use lib_tokens::{
    AssetDescriptor, AssetPayload, AssetTransfer, MetadataCache, ReissueAsset, StandardAssetScript,
};
use lib_types::{Address, BlockHash, COIN};
use lib_utxo::CoinsView;

const ISSUER: Address = Address::new([1; 20]);
const BOB: Address = Address::new([2; 20]);

/// Store handles and shared caches a [`ChainState`] borrows
struct Node {
    store: SledStore,
    coins_db: CoinsDb,
    assets_db: AssetsDb,
    metadata: MetadataCache,
    codec: StandardAssetScript,
    config: ChainStateConfig,
}

impl Node {
    fn new() -> Result<Self> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let store = SledStore::open_temporary()?;
        Ok(Self {
            coins_db: store.coins_db(),
            assets_db: store.assets_db(),
            store,
            metadata: MetadataCache::new(64)?,
            codec: StandardAssetScript,
            config: ChainStateConfig {
                maturity: MaturitySchedule::fixed(1),
                address_index: true,
                ..Default::default()
            },
        })
    }

    fn state(&mut self) -> Result<ChainState<'_>> {
        Ok(ChainState::new(
            &mut self.coins_db,
            &mut self.assets_db,
            &self.store,
            &self.metadata,
            &self.codec,
            &self.config,
        )?)
    }
}

fn coinbase(time: u32) -> Transaction {
    Transaction::new(
        time,
        vec![TxIn::coinbase()],
        vec![TxOut::new(50 * COIN, StandardAssetScript::p2pkh(&ISSUER))],
    )
}

fn asset_out(holder: Address, payload: AssetPayload) -> TxOut {
    TxOut::new(0, StandardAssetScript::build(&holder, &payload).unwrap())
}

fn transfer(name: &str, amount: i64) -> AssetPayload {
    AssetPayload::Transfer(AssetTransfer::new(name, amount))
}

/// Three blocks: a coinbase, the issuance of GOLD, then a transfer and a reissue
struct Chain {
    b1: Block,
    b2: Block,
    b3: Block,
    issue: Transaction,
    reissue: Transaction,
}

fn chain() -> Chain {
    let b1 = Block::new(BlockHash::zero(), 1_000, vec![coinbase(1_000)]);

    let issue = Transaction::new(
        2_000,
        vec![TxIn::new(b1.transactions[0].outpoint(0))],
        vec![
            TxOut::new(49 * COIN, StandardAssetScript::p2pkh(&ISSUER)),
            asset_out(
                ISSUER,
                AssetPayload::Issue(AssetDescriptor::new("GOLD", 1_000 * COIN, 2, true)),
            ),
            asset_out(ISSUER, AssetPayload::Owner("GOLD!".into())),
        ],
    );
    let b2 = Block::new(b1.hash(), 2_000, vec![coinbase(2_000), issue.clone()]);

    let spend = Transaction::new(
        3_000,
        vec![TxIn::new(issue.outpoint(1))],
        vec![
            asset_out(BOB, transfer("GOLD", 400 * COIN)),
            asset_out(ISSUER, transfer("GOLD", 600 * COIN)),
        ],
    );
    let reissue = Transaction::new(
        3_000,
        vec![TxIn::new(issue.outpoint(2))],
        vec![
            asset_out(ISSUER, AssetPayload::Reissue(ReissueAsset::new("GOLD", 500 * COIN))),
            asset_out(ISSUER, transfer("GOLD!", COIN)),
        ],
    );
    let b3 = Block::new(b2.hash(), 3_000, vec![coinbase(3_000), spend, reissue.clone()]);

    Chain { b1, b2, b3, issue, reissue }
}

/// Test 1: connecting issue, transfer and reissue blocks updates the ledger
#[test]
fn test_connect_issue_transfer_reissue() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    let mut state = node.state()?;

    state.connect_block(&chain.b1, 1)?;
    state.connect_block(&chain.b2, 2)?;
    let gold = state.assets().lookup_descriptor("GOLD")?.expect("GOLD issued");
    assert_eq!(gold.descriptor.amount, 1_000 * COIN);
    assert_eq!(gold.height, 2);
    assert_eq!(gold.block_hash, chain.b2.hash());
    assert_eq!(state.assets().balance("GOLD!", &ISSUER)?, COIN);

    state.connect_block(&chain.b3, 3)?;
    assert_eq!(state.best_block()?, chain.b3.hash());
    assert_eq!(state.assets().lookup_descriptor("GOLD")?.unwrap().descriptor.amount, 1_500 * COIN);
    assert_eq!(state.assets().balance("GOLD", &BOB)?, 400 * COIN);
    assert_eq!(state.assets().balance("GOLD", &ISSUER)?, 1_100 * COIN);
    assert_eq!(state.assets().balance("GOLD!", &ISSUER)?, COIN);
    assert_eq!(state.reissue_locks().get("GOLD"), Some(&chain.reissue.hash()));

    assert!(state.coins().get_coin(&chain.b1.transactions[0].outpoint(0))?.is_none());
    assert_eq!(state.coins().get_coin(&chain.issue.outpoint(0))?.unwrap().amount, 49 * COIN);
    Ok(())
}

/// Test 2: disconnecting restores descriptors, balances and coins
#[test]
fn test_disconnect_restores_prior_state() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    let mut state = node.state()?;

    state.connect_block(&chain.b1, 1)?;
    let undo2 = state.connect_block(&chain.b2, 2)?;
    let undo3 = state.connect_block(&chain.b3, 3)?;
    assert_eq!(undo3.spent_count(), 2);

    state.disconnect_block(&chain.b3, 3, &undo3)?;
    assert_eq!(state.best_block()?, chain.b2.hash());
    let gold = state.assets().lookup_descriptor("GOLD")?.unwrap();
    assert_eq!(gold.descriptor.amount, 1_000 * COIN);
    assert!(gold.descriptor.reissuable);
    assert_eq!(state.assets().balance("GOLD", &ISSUER)?, 1_000 * COIN);
    assert_eq!(state.assets().balance("GOLD", &BOB)?, 0);
    assert_eq!(state.assets().balance("GOLD!", &ISSUER)?, COIN);
    assert!(state.reissue_locks().is_empty());

    state.disconnect_block(&chain.b2, 2, &undo2)?;
    assert_eq!(state.best_block()?, chain.b1.hash());
    assert!(!state.assets().asset_exists("GOLD")?);
    assert_eq!(state.assets().balance("GOLD!", &ISSUER)?, 0);
    let restored = state.coins().get_coin(&chain.b1.transactions[0].outpoint(0))?.unwrap();
    assert_eq!(restored.amount, 50 * COIN);
    assert!(restored.coinbase);
    Ok(())
}

/// Test 3: only the tip can be disconnected
#[test]
fn test_disconnect_requires_tip() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    let mut state = node.state()?;

    state.connect_block(&chain.b1, 1)?;
    let undo2 = state.connect_block(&chain.b2, 2)?;
    state.connect_block(&chain.b3, 3)?;

    let err = state.disconnect_block(&chain.b2, 2, &undo2).unwrap_err();
    assert!(matches!(err, BlockApplyError::NotTip { .. }));
    assert_eq!(state.best_block()?, chain.b3.hash());
    Ok(())
}

/// Test 4: a rejected block leaves the tip untouched
#[test]
fn test_rejected_block_leaves_tip_unchanged() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    let mut state = node.state()?;

    state.connect_block(&chain.b1, 1)?;
    let overspend = Transaction::new(
        2_000,
        vec![TxIn::new(chain.b1.transactions[0].outpoint(0))],
        vec![TxOut::new(51 * COIN, StandardAssetScript::p2pkh(&BOB))],
    );
    let bad = Block::new(chain.b1.hash(), 2_000, vec![coinbase(2_000), overspend]);

    let err = state.connect_block(&bad, 2).unwrap_err();
    assert_eq!(err.reason(), Some("bad-txns-in-belowout"));
    assert!(matches!(err, BlockApplyError::TxRejected { index: 1, .. }));
    assert!(!err.is_fatal());

    assert_eq!(state.best_block()?, chain.b1.hash());
    assert!(state.coins().get_coin(&chain.b1.transactions[0].outpoint(0))?.is_some());
    assert!(state.coins().get_coin(&bad.transactions[0].outpoint(0))?.is_none());

    state.connect_block(&chain.b2, 2)?;
    assert_eq!(state.best_block()?, chain.b2.hash());
    Ok(())
}

/// Test 5: block structure is checked before any transaction
#[test]
fn test_block_prechecks() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    let mut state = node.state()?;

    let err = state.connect_block(&chain.b2, 2).unwrap_err();
    assert!(matches!(err, BlockApplyError::InvalidPreviousHash { .. }));

    let empty = Block::new(BlockHash::zero(), 1_000, vec![]);
    assert!(matches!(state.connect_block(&empty, 1).unwrap_err(), BlockApplyError::EmptyBlock));

    let mut tampered = chain.b1.clone();
    tampered.transactions[0].outputs[0].value = 60 * COIN;
    assert!(matches!(state.connect_block(&tampered, 1).unwrap_err(), BlockApplyError::InvalidTxRoot));

    let double = Block::new(BlockHash::zero(), 1_000, vec![coinbase(1_000), coinbase(1_001)]);
    assert!(matches!(
        state.connect_block(&double, 1).unwrap_err(),
        BlockApplyError::UnexpectedCoinbase { index: 1 }
    ));
    assert_eq!(state.best_block()?, BlockHash::zero());
    Ok(())
}

/// Test 6: a second reissue of the same asset in one block is rejected
#[test]
fn test_reissue_chaining_in_block_rejected() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    let mut state = node.state()?;
    state.connect_block(&chain.b1, 1)?;
    state.connect_block(&chain.b2, 2)?;

    let again = Transaction::new(
        3_000,
        vec![TxIn::new(chain.reissue.outpoint(1))],
        vec![
            asset_out(ISSUER, AssetPayload::Reissue(ReissueAsset::new("GOLD", 100 * COIN))),
            asset_out(ISSUER, transfer("GOLD!", COIN)),
        ],
    );
    let chained = Block::new(
        chain.b2.hash(),
        3_000,
        vec![coinbase(3_000), chain.reissue.clone(), again],
    );

    let err = state.connect_block(&chained, 3).unwrap_err();
    assert_eq!(err.reason(), Some("bad-txns-reissue-chaining-not-allowed"));
    assert!(matches!(err, BlockApplyError::TxRejected { index: 2, .. }));
    assert_eq!(state.best_block()?, chain.b2.hash());
    assert_eq!(state.assets().lookup_descriptor("GOLD")?.unwrap().descriptor.amount, 1_000 * COIN);

    state.connect_block(&chain.b3, 3)?;
    Ok(())
}

/// Test 7: flushed state survives a fresh chain state and is queryable
#[test]
fn test_flush_persists_state() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    {
        let mut state = node.state()?;
        state.connect_block(&chain.b1, 1)?;
        state.connect_block(&chain.b2, 2)?;
        state.connect_block(&chain.b3, 3)?;
        state.flush()?;
    }

    assert_eq!(node.coins_db.best_block()?, chain.b3.hash());
    assert_eq!(node.assets_db.asset_count()?, 1);
    let listed = node.assets_db.list_assets("GO", 10, 0)?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].descriptor.amount, 1_500 * COIN);

    assert_eq!(
        node.assets_db.holders("GOLD", 10, 0)?,
        vec![(ISSUER, 1_100 * COIN), (BOB, 400 * COIN)]
    );
    assert_eq!(
        node.assets_db.holdings(&ISSUER, 10, 0)?,
        vec![("GOLD".to_string(), 1_100 * COIN), ("GOLD!".to_string(), COIN)]
    );
    assert_eq!(node.assets_db.holding(&BOB, "GOLD")?, 400 * COIN);
    assert_eq!(node.assets_db.reissue_locks()?.get("GOLD"), Some(&chain.reissue.hash()));

    let state = node.state()?;
    assert_eq!(state.best_block()?, chain.b3.hash());
    assert_eq!(state.reissue_locks().get("GOLD"), Some(&chain.reissue.hash()));
    assert_eq!(state.assets().balance("GOLD", &BOB)?, 400 * COIN);
    Ok(())
}

/// Test 8: a reorg after restart uses the stored undo records
#[test]
fn test_disconnect_after_restart() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    {
        let mut state = node.state()?;
        state.connect_block(&chain.b1, 1)?;
        state.connect_block(&chain.b2, 2)?;
        state.connect_block(&chain.b3, 3)?;
        state.flush()?;
    }

    {
        let mut state = node.state()?;
        let undo3 = state.load_block_undo(&chain.b3.hash())?.expect("undo stored");
        state.disconnect_block(&chain.b3, 3, &undo3)?;
        assert!(state.load_block_undo(&chain.b3.hash())?.is_none());
        state.flush()?;
    }

    assert_eq!(node.coins_db.best_block()?, chain.b2.hash());
    let gold = node.assets_db.asset("GOLD")?.unwrap();
    assert_eq!(gold.descriptor.amount, 1_000 * COIN);
    assert_eq!(node.assets_db.holders("GOLD", 10, 0)?, vec![(ISSUER, 1_000 * COIN)]);
    assert!(node.assets_db.holdings(&BOB, 10, 0)?.is_empty());
    assert!(node.store.block_undo::<lib_blockchain::BlockUndo>(&chain.b3.hash())?.is_none());
    Ok(())
}

/// Test 9: the address index follows connects and disconnects
#[test]
fn test_address_index() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    let undo3 = {
        let mut state = node.state()?;
        state.connect_block(&chain.b1, 1)?;
        state.connect_block(&chain.b2, 2)?;
        let undo3 = state.connect_block(&chain.b3, 3)?;
        state.flush()?;
        undo3
    };

    let native = |node: &Node, address: &Address| {
        node.store.address_balance(ADDRESS_TYPE_PUBKEY_HASH, address, NATIVE_ASSET)
    };
    // three coinbases of 50, minus the 50 spent, plus 49 change
    assert_eq!(native(&node, &ISSUER)?, 149 * COIN);
    assert_eq!(node.store.address_balance(ADDRESS_TYPE_PUBKEY_HASH, &BOB, "GOLD")?, 400 * COIN);
    let bob_entries = node.store.address_entries(ADDRESS_TYPE_PUBKEY_HASH, &BOB, None)?;
    assert_eq!(bob_entries.len(), 2);
    assert!(bob_entries.iter().all(|(key, _)| key.height == 3 && !key.spending));

    {
        let mut state = node.state()?;
        state.disconnect_block(&chain.b3, 3, &undo3)?;
        state.flush()?;
    }
    assert!(node.store.address_entries(ADDRESS_TYPE_PUBKEY_HASH, &BOB, None)?.is_empty());
    assert_eq!(native(&node, &ISSUER)?, 99 * COIN);
    assert_eq!(
        node.store.address_balance(ADDRESS_TYPE_PUBKEY_HASH, &ISSUER, "GOLD")?,
        1_000 * COIN
    );
    Ok(())
}

/// Test 10: a coinbase cannot issue or credit assets
#[test]
fn test_coinbase_asset_outputs_rejected() -> Result<()> {
    let mut node = Node::new()?;
    let chain = chain();
    let mut state = node.state()?;
    state.connect_block(&chain.b1, 1)?;

    let minting = Transaction::new(
        2_000,
        vec![TxIn::coinbase()],
        vec![
            TxOut::new(50 * COIN, StandardAssetScript::p2pkh(&ISSUER)),
            asset_out(
                ISSUER,
                AssetPayload::Issue(AssetDescriptor::new("FREE", 1_000 * COIN, 0, true)),
            ),
            asset_out(BOB, transfer("GHOST", 777 * COIN)),
        ],
    );
    let bad = Block::new(chain.b1.hash(), 2_000, vec![minting]);

    let err = state.connect_block(&bad, 2).unwrap_err();
    assert_eq!(err.reason(), Some("bad-txns-asset-script-invalid"));
    assert!(matches!(err, BlockApplyError::TxRejected { index: 0, .. }));

    assert_eq!(state.best_block()?, chain.b1.hash());
    assert!(!state.assets().asset_exists("FREE")?);
    assert_eq!(state.assets().balance("GHOST", &BOB)?, 0);
    assert!(state.coins().get_coin(&bad.transactions[0].outpoint(0))?.is_none());

    state.connect_block(&chain.b2, 2)?;
    Ok(())
}

/// Test 11: a store and metadata cache opened from the configuration
#[test]
fn test_open_from_config() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = ChainStateConfig {
        data_dir: dir.path().join("chainstate"),
        metadata_cache_capacity: 32,
        maturity: MaturitySchedule::fixed(1),
        ..Default::default()
    };
    let chain = chain();

    {
        let store = config.open_store()?;
        let metadata = config.metadata_cache()?;
        assert_eq!(metadata.capacity(), 32);
        assert_eq!(store.version()?, CHAIN_STATE_VERSION);

        let (mut coins_db, mut assets_db) = (store.coins_db(), store.assets_db());
        let codec = StandardAssetScript;
        let mut state =
            ChainState::new(&mut coins_db, &mut assets_db, &store, &metadata, &codec, &config)?;
        state.connect_block(&chain.b1, 1)?;
        state.flush()?;
    }

    let store = config.open_store()?;
    assert_eq!(store.coins_db().best_block()?, chain.b1.hash());
    Ok(())
}
