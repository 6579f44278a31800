//! Integration tests of the chain resolver: block acceptance across forks, migration into the block
//! log, sync queries, reindexing, and the resolver's lifecycle.

use std::{
    cell::Cell,
    path::Path,
    sync::{Arc, Mutex},
};

use chainstate_rs::{
    chain_resolver::{
        ApplyError, BlockApplier, ChainResolver, ChainResolverSpec, HookError, ReindexArgs,
        ResolverError, ResolverState,
    },
    config::Configuration,
    events::{
        AppendBlockEvent, PruneForkBlockEvent, ReindexNotification, ReindexProgressEvent,
        SwitchForkEvent, UndoSessionEvent,
    },
    fork_set::ForkSetError,
    types::{
        block::Block,
        data_types::{BlockHeight, ChainID, CryptoHash, Revision},
        skip_flags::SkipFlags,
    },
    versioned_store::VersionedStore,
};
use log::LevelFilter;

mod common;

use common::{
    blocks::BlockFactory,
    logging::setup_logger,
    records::{accounts, Account, LedgerApplier},
};

const MAX_BACKING_SIZE: u64 = 64 * 1024 * 1024;

fn configuration(dir: &Path) -> Configuration {
    Configuration::builder()
        .data_dir(dir.to_path_buf())
        .chain_id(ChainID::new(1))
        .max_backing_size(MAX_BACKING_SIZE)
        .reindex_progress_interval(5)
        .log_events(true)
        .build()
}

fn open_store(configuration: &Configuration) -> VersionedStore {
    let mut store = VersionedStore::open(
        &configuration.state_dir(),
        configuration.chain_id,
        configuration.max_backing_size,
    )
    .unwrap();
    store.add_index::<Account>().unwrap();
    store
}

fn open_resolver(dir: &Path) -> ChainResolver {
    let configuration = configuration(dir);
    ChainResolverSpec::builder()
        .store(open_store(&configuration))
        .configuration(configuration)
        .build()
        .open()
        .unwrap()
}

fn push_all(resolver: &ChainResolver, blocks: &[Block], applier: &mut LedgerApplier) {
    for block in blocks {
        resolver
            .push_block(block.clone(), SkipFlags::NONE, applier)
            .unwrap();
    }
}

/// Get every account as `(name, balance)`, in name order. Identities are left out, since blocks that
/// were applied and then undone use up identities that a straight replay does not.
fn ledger(store: &VersionedStore) -> Vec<(String, u64)> {
    let mut ledger: Vec<(String, u64)> = accounts(store)
        .into_iter()
        .map(|(_, name, balance)| (name, balance))
        .collect();
    ledger.sort();
    ledger
}

fn balances(resolver: &ChainResolver) -> Vec<(String, u64)> {
    resolver.store().with_read_lock(ledger).unwrap()
}

fn revision(resolver: &ChainResolver) -> Revision {
    resolver
        .store()
        .with_read_lock(|store| store.revision())
        .unwrap()
}

/// Get the balance of every account after applying `blocks` to an empty in-memory store.
fn expected_balances(blocks: &[Block]) -> Vec<(String, u64)> {
    let mut store = VersionedStore::new();
    store.add_index::<Account>().unwrap();
    let mut applier = LedgerApplier::default();
    for block in blocks {
        applier.apply(&mut store, block, SkipFlags::NONE).unwrap();
    }
    ledger(&store)
}

/// Tests that blocks extending the head are applied one undo session each, and can be looked up.
#[test]
fn push_chain_test() {
    setup_logger(LevelFilter::Trace);
    let dir = tempfile::tempdir().unwrap();
    let resolver = open_resolver(dir.path());
    let blocks = BlockFactory::new().chain(10);
    let mut applier = LedgerApplier::default();

    // 1. The first block must extend the (empty) block log.
    assert!(matches!(
        resolver.push_block(blocks[1].clone(), SkipFlags::NONE, &mut applier),
        Err(ResolverError::ForkSet(ForkSetError::UnlinkableBlock { .. }))
    ));

    // 2. Push the whole chain.
    push_all(&resolver, &blocks, &mut applier);
    assert_eq!(resolver.head_block_num().unwrap(), BlockHeight::new(10));
    assert_eq!(resolver.last_irreversible_block_num().unwrap(), BlockHeight::zero());
    assert_eq!(revision(&resolver), Revision::new(10));
    assert_eq!(
        resolver.store().with_read_lock(|store| store.undo_depth()).unwrap(),
        10
    );
    assert_eq!(balances(&resolver), expected_balances(&blocks));
    assert_eq!(applier.applied, (1..=10).map(BlockHeight::new).collect::<Vec<_>>());

    // 3. Every block can be found by id and by height.
    for block in &blocks {
        assert!(resolver.is_known_block(&block.hash).unwrap());
        assert_eq!(
            resolver.find_block_id_for_num(block.height).unwrap(),
            Some(block.hash)
        );
        assert_eq!(
            resolver.fetch_block_by_id(&block.hash).unwrap().as_deref(),
            Some(block)
        );
    }
    assert!(resolver.fetch_block_by_number(BlockHeight::new(11)).unwrap().is_none());
    assert!(!resolver.is_known_block(&CryptoHash::zero()).unwrap());
}

/// Tests that a fork outgrowing the head becomes the main branch, and the store follows it.
#[test]
fn switch_fork_test() {
    let dir = tempfile::tempdir().unwrap();
    let switches: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let undone: Arc<Mutex<Vec<CryptoHash>>> = Arc::new(Mutex::new(Vec::new()));
    let configuration = configuration(dir.path());
    let resolver = {
        let switches = switches.clone();
        let undone = undone.clone();
        ChainResolverSpec::builder()
            .store(open_store(&configuration))
            .configuration(configuration)
            .on_switch_fork(move |event: &SwitchForkEvent| {
                switches.lock().unwrap().push((event.popped, event.applied))
            })
            .on_undo_session(move |event: &UndoSessionEvent| undone.lock().unwrap().push(event.block))
            .build()
            .open()
            .unwrap()
    };

    let factory = BlockFactory::new();
    let main = factory.chain(5);
    let fork = factory.extend(&main[2], 3, 1);
    let mut applier = LedgerApplier::default();
    push_all(&resolver, &main, &mut applier);

    // 1. Fork blocks that do not outgrow the head are stored but not applied.
    push_all(&resolver, &fork[..2], &mut applier);
    assert_eq!(applier.applied.len(), 5);
    assert_eq!(balances(&resolver), expected_balances(&main));
    assert!(resolver.is_known_block(&fork[1].hash).unwrap());
    assert_eq!(
        resolver.find_block_id_for_num(BlockHeight::new(5)).unwrap(),
        Some(main[4].hash)
    );

    // 2. Outgrowing the head undoes the old branch and applies the new one.
    let outcome = resolver
        .push_block(fork[2].clone(), SkipFlags::NONE, &mut applier)
        .unwrap();
    assert_eq!(outcome.old_head, main[4].hash);
    assert_eq!(outcome.new_head, fork[2].hash);

    let mut winning = main[..3].to_vec();
    winning.extend(fork.iter().cloned());
    assert_eq!(balances(&resolver), expected_balances(&winning));
    assert_eq!(revision(&resolver), Revision::new(6));
    assert_eq!(resolver.head_block_num().unwrap(), BlockHeight::new(6));
    assert_eq!(
        resolver.find_block_id_for_num(BlockHeight::new(5)).unwrap(),
        Some(fork[1].hash)
    );

    assert_eq!(*switches.lock().unwrap(), vec![(2, 3)]);
    assert_eq!(*undone.lock().unwrap(), vec![main[4].hash, main[3].hash]);
}

/// Tests that a block failing to apply during a fork switch is removed, and the old branch restored.
#[test]
fn switch_fork_failure_test() {
    setup_logger(LevelFilter::Trace);
    let dir = tempfile::tempdir().unwrap();
    let resolver = open_resolver(dir.path());
    let factory = BlockFactory::new();
    let main = factory.chain(5);
    let mut applier = LedgerApplier::default();
    push_all(&resolver, &main, &mut applier);
    let before = balances(&resolver);

    // 1. Build a longer fork whose second block fails to apply part-way through.
    let fork_1 = factory.child(&main[2], 1, &["acct7"]);
    let fork_2 = factory.child(&fork_1, 1, &["acct8", "fail"]);
    let fork_3 = factory.child(&fork_2, 1, &["acct9"]);
    push_all(&resolver, &[fork_1.clone(), fork_2.clone()], &mut applier);

    // 2. Switching to it fails on the bad block.
    match resolver.push_block(fork_3.clone(), SkipFlags::NONE, &mut applier) {
        Err(ResolverError::ApplyFailed { height, id, .. }) => {
            assert_eq!(height, BlockHeight::new(5));
            assert_eq!(id, fork_2.hash);
        }
        other => panic!("expected the fork switch to fail, got {:?}", other),
    }

    // 3. The old branch is back, in the fork set and in the store.
    assert_eq!(resolver.head_block_num().unwrap(), BlockHeight::new(5));
    assert_eq!(
        resolver.find_block_id_for_num(BlockHeight::new(5)).unwrap(),
        Some(main[4].hash)
    );
    assert_eq!(balances(&resolver), before);
    assert_eq!(revision(&resolver), Revision::new(5));
    assert!(resolver.is_known_block(&fork_1.hash).unwrap());
    assert!(!resolver.is_known_block(&fork_2.hash).unwrap());
    assert!(!resolver.is_known_block(&fork_3.hash).unwrap());
}

/// Tests that a block extending the head that fails to apply leaves no trace.
#[test]
fn push_failure_test() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = open_resolver(dir.path());
    let factory = BlockFactory::new();
    let main = factory.chain(3);
    let mut applier = LedgerApplier::default();
    push_all(&resolver, &main, &mut applier);
    let before = balances(&resolver);

    let bad = factory.child(&main[2], 0, &["acct0", "fail"]);
    assert!(matches!(
        resolver.push_block(bad.clone(), SkipFlags::NONE, &mut applier),
        Err(ResolverError::ApplyFailed { .. })
    ));
    assert!(!resolver.is_known_block(&bad.hash).unwrap());
    assert_eq!(resolver.head_block_num().unwrap(), BlockHeight::new(3));
    assert_eq!(balances(&resolver), before);
    assert_eq!(revision(&resolver), Revision::new(3));

    // The chain can still be extended.
    let good = factory.child(&main[2], 0, &["acct0"]);
    resolver.push_block(good, SkipFlags::NONE, &mut applier).unwrap();
    assert_eq!(revision(&resolver), Revision::new(4));
}

/// Tests that popping the head reverts its effects on the store.
#[test]
fn pop_block_test() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = open_resolver(dir.path());
    let blocks = BlockFactory::new().chain(4);
    let mut applier = LedgerApplier::default();
    push_all(&resolver, &blocks, &mut applier);

    let popped = resolver.pop_block().unwrap();
    assert_eq!(popped.hash, blocks[3].hash);
    assert_eq!(resolver.head_block_num().unwrap(), BlockHeight::new(3));
    assert_eq!(revision(&resolver), Revision::new(3));
    assert_eq!(balances(&resolver), expected_balances(&blocks[..3]));
    assert!(resolver.is_known_block(&blocks[3].hash).unwrap());
}

/// Tests migrating irreversible blocks into the block log, and that a migration missing blocks
/// appends nothing.
#[test]
fn migrate_irreversible_test() {
    setup_logger(LevelFilter::Trace);
    let dir = tempfile::tempdir().unwrap();
    let appended: Arc<Mutex<Vec<BlockHeight>>> = Arc::new(Mutex::new(Vec::new()));
    let configuration = configuration(dir.path());
    let resolver = {
        let appended = appended.clone();
        ChainResolverSpec::builder()
            .store(open_store(&configuration))
            .configuration(configuration)
            .on_append_block(move |event: &AppendBlockEvent| {
                appended.lock().unwrap().push(event.height)
            })
            .build()
            .open()
            .unwrap()
    };
    let factory = BlockFactory::new();
    let main = factory.chain(10);
    let stale_fork = factory.extend(&main[3], 1, 1);
    let mut applier = LedgerApplier::default();
    push_all(&resolver, &main, &mut applier);
    push_all(&resolver, &stale_fork, &mut applier);

    // 1. Migrating past the head fails without touching the block log.
    assert!(matches!(
        resolver.migrate_irreversible(BlockHeight::new(11)),
        Err(ResolverError::MissingForkData { .. })
    ));
    assert!(resolver.block_log().is_empty().unwrap());

    // 2. Migrate the first six blocks.
    resolver.migrate_irreversible(BlockHeight::new(6)).unwrap();
    assert_eq!(
        *appended.lock().unwrap(),
        (1..=6).map(BlockHeight::new).collect::<Vec<_>>()
    );
    assert_eq!(resolver.block_log().head_height().unwrap(), BlockHeight::new(6));
    assert_eq!(resolver.last_irreversible_block_num().unwrap(), BlockHeight::new(6));
    assert_eq!(
        resolver.store().with_read_lock(|store| store.undo_depth()).unwrap(),
        4
    );

    // 3. The fork below the new irreversible block is gone. Both tiers still answer lookups.
    assert!(!resolver.is_known_block(&stale_fork[0].hash).unwrap());
    for block in &main {
        assert_eq!(
            resolver.fetch_block_by_number(block.height).unwrap().as_deref(),
            Some(block)
        );
    }

    // 4. Migrating to the same height again is a no-op.
    resolver.migrate_irreversible(BlockHeight::new(6)).unwrap();
    assert_eq!(appended.lock().unwrap().len(), 6);

    // 5. Irreversible blocks cannot be popped.
    for _ in 0..4 {
        resolver.pop_block().unwrap();
    }
    assert!(matches!(
        resolver.pop_block(),
        Err(ResolverError::ForkSet(ForkSetError::CannotPopRoot))
    ));
    assert_eq!(revision(&resolver), Revision::new(6));
}

/// Tests that a small retention horizon prunes losing branches, but never reversible blocks on the
/// main branch, so they can still be looked up and migrated.
#[test]
fn retention_horizon_test() {
    let dir = tempfile::tempdir().unwrap();
    let configuration = Configuration::builder()
        .data_dir(dir.path().to_path_buf())
        .chain_id(ChainID::new(1))
        .max_backing_size(MAX_BACKING_SIZE)
        .fork_set_max_size(3)
        .log_events(true)
        .build();
    let resolver = ChainResolverSpec::builder()
        .store(open_store(&configuration))
        .configuration(configuration)
        .build()
        .open()
        .unwrap();
    let factory = BlockFactory::new();
    let main = factory.chain(10);
    let stale_fork = factory.extend(&main[2], 1, 1);
    let mut applier = LedgerApplier::default();
    push_all(&resolver, &main, &mut applier);

    // 1. A fork too far behind the head is pruned as soon as it is pushed.
    resolver
        .push_block(stale_fork[0].clone(), SkipFlags::NONE, &mut applier)
        .unwrap();
    assert!(!resolver.is_known_block(&stale_fork[0].hash).unwrap());

    // 2. Every main-branch block is still in the fork set.
    for block in &main {
        assert_eq!(
            resolver.find_block_id_for_num(block.height).unwrap(),
            Some(block.hash)
        );
    }

    // 3. Migration still finds every block it needs.
    resolver.migrate_irreversible(BlockHeight::new(8)).unwrap();
    assert_eq!(resolver.block_log().head_height().unwrap(), BlockHeight::new(8));
    let (ids, remaining) = resolver.get_block_ids(&[], 100).unwrap();
    assert_eq!(ids, main.iter().map(|block| block.hash).collect::<Vec<_>>());
    assert_eq!(remaining, 0);
    assert_eq!(balances(&resolver), expected_balances(&main));
}

/// Tests that the block ids returned for a synopsis continue right after its newest common block.
#[test]
fn sync_test() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = open_resolver(dir.path());
    let factory = BlockFactory::new();
    let blocks = factory.chain(100);
    let mut applier = LedgerApplier::default();
    push_all(&resolver, &blocks, &mut applier);
    resolver.migrate_irreversible(BlockHeight::new(50)).unwrap();

    // 1. A synopsis up to a block in the block log is built from the block log.
    let synopsis = resolver
        .get_blockchain_synopsis(Some(&blocks[39].hash), 10)
        .unwrap();
    assert_eq!(
        synopsis,
        vec![blocks[0].hash, blocks[25].hash, blocks[38].hash, blocks[39].hash]
    );

    // 2. The peer answers with everything after the reference point.
    let (ids, remaining) = resolver.get_block_ids(&synopsis, 1000).unwrap();
    assert_eq!(
        ids,
        blocks[40..].iter().map(|block| block.hash).collect::<Vec<_>>()
    );
    assert_eq!(remaining, 0);

    let (ids, remaining) = resolver.get_block_ids(&synopsis, 10).unwrap();
    assert_eq!(ids.len(), 10);
    assert_eq!(ids[0], blocks[40].hash);
    assert_eq!(remaining, 50);

    // 3. A synopsis of the main branch starts at the last irreversible block and ends at the head.
    let synopsis = resolver.get_blockchain_synopsis(None, 0).unwrap();
    assert_eq!(synopsis.first(), Some(&blocks[49].hash));
    assert_eq!(synopsis.last(), Some(&blocks[99].hash));
    let (ids, remaining) = resolver.get_block_ids(&synopsis, 10).unwrap();
    assert!(ids.is_empty());
    assert_eq!(remaining, 0);

    // 4. An empty synopsis starts at height 1.
    let (ids, remaining) = resolver.get_block_ids(&[], 5).unwrap();
    assert_eq!(
        ids,
        blocks[..5].iter().map(|block| block.hash).collect::<Vec<_>>()
    );
    assert_eq!(remaining, 95);

    // 5. A synopsis with nothing in common cannot be answered.
    let stranger = BlockFactory::new().chain(3);
    assert!(matches!(
        resolver.get_block_ids(&[stranger[2].hash], 10),
        Err(ResolverError::UnreachableFork)
    ));
    assert!(matches!(
        resolver.get_blockchain_synopsis(Some(&stranger[2].hash), 0),
        Err(ResolverError::UnknownReferencePoint { .. })
    ));
}

/// Tests that replaying the block log from scratch reproduces the same state, every time.
#[test]
fn reindex_test() {
    setup_logger(LevelFilter::Trace);
    let dir = tempfile::tempdir().unwrap();
    let progress: Arc<Mutex<Vec<BlockHeight>>> = Arc::new(Mutex::new(Vec::new()));
    let notifications: Arc<Mutex<Vec<(&'static str, ReindexNotification)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let configuration = configuration(dir.path());
    let resolver = {
        let progress = progress.clone();
        let pre = notifications.clone();
        let post = notifications.clone();
        ChainResolverSpec::builder()
            .store(open_store(&configuration))
            .configuration(configuration)
            .on_reindex_progress(move |event: &ReindexProgressEvent| {
                progress.lock().unwrap().push(event.height)
            })
            .pre_reindex_hook(move |notification: &ReindexNotification| -> Result<(), HookError> {
                pre.lock().unwrap().push(("pre", notification.clone()));
                Ok(())
            })
            .post_reindex_hook(move |notification: &ReindexNotification| -> Result<(), HookError> {
                post.lock().unwrap().push(("post", notification.clone()));
                Ok(())
            })
            .build()
            .open()
            .unwrap()
    };
    let blocks = BlockFactory::new().chain(20);
    let mut applier = LedgerApplier::default();
    push_all(&resolver, &blocks, &mut applier);
    resolver.migrate_irreversible(BlockHeight::new(20)).unwrap();
    let before = balances(&resolver);

    // 1. Replay from scratch, twice.
    for _ in 0..2 {
        let mut replayer = LedgerApplier::default();
        let args = ReindexArgs {
            force_replay: true,
            ..ReindexArgs::default()
        };
        let outcome = resolver.reindex(args, &mut replayer, || false).unwrap();
        assert_eq!(outcome.last_block_number, BlockHeight::new(20));
        assert!(!outcome.interrupted);
        assert_eq!(balances(&resolver), before);
        assert_eq!(revision(&resolver), Revision::new(20));
        assert_eq!(replayer.applied.len(), 20);
        assert!(replayer.skip_flags.iter().all(|skip| *skip == SkipFlags::REINDEX));
    }
    assert_eq!(resolver.state().unwrap(), ResolverState::Live);

    // 2. Progress was reported every five blocks.
    assert_eq!(
        *progress.lock().unwrap(),
        [5, 10, 15, 20, 5, 10, 15, 20].map(BlockHeight::new).to_vec()
    );

    // 3. The hooks saw the start and the end of every reindex.
    let notifications = notifications.lock().unwrap();
    assert_eq!(notifications.len(), 4);
    let (stage, pre) = &notifications[0];
    assert_eq!(*stage, "pre");
    assert!(pre.force_replay);
    assert_eq!(pre.last_block_number, BlockHeight::zero());
    assert!(!pre.reindex_success);
    let (stage, post) = &notifications[1];
    assert_eq!(*stage, "post");
    assert_eq!(post.last_block_number, BlockHeight::new(20));
    assert!(post.reindex_success);

    // 4. The resolver accepts blocks on top of the replayed state.
    let next = BlockFactory::new().child(&blocks[19], 0, &["acct1"]);
    resolver.push_block(next, SkipFlags::NONE, &mut applier).unwrap();
    assert_eq!(revision(&resolver), Revision::new(21));
}

/// Tests that a reindex discards the reversible blocks it reverts, so they cannot be looked up while
/// the block log is replayed, and that blocks can be pushed on top of the replayed chain afterwards.
#[test]
fn reindex_resets_fork_set_test() {
    let dir = tempfile::tempdir().unwrap();
    let pruned: Arc<Mutex<Vec<CryptoHash>>> = Arc::new(Mutex::new(Vec::new()));
    let configuration = configuration(dir.path());
    let resolver = {
        let pruned = pruned.clone();
        ChainResolverSpec::builder()
            .store(open_store(&configuration))
            .configuration(configuration)
            .on_prune_fork_block(move |event: &PruneForkBlockEvent| {
                pruned.lock().unwrap().push(event.block)
            })
            .build()
            .open()
            .unwrap()
    };
    let main = BlockFactory::new().chain(10);
    let mut ledger_applier = LedgerApplier::default();
    push_all(&resolver, &main[..9], &mut ledger_applier);
    resolver.migrate_irreversible(BlockHeight::new(6)).unwrap();
    pruned.lock().unwrap().clear();

    // 1. Replay from genesis, checking during every block whether a reversible block is still known.
    let mut reversible_known = Vec::new();
    let mut applier = |store: &mut VersionedStore, block: &Block, skip: SkipFlags| -> Result<(), ApplyError> {
        reversible_known.push(resolver.is_known_block(&main[8].hash).unwrap());
        ledger_applier.apply(store, block, skip)
    };
    let args = ReindexArgs {
        force_replay: true,
        ..ReindexArgs::default()
    };
    resolver.reindex(args, &mut applier, || false).unwrap();
    assert_eq!(reversible_known, vec![false; 6]);

    // 2. Every block above the block log was pruned, and the fork set now starts at its head.
    let pruned = pruned.lock().unwrap().clone();
    for block in &main[6..9] {
        assert!(pruned.contains(&block.hash));
        assert!(!resolver.is_known_block(&block.hash).unwrap());
    }
    assert_eq!(resolver.head_block_num().unwrap(), BlockHeight::new(6));
    assert_eq!(balances(&resolver), expected_balances(&main[..6]));

    // 3. The chain continues from the replayed head.
    push_all(&resolver, &main[6..], &mut ledger_applier);
    assert_eq!(resolver.head_block_num().unwrap(), BlockHeight::new(10));
    assert_eq!(balances(&resolver), expected_balances(&main));
}

/// Tests that an interrupted reindex can be resumed, and that `stop_at` and validation are honored.
#[test]
fn reindex_interruption_test() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = open_resolver(dir.path());
    let blocks = BlockFactory::new().chain(20);
    let mut applier = LedgerApplier::default();
    push_all(&resolver, &blocks, &mut applier);
    resolver.migrate_irreversible(BlockHeight::new(20)).unwrap();
    let before = balances(&resolver);

    // 1. Interrupt after eight blocks.
    let polls = Cell::new(0);
    let mut replayer = LedgerApplier::default();
    let args = ReindexArgs {
        force_replay: true,
        ..ReindexArgs::default()
    };
    let outcome = resolver
        .reindex(args, &mut replayer, || {
            polls.set(polls.get() + 1);
            polls.get() > 8
        })
        .unwrap();
    assert!(outcome.interrupted);
    assert_eq!(outcome.last_block_number, BlockHeight::new(8));
    assert_eq!(revision(&resolver), Revision::new(8));
    assert_eq!(resolver.head_block_num().unwrap(), BlockHeight::new(8));
    assert_eq!(balances(&resolver), expected_balances(&blocks[..8]));

    // 2. Resume up to block 15, validating every block.
    let mut replayer = LedgerApplier::default();
    let args = ReindexArgs {
        stop_at: Some(BlockHeight::new(15)),
        validate_during_replay: true,
        ..ReindexArgs::default()
    };
    let outcome = resolver.reindex(args, &mut replayer, || false).unwrap();
    assert!(!outcome.interrupted);
    assert_eq!(outcome.last_block_number, BlockHeight::new(15));
    assert_eq!(
        replayer.applied,
        (9..=15).map(BlockHeight::new).collect::<Vec<_>>()
    );
    assert!(replayer.skip_flags.iter().all(|skip| *skip == SkipFlags::NONE));

    // 3. Resume to the end.
    let mut replayer = LedgerApplier::default();
    let outcome = resolver
        .reindex(ReindexArgs::default(), &mut replayer, || false)
        .unwrap();
    assert_eq!(outcome.last_block_number, BlockHeight::new(20));
    assert_eq!(replayer.applied.len(), 5);
    assert_eq!(balances(&resolver), before);
}

/// Tests that a failing pre-reindex hook stops the reindex before anything is changed.
#[test]
fn reindex_hook_failure_test() {
    let dir = tempfile::tempdir().unwrap();
    let configuration = configuration(dir.path());
    let resolver = ChainResolverSpec::builder()
        .store(open_store(&configuration))
        .configuration(configuration)
        .pre_reindex_hook(|_: &ReindexNotification| -> Result<(), HookError> {
            Err("snapshot service unavailable".into())
        })
        .build()
        .open()
        .unwrap();
    let blocks = BlockFactory::new().chain(5);
    let mut applier = LedgerApplier::default();

    // 1. There is nothing to replay yet.
    assert!(matches!(
        resolver.reindex(ReindexArgs::default(), &mut applier, || false),
        Err(ResolverError::EmptyBlockLog)
    ));

    push_all(&resolver, &blocks, &mut applier);
    resolver.migrate_irreversible(BlockHeight::new(5)).unwrap();
    let before = balances(&resolver);

    // 2. The hook refuses the reindex.
    let mut replayer = LedgerApplier::default();
    let args = ReindexArgs {
        force_replay: true,
        ..ReindexArgs::default()
    };
    assert!(matches!(
        resolver.reindex(args, &mut replayer, || false),
        Err(ResolverError::Hook { hook: "pre-reindex", .. })
    ));
    assert!(replayer.applied.is_empty());
    assert_eq!(balances(&resolver), before);
    assert_eq!(revision(&resolver), Revision::new(5));
    assert_eq!(resolver.state().unwrap(), ResolverState::Live);
}

/// Tests that a store which does not match the block log must be reindexed before use.
#[test]
fn reindex_required_test() {
    setup_logger(LevelFilter::Trace);
    let dir = tempfile::tempdir().unwrap();
    let blocks = BlockFactory::new().chain(7);
    let mut applier = LedgerApplier::default();
    {
        let resolver = open_resolver(dir.path());
        push_all(&resolver, &blocks[..6], &mut applier);
        resolver.migrate_irreversible(BlockHeight::new(6)).unwrap();
        resolver.close().unwrap();
    }

    // 1. Open the block log with an empty in-memory store.
    let mut store = VersionedStore::new();
    store.add_index::<Account>().unwrap();
    let resolver = ChainResolverSpec::builder()
        .configuration(configuration(dir.path()))
        .store(store)
        .build()
        .open()
        .unwrap();
    assert!(matches!(
        resolver.push_block(blocks[6].clone(), SkipFlags::NONE, &mut applier),
        Err(ResolverError::ReindexRequired { .. })
    ));

    // 2. After reindexing, the next block is accepted.
    let outcome = resolver
        .reindex(ReindexArgs::default(), &mut LedgerApplier::default(), || false)
        .unwrap();
    assert_eq!(outcome.last_block_number, BlockHeight::new(6));
    resolver
        .push_block(blocks[6].clone(), SkipFlags::NONE, &mut applier)
        .unwrap();
    assert_eq!(balances(&resolver), expected_balances(&blocks));
}

/// Tests that closing reverts reversible blocks and persists irreversible state, and that a closed
/// resolver refuses further changes.
#[test]
fn close_and_reopen_test() {
    setup_logger(LevelFilter::Trace);
    let dir = tempfile::tempdir().unwrap();
    let blocks = BlockFactory::new().chain(10);
    let mut applier = LedgerApplier::default();

    // 1. Push ten blocks, make six irreversible, and close.
    {
        let resolver = open_resolver(dir.path());
        push_all(&resolver, &blocks, &mut applier);
        resolver.migrate_irreversible(BlockHeight::new(6)).unwrap();
        resolver.close().unwrap();

        assert_eq!(resolver.state().unwrap(), ResolverState::Closed);
        assert!(matches!(
            resolver.pop_block(),
            Err(ResolverError::InvalidState { found: ResolverState::Closed, .. })
        ));
        assert!(matches!(
            resolver.reindex(ReindexArgs::default(), &mut LedgerApplier::default(), || false),
            Err(ResolverError::InvalidState { .. })
        ));
        assert!(matches!(resolver.close(), Err(ResolverError::InvalidState { .. })));
    }

    // 2. Reopen: the state of the six irreversible blocks is back, anchored at the block log head.
    let resolver = open_resolver(dir.path());
    assert_eq!(revision(&resolver), Revision::new(6));
    assert_eq!(resolver.head_block_num().unwrap(), BlockHeight::new(6));
    assert_eq!(resolver.last_irreversible_block_num().unwrap(), BlockHeight::new(6));
    assert_eq!(balances(&resolver), expected_balances(&blocks[..6]));

    // 3. The reversible blocks can be pushed again.
    push_all(&resolver, &blocks[6..], &mut applier);
    assert_eq!(balances(&resolver), expected_balances(&blocks));
}
