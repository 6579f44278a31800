/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`ChainResolver`], the builder-pattern [`ChainResolverSpec`] it is opened from, and its
//! Live-state operations: block acceptance, lookups, and migration of irreversible blocks.
//!
//! ## Opening a resolver
//!
//! ```no_run
//! # use chainstate_rs::{chain_resolver::ChainResolverSpec, config::Configuration, versioned_store::VersionedStore};
//! # fn open(configuration: Configuration) -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = VersionedStore::open(
//!     &configuration.state_dir(),
//!     configuration.chain_id,
//!     configuration.max_backing_size,
//! )?;
//! // Register every record type the block application callback uses.
//! // store.add_index::<Account>()?;
//!
//! let resolver = ChainResolverSpec::builder()
//!     .configuration(configuration)
//!     .store(store)
//!     .on_append_block(|event| println!("appended block at height {}", event.height))
//!     .build()
//!     .open()?;
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{Arc, Mutex},
    time::SystemTime,
};

use typed_builder::TypedBuilder;

use super::{
    applier::BlockApplier,
    block_source::{first_hit, BlockSource},
    HookError, ResolverError, ResolverState,
};
use crate::{
    block_log::BlockLog,
    config::Configuration,
    event_handlers::{EventHandlers, HandlerPtr},
    events::*,
    fork_set::{ForkChoice, ForkSet, HighestBlock, PushOutcome},
    types::{
        block::Block,
        data_types::{BlockHeight, CryptoHash, Revision},
        skip_flags::SkipFlags,
    },
    versioned_store::{SharedStore, StoreError, VersionedStore},
};

/// A fallible observer of [reindexing](ChainResolver::reindex).
pub type ReindexHook = Box<dyn Fn(&ReindexNotification) -> Result<(), HookError> + Send + Sync>;

/// Stores everything needed to open a [`ChainResolver`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ChainResolverSpec]. On the builder call the following methods to construct a valid [ChainResolverSpec].

    Required:
    - `.configuration(...)`
    - `.store(...)`

    Optional:
    - `.fork_choice(...)`
    - `.on_insert_fork_block(...)`
    - `.on_prune_fork_block(...)`
    - `.on_switch_fork(...)`
    - `.on_append_block(...)`
    - `.on_migrate_irreversible(...)`
    - `.on_pre_reindex(...)`
    - `.on_reindex_progress(...)`
    - `.on_post_reindex(...)`
    - `.on_undo_session(...)`
    - `.pre_reindex_hook(...)`
    - `.post_reindex_hook(...)`
"))]
pub struct ChainResolverSpec {
    // Required parameters
    #[builder(setter(doc = "Set the [configuration](Configuration) of the resolver. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the [versioned store](VersionedStore) blocks are applied to. Every record type the block application callback uses must already be registered on it. Required."))]
    store: VersionedStore,
    // Optional parameters
    #[builder(default = Box::new(HighestBlock) as Box<dyn ForkChoice>, setter(transform = |fork_choice: impl ForkChoice + 'static| Box::new(fork_choice) as Box<dyn ForkChoice>,
    doc = "Set the policy that decides which branch of the fork set is the main branch. Defaults to [HighestBlock]. Optional."))]
    fork_choice: Box<dyn ForkChoice>,
    #[builder(default, setter(transform = |handler: impl Fn(&InsertForkBlockEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<InsertForkBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is inserted into the fork set. Optional."))]
    on_insert_fork_block: Option<HandlerPtr<InsertForkBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PruneForkBlockEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<PruneForkBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is pruned from the fork set. Optional."))]
    on_prune_fork_block: Option<HandlerPtr<PruneForkBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SwitchForkEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<SwitchForkEvent>),
    doc = "Register a handler closure to be invoked after the main branch switches to another fork. Optional."))]
    on_switch_fork: Option<HandlerPtr<SwitchForkEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AppendBlockEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<AppendBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is appended to the block log. Optional."))]
    on_append_block: Option<HandlerPtr<AppendBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&MigrateIrreversibleEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<MigrateIrreversibleEvent>),
    doc = "Register a handler closure to be invoked after irreversible blocks are migrated into the block log. Optional."))]
    on_migrate_irreversible: Option<HandlerPtr<MigrateIrreversibleEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PreReindexEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<PreReindexEvent>),
    doc = "Register a handler closure to be invoked before a reindex starts. Optional."))]
    on_pre_reindex: Option<HandlerPtr<PreReindexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReindexProgressEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ReindexProgressEvent>),
    doc = "Register a handler closure to be invoked every [reindex progress interval](Configuration::reindex_progress_interval) blocks during a reindex. Optional."))]
    on_reindex_progress: Option<HandlerPtr<ReindexProgressEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PostReindexEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<PostReindexEvent>),
    doc = "Register a handler closure to be invoked after a reindex ends. Optional."))]
    on_post_reindex: Option<HandlerPtr<PostReindexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UndoSessionEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<UndoSessionEvent>),
    doc = "Register a handler closure to be invoked after a block's undo session is reverted. Optional."))]
    on_undo_session: Option<HandlerPtr<UndoSessionEvent>>,
    #[builder(default, setter(transform = |hook: impl Fn(&ReindexNotification) -> Result<(), HookError> + Send + Sync + 'static| Some(Box::new(hook) as ReindexHook),
    doc = "Register a hook to be run before a reindex starts. If it fails, the reindex does not start. Optional."))]
    pre_reindex_hook: Option<ReindexHook>,
    #[builder(default, setter(transform = |hook: impl Fn(&ReindexNotification) -> Result<(), HookError> + Send + Sync + 'static| Some(Box::new(hook) as ReindexHook),
    doc = "Register a hook to be run after a reindex ends. Its failure is returned after the reindex's own cleanup. Optional."))]
    post_reindex_hook: Option<ReindexHook>,
}

impl ChainResolverSpec {
    /// Open the block log under the configured data directory and build the fork set on top of it.
    ///
    /// Every undo state left open in the versioned store is reverted, since the reversible blocks they
    /// belonged to are not persisted. If the store's revision then matches the head of the block log,
    /// the fork set is anchored at that head. Otherwise it is left empty and the store must be
    /// [reindexed](ChainResolver::reindex) before any block is pushed.
    pub fn open(self) -> Result<ChainResolver, ResolverError> {
        let mut store = self.store;
        let block_log = BlockLog::open(
            &self.configuration.blocks_dir(),
            self.configuration.block_log_compression,
        )?;
        let fork_set =
            ForkSet::with_fork_choice(self.configuration.fork_set_max_size, self.fork_choice);

        store.undo_all()?;
        if let Some(head) = block_log.head()? {
            if store.revision() == Revision::from(head.height) {
                fork_set.start_block(head)?;
            } else {
                log::warn!(
                    "versioned store is at revision {}, block log head is {}: reindex required",
                    store.revision(),
                    head.height
                );
            }
        }

        let mut event_handlers = EventHandlers::default();
        if self.configuration.log_events {
            event_handlers.add_loggers();
        }
        event_handlers.insert_fork_block_handlers.extend(self.on_insert_fork_block);
        event_handlers.prune_fork_block_handlers.extend(self.on_prune_fork_block);
        event_handlers.switch_fork_handlers.extend(self.on_switch_fork);
        event_handlers.append_block_handlers.extend(self.on_append_block);
        event_handlers.migrate_irreversible_handlers.extend(self.on_migrate_irreversible);
        event_handlers.pre_reindex_handlers.extend(self.on_pre_reindex);
        event_handlers.reindex_progress_handlers.extend(self.on_reindex_progress);
        event_handlers.post_reindex_handlers.extend(self.on_post_reindex);
        event_handlers.undo_session_handlers.extend(self.on_undo_session);

        Ok(ChainResolver {
            configuration: self.configuration,
            store: SharedStore::new(store),
            fork_set,
            block_log,
            event_handlers,
            pre_reindex_hook: self.pre_reindex_hook,
            post_reindex_hook: self.post_reindex_hook,
            state: Mutex::new(ResolverState::Live),
        })
    }
}

/// Resolves blocks across the fork set and the block log, and keeps the versioned store in step with
/// the head of the main branch.
pub struct ChainResolver {
    pub(super) configuration: Configuration,
    pub(super) store: SharedStore,
    pub(super) fork_set: ForkSet,
    pub(super) block_log: BlockLog,
    pub(super) event_handlers: EventHandlers,
    pub(super) pre_reindex_hook: Option<ReindexHook>,
    pub(super) post_reindex_hook: Option<ReindexHook>,
    pub(super) state: Mutex<ResolverState>,
}

impl ChainResolver {
    /* ↓↓↓ Component access ↓↓↓ */

    /// Get a handle to the versioned store, for reading state or registering record types.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn fork_set(&self) -> &ForkSet {
        &self.fork_set
    }

    pub fn block_log(&self) -> &BlockLog {
        &self.block_log
    }

    pub fn state(&self) -> Result<ResolverState, ResolverError> {
        Ok(*self.state.lock().map_err(|_| ResolverError::LockPoisoned)?)
    }

    /* ↓↓↓ Lookups ↓↓↓ */

    pub fn is_known_block(&self, id: &CryptoHash) -> Result<bool, ResolverError> {
        for source in self.sources() {
            if source.contains(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Get the hash of the main-branch block at `height`.
    pub fn find_block_id_for_num(&self, height: BlockHeight) -> Result<Option<CryptoHash>, ResolverError> {
        first_hit(&self.sources(), |source| source.id_by_number(height))
    }

    pub fn fetch_block_by_id(&self, id: &CryptoHash) -> Result<Option<Arc<Block>>, ResolverError> {
        first_hit(&self.sources(), |source| source.block_by_id(id))
    }

    /// Get the main-branch block at `height`.
    pub fn fetch_block_by_number(&self, height: BlockHeight) -> Result<Option<Arc<Block>>, ResolverError> {
        first_hit(&self.sources(), |source| source.block_by_number(height))
    }

    /// Get the height of the head of the main branch. If the fork set is empty, this is the head of
    /// the block log.
    pub fn head_block_num(&self) -> Result<BlockHeight, ResolverError> {
        match self.fork_set.with_read_lock(|fork_set| fork_set.head_height())? {
            Some(height) => Ok(height),
            None => Ok(self.block_log.head_height()?),
        }
    }

    pub fn last_irreversible_block_num(&self) -> Result<BlockHeight, ResolverError> {
        let anchor = self.fork_set.with_read_lock(|fork_set| {
            (!fork_set.is_empty()).then(|| fork_set.anchor())
        })?;
        match anchor {
            Some(anchor) => Ok(anchor),
            None => Ok(self.block_log.head_height()?),
        }
    }

    /* ↓↓↓ Block acceptance ↓↓↓ */

    /// Accept `block` into the fork set, and bring the versioned store to the new head of the main
    /// branch by calling `applier` on the blocks that need to be applied.
    ///
    /// If `block` extends the head, it is applied in an undo session of its own. If the fork choice
    /// prefers `block` over the head but it is on another branch, the blocks of the old branch are
    /// undone back to the common ancestor, and the blocks of the new branch are applied. If any block
    /// fails to apply, it is removed from the fork set together with its descendants, and the old head
    /// is restored, both in the fork set and in the store.
    pub fn push_block(
        &self,
        block: Block,
        skip: SkipFlags,
        applier: &mut impl BlockApplier,
    ) -> Result<PushOutcome, ResolverError> {
        self.require_state(ResolverState::Live)?;
        self.store
            .with_write_lock(|store| self.push_block_locked(store, block, skip, applier))?
    }

    /// Undo the head block's undo session, and make its parent the head of the fork set. The popped
    /// block stays in the fork set.
    pub fn pop_block(&self) -> Result<Arc<Block>, ResolverError> {
        self.require_state(ResolverState::Live)?;
        self.store.with_write_lock(|store| -> Result<_, ResolverError> {
            let block = self.fork_set.with_write_lock(|fork_set| fork_set.pop_head())??;
            if let Err(err) = store.undo() {
                self.fork_set
                    .with_write_lock(|fork_set| fork_set.set_head(&block.hash))??;
                return Err(err.into());
            }
            self.fire_undo_session(&block, store.revision());
            Ok(block)
        })?
    }

    /// Move every main-branch block up to `new_last_irreversible` that is not yet in the block log into
    /// it, then make the store's changes up to that height permanent and discard every fork-set block
    /// that conflicts with it.
    ///
    /// Nothing is appended unless every block to be migrated is on the fork set's main branch.
    pub fn migrate_irreversible(&self, new_last_irreversible: BlockHeight) -> Result<(), ResolverError> {
        self.require_state(ResolverState::Live)?;
        self.store.with_write_lock(|store| -> Result<_, ResolverError> {
            let log_head = self.block_log.head_height()?;
            let (old_last_irreversible, blocks) = self.fork_set.with_read_lock(|fork_set| {
                let blocks = (log_head.int() + 1..=new_last_irreversible.int())
                    .map(BlockHeight::new)
                    .map(|height| {
                        fork_set
                            .fetch_on_main_branch_by_number(height)
                            .ok_or(ResolverError::MissingForkData { height })
                    })
                    .collect::<Result<Vec<_>, _>>();
                (fork_set.anchor(), blocks)
            })?;
            let blocks = blocks?;
            if new_last_irreversible <= old_last_irreversible && blocks.is_empty() {
                return Ok(());
            }

            for block in &blocks {
                self.block_log.append(block)?;
                self.event_handlers
                    .fire_handlers(Event::AppendBlock(AppendBlockEvent {
                        timestamp: SystemTime::now(),
                        block: block.hash,
                        height: block.height,
                    }));
            }
            self.block_log.flush()?;

            store.commit(Revision::from(new_last_irreversible));
            let pruned = self.fork_set.with_write_lock(|fork_set| {
                fork_set.set_last_irreversible(new_last_irreversible)
            })??;
            self.fire_pruned(pruned);
            self.event_handlers
                .fire_handlers(Event::MigrateIrreversible(MigrateIrreversibleEvent {
                    timestamp: SystemTime::now(),
                    old_last_irreversible,
                    new_last_irreversible,
                }));

            Ok(())
        })?
    }

    /// Revert every open undo state, flush the versioned store and the block log, and refuse every
    /// further operation that changes the chain.
    pub fn close(&self) -> Result<(), ResolverError> {
        self.transition(ResolverState::Live, ResolverState::Closed)?;
        self.store.with_write_lock(|store| -> Result<_, StoreError> {
            store.undo_all()?;
            store.flush()
        })??;
        self.block_log.flush()?;
        Ok(())
    }

    /* ↓↓↓ Internals ↓↓↓ */

    pub(super) fn sources(&self) -> [&dyn BlockSource; 2] {
        [&self.fork_set, &self.block_log]
    }

    pub(super) fn require_state(&self, expected: ResolverState) -> Result<(), ResolverError> {
        let found = self.state()?;
        if found != expected {
            return Err(ResolverError::InvalidState { expected, found });
        }
        Ok(())
    }

    pub(super) fn transition(
        &self,
        from: ResolverState,
        to: ResolverState,
    ) -> Result<(), ResolverError> {
        let mut state = self.state.lock().map_err(|_| ResolverError::LockPoisoned)?;
        if *state != from {
            return Err(ResolverError::InvalidState {
                expected: from,
                found: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn push_block_locked(
        &self,
        store: &mut VersionedStore,
        block: Block,
        skip: SkipFlags,
        applier: &mut impl BlockApplier,
    ) -> Result<PushOutcome, ResolverError> {
        if self.fork_set.with_read_lock(|fork_set| fork_set.is_empty())? {
            return self.push_first_block(store, block, skip, applier);
        }

        let id = block.hash;
        let height = block.height;
        let extends_head = self
            .fork_set
            .with_read_lock(|fork_set| fork_set.head().map(|head| head.id()))?
            .is_some_and(|head| head == block.previous);
        let outcome = self.fork_set.push_block(block)?;
        self.fire_insert(id, height);
        self.fire_pruned(outcome.pruned.clone());

        if !outcome.head_changed() {
            return Ok(outcome);
        }
        if extends_head {
            let block = self
                .fork_set
                .fetch_block(&id)?
                .ok_or(ResolverError::MissingForkData { height })?;
            if let Err(err) = self.apply_in_session(store, &block, skip, applier) {
                self.fork_set.with_write_lock(|fork_set| fork_set.remove(&id))??;
                return Err(err);
            }
            return Ok(outcome);
        }

        self.switch_fork(store, &outcome.old_head, &outcome.new_head, skip, applier)?;
        Ok(outcome)
    }

    /// Push a block into an empty fork set. The block must extend the head of the block log.
    fn push_first_block(
        &self,
        store: &mut VersionedStore,
        block: Block,
        skip: SkipFlags,
        applier: &mut impl BlockApplier,
    ) -> Result<PushOutcome, ResolverError> {
        let log_head = self.block_log.head_height()?;
        if store.revision() != Revision::from(log_head) {
            return Err(ResolverError::ReindexRequired {
                revision: store.revision(),
                log_head,
            });
        }
        let links_to_log = match self.block_log.head_id()? {
            Some(head_id) => block.previous == head_id,
            None => true,
        };
        if block.height != log_head + 1 || !links_to_log {
            return Err(ResolverError::ForkSet(
                crate::fork_set::ForkSetError::UnlinkableBlock {
                    id: block.hash,
                    previous: block.previous,
                },
            ));
        }

        let id = block.hash;
        let height = block.height;
        self.apply_in_session(store, &block, skip, applier)?;
        self.fork_set.with_write_lock(|fork_set| {
            fork_set.start_block(block);
            fork_set.set_last_irreversible(log_head)
        })??;
        self.fire_insert(id, height);

        Ok(PushOutcome {
            old_head: CryptoHash::zero(),
            new_head: id,
            pruned: Vec::new(),
        })
    }

    /// Undo the blocks of the branch ending at `old_head` back to its common ancestor with `new_head`,
    /// then apply the blocks of the branch ending at `new_head`.
    fn switch_fork(
        &self,
        store: &mut VersionedStore,
        old_head: &CryptoHash,
        new_head: &CryptoHash,
        skip: SkipFlags,
        applier: &mut impl BlockApplier,
    ) -> Result<(), ResolverError> {
        let (new_branch, old_branch) = self
            .fork_set
            .with_read_lock(|fork_set| fork_set.fetch_branch_from(new_head, old_head))??;
        log::debug!(
            "switching fork: undoing {} blocks, applying {} blocks",
            old_branch.len(),
            new_branch.len()
        );

        for block in &old_branch {
            store.undo()?;
            self.fire_undo_session(block, store.revision());
        }

        let mut applied = 0;
        for block in new_branch.iter().rev() {
            if let Err(err) = self.apply_in_session(store, block, skip, applier) {
                for undone in new_branch.iter().rev().take(applied).rev() {
                    store.undo()?;
                    self.fire_undo_session(undone, store.revision());
                }
                self.fork_set.with_write_lock(|fork_set| {
                    fork_set.remove(&block.hash)?;
                    fork_set.set_head(old_head)
                })??;
                for block in old_branch.iter().rev() {
                    self.apply_in_session(store, block, skip, applier)?;
                }
                return Err(err);
            }
            applied += 1;
        }

        self.event_handlers
            .fire_handlers(Event::SwitchFork(SwitchForkEvent {
                timestamp: SystemTime::now(),
                old_head: *old_head,
                new_head: *new_head,
                popped: old_branch.len(),
                applied,
            }));
        Ok(())
    }

    /// Apply `block` in a new undo session, and leave the session on the undo stack.
    pub(super) fn apply_in_session(
        &self,
        store: &mut VersionedStore,
        block: &Block,
        skip: SkipFlags,
        applier: &mut impl BlockApplier,
    ) -> Result<(), ResolverError> {
        let mut session = store.start_session();
        applier
            .apply(&mut session, block, skip)
            .map_err(|source| ResolverError::ApplyFailed {
                height: block.height,
                id: block.hash,
                source,
            })?;
        session.push();
        Ok(())
    }

    fn fire_insert(&self, block: CryptoHash, height: BlockHeight) {
        self.event_handlers
            .fire_handlers(Event::InsertForkBlock(InsertForkBlockEvent {
                timestamp: SystemTime::now(),
                block,
                height,
            }));
    }

    pub(super) fn fire_pruned(&self, pruned: Vec<CryptoHash>) {
        for block in pruned {
            self.event_handlers
                .fire_handlers(Event::PruneForkBlock(PruneForkBlockEvent {
                    timestamp: SystemTime::now(),
                    block,
                }));
        }
    }

    fn fire_undo_session(&self, block: &Block, revision: Revision) {
        self.event_handlers
            .fire_handlers(Event::UndoSession(UndoSessionEvent {
                timestamp: SystemTime::now(),
                block: block.hash,
                revision,
            }));
    }
}
