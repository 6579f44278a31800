/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rebuilding the versioned store by replaying the block log.

use std::time::{Duration, Instant, SystemTime};

use super::{applier::BlockApplier, resolver::ChainResolver, ResolverError, ResolverState};
use crate::{
    events::*,
    types::{
        data_types::{BlockHeight, Revision},
        skip_flags::SkipFlags,
    },
    versioned_store::VersionedStore,
};

/// Parameters of a [reindex](ChainResolver::reindex).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReindexArgs {
    /// Stop after replaying the block at this height, instead of at the head of the block log.
    pub stop_at: Option<BlockHeight>,

    /// Clear the store and replay from height 1, instead of resuming from the store's revision.
    pub force_replay: bool,

    /// Apply blocks with every check enabled, instead of with [`SkipFlags::REINDEX`].
    pub validate_during_replay: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReindexOutcome {
    /// The height of the last block replayed, which is also the store's revision.
    pub last_block_number: BlockHeight,

    /// Whether the reindex stopped because the interrupt predicate returned `true`.
    pub interrupted: bool,

    pub elapsed: Duration,
}

impl ChainResolver {
    /// Replay the block log into the versioned store, calling `applier` on each block.
    ///
    /// Replay starts one block past the store's last committed revision, or at height 1 if
    /// [`force_replay`](ReindexArgs::force_replay) is set, and ends at the head of the block log or at
    /// [`stop_at`](ReindexArgs::stop_at), whichever is lower. Every replayed block is committed as soon
    /// as it is applied.
    ///
    /// `is_interrupted` is called before every block. If it returns `true`, the reindex stops cleanly:
    /// the outcome reports `interrupted`, and a later call resumes from the last replayed block.
    ///
    /// The fork set is emptied before replay starts. However the reindex ends, it is then re-anchored
    /// at the last replayed block, and the store is flushed. The [pre-reindex hook](super::ChainResolverSpec) runs before anything is changed,
    /// and the post-reindex hook runs after the cleanup.
    pub fn reindex(
        &self,
        args: ReindexArgs,
        applier: &mut impl BlockApplier,
        is_interrupted: impl Fn() -> bool,
    ) -> Result<ReindexOutcome, ResolverError> {
        self.transition(ResolverState::Live, ResolverState::Reindexing)?;
        let started = Instant::now();
        let mut notification = ReindexNotification {
            max_block_number: args.stop_at,
            force_replay: args.force_replay,
            validate_during_replay: args.validate_during_replay,
            last_block_number: BlockHeight::zero(),
            reindex_success: false,
        };

        let result = self
            .store
            .with_write_lock(|store| {
                self.replay(store, &args, &mut notification, applier, &is_interrupted)
            })
            .map_err(ResolverError::from)
            .and_then(|result| result);
        self.transition(ResolverState::Reindexing, ResolverState::Live)?;

        let interrupted = match &result {
            Ok(interrupted) => *interrupted,
            Err(err) => {
                log::error!("reindex failed at height {}: {}", notification.last_block_number, err);
                false
            }
        };
        notification.reindex_success = result.is_ok() && !interrupted;
        let elapsed = started.elapsed();
        self.event_handlers
            .fire_handlers(Event::PostReindex(PostReindexEvent {
                timestamp: SystemTime::now(),
                notification: notification.clone(),
                elapsed,
            }));
        let post_hook_result = match &self.post_reindex_hook {
            Some(hook) => hook(&notification),
            None => Ok(()),
        };

        result?;
        post_hook_result.map_err(|source| ResolverError::Hook {
            hook: "post-reindex",
            source,
        })?;

        Ok(ReindexOutcome {
            last_block_number: notification.last_block_number,
            interrupted,
            elapsed,
        })
    }

    /// Returns whether the replay was interrupted.
    fn replay(
        &self,
        store: &mut VersionedStore,
        args: &ReindexArgs,
        notification: &mut ReindexNotification,
        applier: &mut impl BlockApplier,
        is_interrupted: &impl Fn() -> bool,
    ) -> Result<bool, ResolverError> {
        let log_head = self.block_log.head_height()?;
        if log_head.int() == 0 {
            return Err(ResolverError::EmptyBlockLog);
        }
        let target = args.stop_at.map_or(log_head, |stop_at| stop_at.min(log_head));

        // Undo states are numbered contiguously up to the current revision.
        let committed = store.revision().int().saturating_sub(store.undo_depth() as u64);
        notification.last_block_number = if args.force_replay {
            BlockHeight::zero()
        } else {
            BlockHeight::new(committed)
        };
        if notification.last_block_number > log_head {
            return Err(ResolverError::ReindexRequired {
                revision: Revision::new(committed),
                log_head,
            });
        }

        if let Some(hook) = &self.pre_reindex_hook {
            hook(notification).map_err(|source| ResolverError::Hook {
                hook: "pre-reindex",
                source,
            })?;
        }
        self.event_handlers
            .fire_handlers(Event::PreReindex(PreReindexEvent {
                timestamp: SystemTime::now(),
                notification: notification.clone(),
            }));

        store.undo_all()?;
        if args.force_replay {
            store.clear()?;
        }
        // The reversible blocks were just reverted out of the store, so they must not be found either.
        let pruned = self.fork_set.with_write_lock(|fork_set| fork_set.clear())?;
        self.fire_pruned(pruned);
        let skip = if args.validate_during_replay {
            SkipFlags::NONE
        } else {
            SkipFlags::REINDEX
        };
        let progress_interval = self.configuration.reindex_progress_interval.max(1);
        log::info!(
            "reindexing blocks {} to {}",
            notification.last_block_number + 1,
            target
        );

        let mut interrupted = false;
        let mut failure: Option<ResolverError> = None;
        for block in self.block_log.iter(notification.last_block_number + 1, target)? {
            if is_interrupted() {
                interrupted = true;
                break;
            }
            let block = match block {
                Ok(block) => block,
                Err(err) => {
                    failure = Some(ResolverError::from(err));
                    break;
                }
            };
            let mut session = store.start_session();
            if let Err(source) = applier.apply(&mut session, &block, skip) {
                failure = Some(ResolverError::ApplyFailed {
                    height: block.height,
                    id: block.hash,
                    source,
                });
                break;
            }
            session.commit();

            notification.last_block_number = block.height;
            if block.height.int() % progress_interval == 0 {
                log::info!("reindexed {} of {} blocks", block.height, target);
                self.event_handlers
                    .fire_handlers(Event::ReindexProgress(ReindexProgressEvent {
                        timestamp: SystemTime::now(),
                        height: block.height,
                        target,
                    }));
            }
        }
        if interrupted {
            log::info!(
                "reindex interrupted after block {}",
                notification.last_block_number
            );
        }

        store.set_revision(Revision::from(notification.last_block_number))?;
        self.re_anchor(notification.last_block_number)?;
        store.flush()?;

        match failure {
            Some(err) => Err(err),
            None => Ok(interrupted),
        }
    }

    /// Reset the fork set so that the block log block at `height` is its only block.
    fn re_anchor(&self, height: BlockHeight) -> Result<(), ResolverError> {
        let pruned = if height.int() == 0 {
            self.fork_set.with_write_lock(|fork_set| fork_set.clear())?
        } else {
            let block = self
                .block_log
                .read_by_number(height)?
                .ok_or(ResolverError::MissingLogBlock { height })?;
            self.fork_set.start_block(block)?
        };
        self.fire_pruned(pruned);
        Ok(())
    }
}
