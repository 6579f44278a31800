/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of events emitted by the [chain resolver](crate::chain_resolver) for event handling and
//! logging.
//!
//! An event for a given action indicates that the action has been completed.
//!
//! Handlers for these events are registered through the
//! [`ChainResolverSpec`](crate::chain_resolver::ChainResolverSpec) builder, and are run synchronously
//! on the thread that completed the action. If
//! [`Configuration::log_events`](crate::config::Configuration::log_events) is set, a default handler
//! that logs each event (as defined in [`logging`](crate::logging)) is also registered.

use std::time::{Duration, SystemTime};

use crate::types::data_types::{BlockHeight, CryptoHash, Revision};

pub enum Event {
    // Events that change the fork set.
    InsertForkBlock(InsertForkBlockEvent),
    PruneForkBlock(PruneForkBlockEvent),
    SwitchFork(SwitchForkEvent),
    // Events that change the block log.
    AppendBlock(AppendBlockEvent),
    MigrateIrreversible(MigrateIrreversibleEvent),
    // Reindex events.
    PreReindex(PreReindexEvent),
    ReindexProgress(ReindexProgressEvent),
    PostReindex(PostReindexEvent),
    // Events that change the versioned store.
    UndoSession(UndoSessionEvent),
}

/// A block was inserted into the fork set.
pub struct InsertForkBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

/// A block was removed from the fork set, either because its branch lost and fell behind the retention
/// horizon, because it conflicts with an irreversible block, or because a reindex reset the fork set.
pub struct PruneForkBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
}

/// The head of the main branch moved from `old_head` to `new_head`, which is not a descendant of
/// `old_head`. `popped` blocks were undone and `applied` blocks were applied in the process.
pub struct SwitchForkEvent {
    pub timestamp: SystemTime,
    pub old_head: CryptoHash,
    pub new_head: CryptoHash,
    pub popped: usize,
    pub applied: usize,
}

/// A block was appended to the block log.
pub struct AppendBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

/// The last irreversible block advanced, and every block up to it was migrated into the block log.
pub struct MigrateIrreversibleEvent {
    pub timestamp: SystemTime,
    pub old_last_irreversible: BlockHeight,
    pub new_last_irreversible: BlockHeight,
}

/// The record passed to reindex hooks and carried by reindex events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReindexNotification {
    /// The height reindexing will stop at, if bounded.
    pub max_block_number: Option<BlockHeight>,
    pub force_replay: bool,
    pub validate_during_replay: bool,
    /// The height of the last replayed block. Before the reindex, the height the store starts from.
    pub last_block_number: BlockHeight,
    /// Whether the reindex ran to completion. Always `false` before the reindex.
    pub reindex_success: bool,
}

/// A reindex is about to start.
pub struct PreReindexEvent {
    pub timestamp: SystemTime,
    pub notification: ReindexNotification,
}

/// A reindex replayed the block at `height`, out of `target`.
pub struct ReindexProgressEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub target: BlockHeight,
}

/// A reindex ended, either by completing, by being interrupted, or by failing.
pub struct PostReindexEvent {
    pub timestamp: SystemTime,
    pub notification: ReindexNotification,
    pub elapsed: Duration,
}

/// A block's undo session was reverted, bringing the store back to `revision`.
pub struct UndoSessionEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub revision: Revision,
}
