/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The chain resolver: composes the [block log](crate::block_log), the [fork set](crate::fork_set),
//! and the [versioned store](crate::versioned_store) into one view of the chain.
//!
//! ## Two tiers of blocks
//!
//! Irreversible blocks live in the block log. Reversible blocks live in the fork set, which also keeps
//! the last irreversible block. Every lookup
//! by hash or by height asks the fork set first, then the block log. The first tier that has the
//! block answers.
//!
//! [`migrate_irreversible`](ChainResolver::migrate_irreversible) moves blocks from the fork set into
//! the block log when they become irreversible. It checks that every block it needs is in the fork
//! set before it appends anything, so the block log never receives a partial migration.
//!
//! ## State
//!
//! The versioned store's revision tracks the height of the block whose effects it reflects. Each
//! reversible block is applied in its own undo session, so popping a block is an
//! [`undo`](crate::versioned_store::VersionedStore::undo), and a block becoming irreversible is a
//! [`commit`](crate::versioned_store::VersionedStore::commit).
//!
//! [`reindex`](ChainResolver::reindex) rebuilds the versioned store by replaying the block log. It
//! polls an interrupt predicate before every block and, if interrupted, stops with every replayed
//! block committed, so calling it again later resumes where it stopped.
//!
//! ## Lifecycle
//!
//! A resolver is [Live](ResolverState::Live) after it is opened, [Reindexing](ResolverState::Reindexing)
//! for the duration of a reindex, and [Closed](ResolverState::Closed) after
//! [`close`](ChainResolver::close). Operations that change the chain are refused outside of the Live
//! state.
//!
//! ## Locks
//!
//! The versioned store and the fork set each have their own read/write lock. Operations that need
//! both always take the versioned store's lock first. Event handlers run while these locks are held,
//! and therefore must not call back into the resolver.

use std::fmt::{self, Display, Formatter};

use crate::{
    block_log::BlockLogError,
    fork_set::ForkSetError,
    types::data_types::{BlockHeight, CryptoHash, Revision},
    versioned_store::StoreError,
};

pub mod applier;

pub mod block_source;

pub mod reindex;

pub mod resolver;

pub mod sync;

pub use applier::{ApplyError, BlockApplier};
pub use block_source::BlockSource;
pub use reindex::{ReindexArgs, ReindexOutcome};
pub use resolver::{ChainResolver, ChainResolverSpec, ReindexHook};

/// Error returned by a [reindex hook](ReindexHook).
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolverState {
    Live,
    Reindexing,
    Closed,
}

impl Display for ResolverState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ResolverState::Live => write!(f, "live"),
            ResolverState::Reindexing => write!(f, "reindexing"),
            ResolverState::Closed => write!(f, "closed"),
        }
    }
}

/// Errors that may be encountered when operating a [`ChainResolver`].
#[derive(Debug)]
pub enum ResolverError {
    Store(StoreError),

    BlockLog(BlockLogError),

    ForkSet(ForkSetError),

    /// Migrating irreversible blocks requires the block at `height`, but the fork set's main branch
    /// does not have it.
    MissingForkData { height: BlockHeight },

    /// The block log's index says it has a block at `height`, but it could not be read.
    MissingLogBlock { height: BlockHeight },

    /// None of the blocks in a peer's synopsis are on the local main branch.
    UnreachableFork,

    /// The reference point of a synopsis is in neither tier.
    UnknownReferencePoint { id: CryptoHash },

    /// The versioned store's revision does not match the head of the block log, so the store has to
    /// be rebuilt with [`reindex`](ChainResolver::reindex) before blocks can be applied on top of it.
    ReindexRequired { revision: Revision, log_head: BlockHeight },

    /// A reindex was requested, but there are no blocks in the block log to replay.
    EmptyBlockLog,

    /// The operation is only allowed in the `expected` state.
    InvalidState {
        expected: ResolverState,
        found: ResolverState,
    },

    /// The block application callback failed on a block.
    ApplyFailed {
        height: BlockHeight,
        id: CryptoHash,
        source: ApplyError,
    },

    /// A pre-reindex or post-reindex hook failed.
    Hook {
        hook: &'static str,
        source: HookError,
    },

    /// A thread panicked while holding the resolver's state lock.
    LockPoisoned,
}

impl ResolverError {
    /// Whether this error indicates corruption or a bug, rather than an input that the caller can
    /// correct.
    pub fn is_fatal(&self) -> bool {
        match self {
            ResolverError::Store(err) => err.is_fatal(),
            ResolverError::BlockLog(BlockLogError::Corrupted { .. })
            | ResolverError::ForkSet(ForkSetError::DanglingHandle)
            | ResolverError::ForkSet(ForkSetError::NoCommonAncestor)
            | ResolverError::MissingForkData { .. }
            | ResolverError::MissingLogBlock { .. }
            | ResolverError::LockPoisoned => true,
            _ => false,
        }
    }
}

impl From<StoreError> for ResolverError {
    fn from(value: StoreError) -> Self {
        ResolverError::Store(value)
    }
}

impl From<BlockLogError> for ResolverError {
    fn from(value: BlockLogError) -> Self {
        ResolverError::BlockLog(value)
    }
}

impl From<ForkSetError> for ResolverError {
    fn from(value: ForkSetError) -> Self {
        ResolverError::ForkSet(value)
    }
}

impl Display for ResolverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ResolverError::Store(err) => write!(f, "versioned store: {}", err),
            ResolverError::BlockLog(err) => write!(f, "block log: {}", err),
            ResolverError::ForkSet(err) => write!(f, "fork set: {}", err),
            ResolverError::MissingForkData { height } => write!(
                f,
                "fork set main branch has no block at height {} to migrate",
                height
            ),
            ResolverError::MissingLogBlock { height } => {
                write!(f, "block log has no readable block at height {}", height)
            }
            ResolverError::UnreachableFork => {
                write!(f, "peer synopsis has no block on the local main branch")
            }
            ResolverError::UnknownReferencePoint { id } => {
                write!(f, "synopsis reference point {} is unknown", id)
            }
            ResolverError::ReindexRequired { revision, log_head } => write!(
                f,
                "store is at revision {} but the block log head is {}, reindex required",
                revision, log_head
            ),
            ResolverError::EmptyBlockLog => write!(f, "block log is empty, nothing to reindex"),
            ResolverError::InvalidState { expected, found } => write!(
                f,
                "resolver must be {} for this operation, but is {}",
                expected, found
            ),
            ResolverError::ApplyFailed { height, id, source } => write!(
                f,
                "failed to apply block {} at height {}: {}",
                id, height, source
            ),
            ResolverError::Hook { hook, source } => write!(f, "{} hook failed: {}", hook, source),
            ResolverError::LockPoisoned => write!(f, "resolver state lock poisoned"),
        }
    }
}

impl std::error::Error for ResolverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolverError::Store(err) => Some(err),
            ResolverError::BlockLog(err) => Some(err),
            ResolverError::ForkSet(err) => Some(err),
            ResolverError::ApplyFailed { source, .. } | ResolverError::Hook { source, .. } => {
                Some(&**source)
            }
            _ => None,
        }
    }
}
