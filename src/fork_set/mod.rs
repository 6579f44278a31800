/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory DAG of reversible blocks.
//!
//! The fork set holds every block that has been accepted but is not yet irreversible. It is rooted at
//! a single block, normally the last irreversible one. Branches off the main branch that fall more
//! than a retention horizon behind the head are pruned. Each block links to its parent by a handle into the fork set's own
//! arena, so pruning one branch can never leave another branch with a dangling parent link.
//!
//! The fork set has its own read/write lock, separate from the
//! [versioned store's](crate::versioned_store::SharedStore): blocks need to be looked up while other
//! blocks are being applied to the store. Code that takes both locks always takes the store's first.

use std::fmt::{self, Display, Formatter};

use crate::types::data_types::{BlockHeight, CryptoHash};

pub mod fork_choice;

pub mod fork_item;

#[allow(clippy::module_inception)]
pub mod fork_set;

pub mod synopsis;

pub use fork_choice::{ForkChoice, HighestBlock};
pub use fork_item::{ForkItemHandle, ForkItemView};
pub use fork_set::{ForkDag, ForkSet, PushOutcome};
pub use synopsis::Synopsis;

/// Errors that may be encountered when operating a [`ForkSet`].
#[derive(Debug)]
pub enum ForkSetError {
    /// The block's parent is not in the fork set, or the block's height is not one above its parent's.
    UnlinkableBlock { id: CryptoHash, previous: CryptoHash },

    /// The block is already in the fork set.
    DuplicateBlock { id: CryptoHash },

    /// No block with hash `id` is in the fork set.
    UnknownBlock { id: CryptoHash },

    /// The reference point of a synopsis is not on the main branch of the fork set.
    ReferencePointNotFound { id: CryptoHash },

    /// No main-branch block at `height` is in the fork set.
    HeightNotOnMainBranch { height: BlockHeight },

    /// The operation requires a head, but the fork set is empty.
    Empty,

    /// The head is the root of the fork set, so it has no parent to move to.
    CannotPopRoot,

    /// Two blocks in the fork set have no common ancestor. This can only happen through a bug.
    NoCommonAncestor,

    /// A fork item handle held by the fork set does not resolve. This can only happen through a bug.
    DanglingHandle,

    /// A thread panicked while holding the fork set's lock.
    LockPoisoned,
}

impl Display for ForkSetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ForkSetError::UnlinkableBlock { id, previous } => write!(
                f,
                "block {} does not link to a known parent (previous {})",
                id, previous
            ),
            ForkSetError::DuplicateBlock { id } => write!(f, "block {} is already known", id),
            ForkSetError::UnknownBlock { id } => write!(f, "block {} is not in the fork set", id),
            ForkSetError::ReferencePointNotFound { id } => {
                write!(f, "reference point {} is not on the main branch", id)
            }
            ForkSetError::HeightNotOnMainBranch { height } => {
                write!(f, "no main-branch block at height {}", height)
            }
            ForkSetError::Empty => write!(f, "fork set is empty"),
            ForkSetError::CannotPopRoot => write!(f, "cannot pop the root of the fork set"),
            ForkSetError::NoCommonAncestor => write!(f, "blocks have no common ancestor"),
            ForkSetError::DanglingHandle => write!(f, "fork item handle does not resolve"),
            ForkSetError::LockPoisoned => write!(f, "fork set lock poisoned"),
        }
    }
}

impl std::error::Error for ForkSetError {}
