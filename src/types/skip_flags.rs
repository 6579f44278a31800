/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validation bypass flags passed to block application callbacks.
//!
//! This crate does not validate blocks itself. It only sequences calls to a
//! [`BlockApplier`](crate::chain_resolver::BlockApplier), and tells it, through `SkipFlags`, which
//! checks it may omit. During a [reindex](crate::chain_resolver::ChainResolver::reindex), the blocks
//! being replayed were already validated when they first became irreversible, so the resolver passes
//! [`SkipFlags::REINDEX`] unless the caller explicitly asked for full validation.

use std::{
    fmt::{self, Debug, Formatter},
    ops::{BitOr, BitOrAssign},
};

/// A set of checks that a block application callback may skip.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SkipFlags(u32);

impl SkipFlags {
    /// Skip nothing: fully validate the block.
    pub const NONE: SkipFlags = SkipFlags(0);
    pub const SKIP_WITNESS_SIGNATURE: SkipFlags = SkipFlags(1 << 0);
    pub const SKIP_TRANSACTION_SIGNATURES: SkipFlags = SkipFlags(1 << 1);
    pub const SKIP_MERKLE_CHECK: SkipFlags = SkipFlags(1 << 2);
    pub const SKIP_AUTHORITY_CHECK: SkipFlags = SkipFlags(1 << 3);
    pub const SKIP_VALIDATE_INVARIANTS: SkipFlags = SkipFlags(1 << 4);
    pub const SKIP_UNDO_HISTORY: SkipFlags = SkipFlags(1 << 5);

    /// The bypass configuration used when replaying the block log.
    pub const REINDEX: SkipFlags = SkipFlags(
        Self::SKIP_WITNESS_SIGNATURE.0
            | Self::SKIP_TRANSACTION_SIGNATURES.0
            | Self::SKIP_MERKLE_CHECK.0
            | Self::SKIP_AUTHORITY_CHECK.0
            | Self::SKIP_VALIDATE_INVARIANTS.0
            | Self::SKIP_UNDO_HISTORY.0,
    );

    /// Get the raw bits of this set.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Check whether every flag in `other` is also in `self`.
    pub const fn contains(&self, other: SkipFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether no flag is set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SkipFlags {
    type Output = SkipFlags;

    fn bitor(self, rhs: SkipFlags) -> SkipFlags {
        SkipFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SkipFlags {
    fn bitor_assign(&mut self, rhs: SkipFlags) {
        self.0 |= rhs.0
    }
}

impl Debug for SkipFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SkipFlags({:#08b})", self.0)
    }
}
