/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block application callback.
//!
//! The resolver decides which blocks are applied to the versioned store, and in which order. What
//! applying a block means (executing its transactions, checking its witness) is decided by the
//! [`BlockApplier`] the caller passes in.

use crate::{
    types::{block::Block, skip_flags::SkipFlags},
    versioned_store::VersionedStore,
};

/// Error returned by a [`BlockApplier`].
pub type ApplyError = Box<dyn std::error::Error + Send + Sync>;

pub trait BlockApplier {
    /// Apply the effects of `block` to `store`, skipping the checks named in `skip`.
    ///
    /// The resolver always calls this inside an undo session opened for `block`. If this returns an
    /// error, every change made to `store` during the call is reverted.
    fn apply(
        &mut self,
        store: &mut VersionedStore,
        block: &Block,
        skip: SkipFlags,
    ) -> Result<(), ApplyError>;
}

impl<F> BlockApplier for F
where
    F: FnMut(&mut VersionedStore, &Block, SkipFlags) -> Result<(), ApplyError>,
{
    fn apply(
        &mut self,
        store: &mut VersionedStore,
        block: &Block,
        skip: SkipFlags,
    ) -> Result<(), ApplyError> {
        self(store, block, skip)
    }
}
