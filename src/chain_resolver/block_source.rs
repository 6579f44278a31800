/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The two tiers a block can be looked up in, behind one trait.

use std::sync::Arc;

use super::ResolverError;
use crate::{
    block_log::BlockLog,
    fork_set::ForkSet,
    types::{
        block::Block,
        data_types::{BlockHeight, CryptoHash},
    },
};

/// A tier of blocks that can be looked up by hash or by height.
///
/// Lookups by height only see the main branch.
pub trait BlockSource {
    fn source_name(&self) -> &'static str;

    fn block_by_id(&self, id: &CryptoHash) -> Result<Option<Arc<Block>>, ResolverError>;

    fn block_by_number(&self, height: BlockHeight) -> Result<Option<Arc<Block>>, ResolverError>;

    fn id_by_number(&self, height: BlockHeight) -> Result<Option<CryptoHash>, ResolverError>;

    fn contains(&self, id: &CryptoHash) -> Result<bool, ResolverError>;
}

impl BlockSource for ForkSet {
    fn source_name(&self) -> &'static str {
        "fork set"
    }

    fn block_by_id(&self, id: &CryptoHash) -> Result<Option<Arc<Block>>, ResolverError> {
        Ok(self.fetch_block(id)?)
    }

    fn block_by_number(&self, height: BlockHeight) -> Result<Option<Arc<Block>>, ResolverError> {
        Ok(self.fetch_on_main_branch_by_number(height)?)
    }

    fn id_by_number(&self, height: BlockHeight) -> Result<Option<CryptoHash>, ResolverError> {
        Ok(self
            .fetch_on_main_branch_by_number(height)?
            .map(|block| block.hash))
    }

    fn contains(&self, id: &CryptoHash) -> Result<bool, ResolverError> {
        Ok(self.is_known_block(id)?)
    }
}

impl BlockSource for BlockLog {
    fn source_name(&self) -> &'static str {
        "block log"
    }

    // A block whose contents do not hash to the id it is indexed under is treated as absent.
    fn block_by_id(&self, id: &CryptoHash) -> Result<Option<Arc<Block>>, ResolverError> {
        Ok(self
            .read_by_id(id)?
            .filter(|block| block.hash == *id && block.is_hash_correct())
            .map(Arc::new))
    }

    fn block_by_number(&self, height: BlockHeight) -> Result<Option<Arc<Block>>, ResolverError> {
        Ok(self
            .read_by_number(height)?
            .filter(|block| block.is_hash_correct())
            .map(Arc::new))
    }

    fn id_by_number(&self, height: BlockHeight) -> Result<Option<CryptoHash>, ResolverError> {
        Ok(self.read_id_by_number(height)?)
    }

    fn contains(&self, id: &CryptoHash) -> Result<bool, ResolverError> {
        Ok(BlockLog::contains(self, id)?)
    }
}

/// Ask each source in turn, returning the first hit.
pub(crate) fn first_hit<T>(
    sources: &[&dyn BlockSource],
    mut lookup: impl FnMut(&dyn BlockSource) -> Result<Option<T>, ResolverError>,
) -> Result<Option<T>, ResolverError> {
    for source in sources {
        if let Some(hit) = lookup(*source)? {
            log::trace!("block found in {}", source.source_name());
            return Ok(Some(hit));
        }
    }
    Ok(None)
}
