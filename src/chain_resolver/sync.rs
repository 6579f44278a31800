/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Queries that let two nodes find where their chains diverge, and what one needs from the other.
//!
//! A node describes its chain with a [synopsis](ChainResolver::get_blockchain_synopsis). The peer
//! answers with [block ids](ChainResolver::get_block_ids) starting right after the newest block
//! of the synopsis that is also on its own main branch.

use super::{resolver::ChainResolver, ResolverError};
use crate::{
    fork_set::{synopsis::synopsis_heights, ForkSetError},
    types::data_types::{BlockHeight, CryptoHash},
};

impl ChainResolver {
    /// Summarize the main branch up to `reference_point` (or the head, if `None`), oldest first.
    ///
    /// The summary starts at the last irreversible block. If the fork set no longer holds that block,
    /// its id is read from the block log. If `reference_point` is only in the block log, or the fork
    /// set is empty, the summary is built from the block log alone, starting at height 1.
    pub fn get_blockchain_synopsis(
        &self,
        reference_point: Option<&CryptoHash>,
        count_after: u64,
    ) -> Result<Vec<CryptoHash>, ResolverError> {
        let from_fork_set = self.fork_set.with_read_lock(|fork_set| {
            (!fork_set.is_empty())
                .then(|| fork_set.get_blockchain_synopsis(reference_point, count_after))
        })?;

        match from_fork_set {
            Some(Ok(synopsis)) => {
                let mut ids = synopsis.ids;
                if let Some(height) = synopsis.need_from_log {
                    let id = self
                        .block_log
                        .read_id_by_number(height)?
                        .ok_or(ResolverError::MissingLogBlock { height })?;
                    ids.insert(0, id);
                }
                Ok(ids)
            }
            Some(Err(ForkSetError::ReferencePointNotFound { .. })) | None => {
                self.log_synopsis(reference_point, count_after)
            }
            Some(Err(err)) => Err(err.into()),
        }
    }

    /// Find the newest id in `peer_synopsis` that is on the local main branch, and return up to
    /// `limit` consecutive main-branch ids after it, together with the number of main-branch blocks
    /// after the last returned id.
    ///
    /// An empty synopsis matches before height 1. Fails with `UnreachableFork` if a non-empty synopsis
    /// has no id on the local main branch.
    pub fn get_block_ids(
        &self,
        peer_synopsis: &[CryptoHash],
        limit: u64,
    ) -> Result<(Vec<CryptoHash>, u64), ResolverError> {
        self.fork_set.with_read_lock(|fork_set| -> Result<_, ResolverError> {
            let log_head = self.block_log.head_height()?;
            let head = fork_set.head_height().unwrap_or(log_head).max(log_head);

            let mut common = None;
            if peer_synopsis.is_empty() {
                common = Some(BlockHeight::zero());
            }
            for id in peer_synopsis.iter().rev() {
                if let Some(block) = fork_set.fetch_block(id).filter(|_| fork_set.is_on_main_branch(id)) {
                    common = Some(block.height);
                    break;
                }
                if let Some(height) = self.block_log.height_of(id)? {
                    common = Some(height);
                    break;
                }
            }
            let common = common.ok_or(ResolverError::UnreachableFork)?;

            let mut ids = Vec::new();
            let mut height = common + 1;
            while (ids.len() as u64) < limit && height <= head {
                let id = if height <= log_head {
                    self.block_log.read_id_by_number(height)?
                } else {
                    fork_set
                        .fetch_on_main_branch_by_number(height)
                        .map(|block| block.hash)
                };
                match id {
                    Some(id) => ids.push(id),
                    None => break,
                }
                height += 1;
            }
            let remaining = head.int().saturating_sub(common.int() + ids.len() as u64);

            Ok((ids, remaining))
        })?
    }

    fn log_synopsis(
        &self,
        reference_point: Option<&CryptoHash>,
        count_after: u64,
    ) -> Result<Vec<CryptoHash>, ResolverError> {
        let reference = match reference_point {
            Some(id) => self
                .block_log
                .height_of(id)?
                .ok_or(ResolverError::UnknownReferencePoint { id: *id })?,
            None => self.block_log.head_height()?,
        };
        if reference.int() == 0 {
            return Ok(Vec::new());
        }

        synopsis_heights(1, reference.int(), count_after)
            .into_iter()
            .map(BlockHeight::new)
            .map(|height| {
                self.block_log
                    .read_id_by_number(height)?
                    .ok_or(ResolverError::MissingLogBlock { height })
            })
            .collect()
    }
}
