/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Lazy, forward-only iteration over a range of the block log.

use super::{BlockLog, BlockLogError};
use crate::types::{block::Block, data_types::BlockHeight};

/// Iterator over the blocks in a fixed range of heights, obtained through [`BlockLog::iter`].
///
/// Each block is read from disk only when the iterator is advanced. The range is fixed when the
/// iterator is created: blocks appended afterwards are not visited. After the first error, the
/// iterator is exhausted.
pub struct BlockLogIter<'a> {
    log: &'a BlockLog,
    next: u64,
    end: u64,
}

impl<'a> BlockLogIter<'a> {
    pub(super) fn new(log: &'a BlockLog, from: u64, to: u64) -> Self {
        Self {
            log,
            next: from,
            end: to,
        }
    }

    /// Get the number of blocks this iterator has yet to yield.
    pub fn remaining(&self) -> u64 {
        (self.end + 1).saturating_sub(self.next)
    }
}

impl Iterator for BlockLogIter<'_> {
    type Item = Result<Block, BlockLogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }
        let height = BlockHeight::new(self.next);
        self.next += 1;

        match self.log.read_by_number(height) {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => {
                self.next = self.end + 1;
                Some(Err(BlockLogError::Corrupted {
                    detail: format!("block at height {} disappeared from the log", height),
                }))
            }
            Err(err) => {
                self.next = self.end + 1;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining() as usize))
    }
}
