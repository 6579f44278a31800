/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blockchain synopses: sparse summaries of a chain used to find the point where two nodes' chains
//! diverge.
//!
//! ## Spacing
//!
//! A synopsis covers the heights from the last irreversible block (`low`) up to a reference point.
//! Each step covers half of the remaining distance to `reference + count_after`, so the synopsis is
//! sparse near the irreversible end and dense near the reference point:
//!
//! ```text
//! height_0 = low
//! height_{i+1} = height_i + max(1, (reference + count_after - height_i + 2) / 2)
//! ```
//!
//! The sequence stops at the first height above `reference`. The reference point itself is always
//! the last element.

use crate::types::data_types::{BlockHeight, CryptoHash};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Synopsis {
    /// Block hashes, oldest first.
    pub ids: Vec<CryptoHash>,

    /// If set, the hash of the block at this height is needed at the front of `ids`, but is not in
    /// memory and must be read from the [block log](crate::block_log).
    pub need_from_log: Option<BlockHeight>,
}

/// Compute the heights a synopsis from `low` up to `reference` consists of.
pub(crate) fn synopsis_heights(low: u64, reference: u64, count_after: u64) -> Vec<u64> {
    let true_high = reference.saturating_add(count_after);
    let mut heights = Vec::new();
    let mut height = low;
    while height <= reference {
        heights.push(height);
        height += ((true_high - height + 2) / 2).max(1);
    }
    if heights.last() != Some(&reference) {
        heights.push(reference);
    }
    heights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spacing_is_denser_near_the_reference_point() {
        let heights = synopsis_heights(1, 100, 0);
        assert_eq!(heights, vec![1, 51, 76, 89, 95, 98, 100]);
    }

    #[test]
    fn reference_point_is_always_last() {
        assert_eq!(synopsis_heights(40, 40, 10), vec![40]);
        assert_eq!(synopsis_heights(50, 40, 10), vec![40]);
        assert_eq!(*synopsis_heights(1, 40, 60).last().unwrap(), 40);
    }
}
