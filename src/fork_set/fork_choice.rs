/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable policy deciding which branch of the fork set is the main branch.
//!
//! Which fork is canonical is decided by consensus, outside of this crate. The fork set only asks a
//! [`ForkChoice`], every time a block is pushed, whether the new block should become the head.

use crate::types::block::Block;

pub trait ForkChoice: Send + Sync {
    /// Whether `candidate` should replace `head` as the head of the main branch.
    fn prefer(&self, candidate: &Block, head: &Block) -> bool;
}

/// Prefers the block with the strictly greater height. Ties keep the current head.
#[derive(Clone, Copy, Debug, Default)]
pub struct HighestBlock;

impl ForkChoice for HighestBlock {
    fn prefer(&self, candidate: &Block, head: &Block) -> bool {
        candidate.height > head.height
    }
}
