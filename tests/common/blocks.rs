//! Signed test blocks.

use chainstate_rs::types::{
    block::Block,
    crypto_primitives::SigningKey,
    data_types::{BlockHeight, CryptoHash, Transaction},
};
use rand_core::OsRng;

/// Produces blocks signed by one randomly generated witness.
pub(crate) struct BlockFactory {
    witness: SigningKey,
}

impl BlockFactory {
    pub(crate) fn new() -> BlockFactory {
        let mut csprg = OsRng {};
        BlockFactory {
            witness: SigningKey::generate(&mut csprg),
        }
    }

    pub(crate) fn genesis(&self, transactions: &[&str]) -> Block {
        Block::new(
            BlockHeight::new(1),
            CryptoHash::zero(),
            0,
            to_transactions(transactions),
            &self.witness,
        )
    }

    /// Create a child of `parent`. Children of the same parent created with different `salt`s have
    /// different hashes.
    pub(crate) fn child(&self, parent: &Block, salt: u64, transactions: &[&str]) -> Block {
        Block::new(
            parent.height + 1,
            parent.hash,
            parent.timestamp + 1 + salt * 1_000_000,
            to_transactions(transactions),
            &self.witness,
        )
    }

    /// Create a chain of `len` blocks starting at genesis. Block `n` credits the account called
    /// `acct{n % 5}`.
    pub(crate) fn chain(&self, len: u64) -> Vec<Block> {
        let mut blocks = vec![self.genesis(&["acct1"])];
        blocks.extend(self.extend(&blocks[0], len.saturating_sub(1), 0));
        blocks.truncate(len as usize);
        blocks
    }

    /// Create `len` blocks on top of `parent`, each crediting the account `acct{height % 5}`.
    pub(crate) fn extend(&self, parent: &Block, len: u64, salt: u64) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for _ in 0..len {
            let parent = blocks.last().unwrap_or(parent);
            let name = format!("acct{}", (parent.height.int() + 1) % 5);
            let block = self.child(parent, salt, &[name.as_str()]);
            blocks.push(block);
        }
        blocks
    }
}

fn to_transactions(transactions: &[&str]) -> Vec<Transaction> {
    transactions
        .iter()
        .map(|transaction| Transaction::new(transaction.as_bytes().to_vec()))
        .collect()
}
