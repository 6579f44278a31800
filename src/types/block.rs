/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the `Block` type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{CryptoHasher, Digest, Signature, Signer, SigningKey, Verifier, VerifyingKey},
    data_types::{BlockHeight, CryptoHash, SignatureBytes, Transaction},
};

/// A block, as stored in the [fork set](crate::fork_set) while reversible and in the
/// [block log](crate::block_log) once irreversible.
///
/// `hash` identifies the block and is computed over the header fields only (see
/// [`hash_header`](Self::hash_header)). The transactions are committed to through
/// `transactions_root`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub height: BlockHeight,
    pub hash: CryptoHash,
    pub previous: CryptoHash,
    pub timestamp: u64,
    pub witness: [u8; 32],
    pub transactions_root: CryptoHash,
    pub transactions: Vec<Transaction>,
    pub witness_signature: SignatureBytes,
}

impl Block {
    /// Create a block on top of `previous`, produced and signed by `witness`.
    pub fn new(
        height: BlockHeight,
        previous: CryptoHash,
        timestamp: u64,
        transactions: Vec<Transaction>,
        witness: &SigningKey,
    ) -> Block {
        let transactions_root = Block::transactions_root(&transactions);
        let witness_bytes = witness.verifying_key().to_bytes();
        let hash = Block::hash_header(height, &previous, timestamp, &witness_bytes, &transactions_root);
        let witness_signature = SignatureBytes::new(witness.sign(&hash.bytes()).to_bytes());

        Block {
            height,
            hash,
            previous,
            timestamp,
            witness: witness_bytes,
            transactions_root,
            transactions,
            witness_signature,
        }
    }

    /// Re-sign this block with `witness`, replacing its witness, hash, and signature.
    pub fn sign(&mut self, witness: &SigningKey) {
        self.witness = witness.verifying_key().to_bytes();
        self.hash = Block::hash_header(
            self.height,
            &self.previous,
            self.timestamp,
            &self.witness,
            &self.transactions_root,
        );
        self.witness_signature = SignatureBytes::new(witness.sign(&self.hash.bytes()).to_bytes());
    }

    /// Compute the identity of a block from its header fields.
    pub fn hash_header(
        height: BlockHeight,
        previous: &CryptoHash,
        timestamp: u64,
        witness: &[u8; 32],
        transactions_root: &CryptoHash,
    ) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(height.to_le_bytes());
        hasher.update(previous.bytes());
        hasher.update(timestamp.to_le_bytes());
        hasher.update(witness);
        hasher.update(transactions_root.bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Compute the root committing to `transactions`: a SHA256 over each transaction's length and
    /// bytes, in order.
    pub fn transactions_root(transactions: &[Transaction]) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        for transaction in transactions {
            hasher.update((transaction.bytes().len() as u64).to_le_bytes());
            hasher.update(transaction.bytes());
        }
        CryptoHash::new(hasher.finalize().into())
    }

    /// Checks whether `hash` matches the header fields.
    pub fn is_hash_correct(&self) -> bool {
        self.hash
            == Block::hash_header(
                self.height,
                &self.previous,
                self.timestamp,
                &self.witness,
                &self.transactions_root,
            )
    }

    /// Checks whether `transactions_root` matches `transactions`.
    pub fn is_transactions_root_correct(&self) -> bool {
        self.transactions_root == Block::transactions_root(&self.transactions)
    }

    /// Checks whether `witness_signature` is a valid signature by `witness` over `hash`.
    pub fn is_signature_correct(&self) -> bool {
        match VerifyingKey::from_bytes(&self.witness) {
            Ok(verifying_key) => {
                let signature = Signature::from_bytes(&self.witness_signature.bytes());
                verifying_key.verify(&self.hash.bytes(), &signature).is_ok()
            }
            Err(_) => false,
        }
    }
}
