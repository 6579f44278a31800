/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Record`] trait, which user types implement to be storable in a
//! [`RecordIndex`](super::RecordIndex), and the types used to declare their secondary orderings.
//!
//! ## Secondary orderings
//!
//! A secondary ordering is declared by a [`SecondaryIndex`], which pairs a name with a key function
//! `fn(&R) -> IndexKey`. Keys are plain byte strings compared lexicographically, so to make composite
//! keys sort like tuples of their components, keys should be built using [`IndexKeyBuilder`], whose
//! encoders are order-preserving:
//!
//! |Encoder|Encoding|
//! |---|---|
//! |[`u64`](IndexKeyBuilder::u64)|8 bytes, big-endian.|
//! |[`i64`](IndexKeyBuilder::i64)|8 bytes, big-endian, sign bit flipped.|
//! |[`bytes`](IndexKeyBuilder::bytes)|Every `0x00` escaped as `0x00 0xFF`, then terminated by `0x00 0x00`.|
//! |[`str`](IndexKeyBuilder::str)|Same as `bytes`, over the UTF-8 encoding.|
//! |[`hash`](IndexKeyBuilder::hash)|The 32 raw bytes.|

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{CryptoHash, RecordId};

/// A value with an immutable identity, owned by a [`RecordIndex`](super::RecordIndex).
///
/// The identity of a record is assigned by the record index when the record is inserted, overwriting
/// whatever `id` the value carried before.
pub trait Record: Clone + BorshSerialize + BorshDeserialize + Send + Sync + 'static {
    /// Name of the table that records of this type are stored in. Must be unique among the record
    /// types registered in a single [`VersionedStore`](crate::versioned_store::VersionedStore).
    const TABLE: &'static str;

    fn id(&self) -> RecordId;

    fn set_id(&mut self, id: RecordId);

    /// The secondary orderings maintained over records of this type.
    fn secondary_indices() -> Vec<SecondaryIndex<Self>> {
        Vec::new()
    }
}

/// Whether two records may share a key in a secondary ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Uniqueness {
    Unique,
    NonUnique,
}

/// Declaration of a secondary ordering over records of type `R`.
pub struct SecondaryIndex<R> {
    pub name: &'static str,
    pub uniqueness: Uniqueness,
    pub key: fn(&R) -> IndexKey,
}

impl<R> SecondaryIndex<R> {
    pub fn unique(name: &'static str, key: fn(&R) -> IndexKey) -> Self {
        Self {
            name,
            uniqueness: Uniqueness::Unique,
            key,
        }
    }

    pub fn non_unique(name: &'static str, key: fn(&R) -> IndexKey) -> Self {
        Self {
            name,
            uniqueness: Uniqueness::NonUnique,
            key,
        }
    }
}

impl<R> Clone for SecondaryIndex<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            uniqueness: self.uniqueness,
            key: self.key,
        }
    }
}

/// A key in a secondary ordering. Compared lexicographically.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(Vec<u8>);

impl IndexKey {
    /// Get a builder for a composite key.
    pub fn builder() -> IndexKeyBuilder {
        IndexKeyBuilder::new()
    }

    /// Get the encoded bytes of this key.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Builds an [`IndexKey`] from a sequence of components, each encoded in an order-preserving way.
#[derive(Clone, Debug, Default)]
pub struct IndexKeyBuilder(Vec<u8>);

impl IndexKeyBuilder {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn i64(mut self, value: i64) -> Self {
        self.0
            .extend_from_slice(&((value as u64) ^ (1 << 63)).to_be_bytes());
        self
    }

    pub fn bytes(mut self, value: &[u8]) -> Self {
        for byte in value {
            self.0.push(*byte);
            if *byte == 0x00 {
                self.0.push(0xFF);
            }
        }
        self.0.extend_from_slice(&[0x00, 0x00]);
        self
    }

    pub fn str(self, value: &str) -> Self {
        self.bytes(value.as_bytes())
    }

    pub fn hash(mut self, value: &CryptoHash) -> Self {
        self.0.extend_from_slice(&value.bytes());
        self
    }

    pub fn id(self, value: RecordId) -> Self {
        self.u64(value.int())
    }

    pub fn build(self) -> IndexKey {
        IndexKey(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_keys_sort_numerically() {
        let keys: Vec<IndexKey> = [-5i64, -1, 0, 1, 42]
            .iter()
            .map(|v| IndexKeyBuilder::new().i64(*v).build())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn composite_byte_keys_sort_like_tuples() {
        let short_then_big = IndexKeyBuilder::new().str("ab").u64(u64::MAX).build();
        let long_then_small = IndexKeyBuilder::new().str("ab\0").u64(0).build();
        let longer = IndexKeyBuilder::new().str("abc").u64(0).build();
        assert!(short_then_big < long_then_small);
        assert!(long_then_small < longer);
    }
}
