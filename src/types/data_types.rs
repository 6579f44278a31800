/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or integers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

/// Number that uniquely identifies a blockchain.
///
/// The chain ID is folded into the [environment fingerprint](crate::versioned_store::persistence)
/// of a persisted store, so that state built for one chain is never opened for another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ChainID(u64);

impl ChainID {
    /// Create a new `ChainID` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `ChainID`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Height of a block.
///
/// The first block of a chain has height 1. Height 0 is never stored anywhere and is used to denote
/// "before genesis", e.g., the height of an empty block log.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(u64);

impl BlockHeight {
    /// Create a new `BlockHeight` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// The height "before genesis".
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Get the inner `u64` value of this `BlockHeight`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the little-endian representation of the inner `u64` value of this `BlockHeight`.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Get the height directly below this one, saturating at zero.
    pub fn prev(&self) -> BlockHeight {
        BlockHeight(self.0.saturating_sub(1))
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl AddAssign<u64> for BlockHeight {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0.add(rhs))
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u64;
    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0 - rhs.0
    }
}

/// 32-byte cryptographic hash.
///
/// Block identities are always SHA256 hashes of the block header. See
/// [`Block::hash_header`](super::block::Block::hash_header).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zeroes hash, used as the `previous` link of the first block of a chain.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoHash({})", self)
    }
}

/// Ed25519 digital signature.
///
/// Within this crate, these are produced using the [`ed25519_dalek`] crate, whose main definitions are
/// re-exported from the [`crypto_primitives`](super::crypto_primitives) module.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({})", STANDARD_NO_PAD.encode(self.0))
    }
}

/// Identity of a record inside a [`RecordIndex`](crate::record_index::RecordIndex).
///
/// Identities are issued by each record index in increasing order starting from 0, and are never
/// reissued, not even after the record they identified was removed or an undo session was reverted.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct RecordId(u64);

impl RecordId {
    /// Create a new `RecordId` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `RecordId`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the identity that will be issued after this one.
    pub(crate) fn next(&self) -> RecordId {
        RecordId(self.0 + 1)
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Version number of a [`VersionedStore`](crate::versioned_store::VersionedStore).
///
/// Increases by 1 every time an undo session is opened, and goes back down when an undo session is
/// undone or squashed into its parent. After a reindex, the revision is aligned with the height of
/// the last replayed block.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Revision(u64);

impl Revision {
    /// Create a new `Revision` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Revision`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Revision {
    type Output = Revision;
    fn add(self, rhs: u64) -> Self::Output {
        Revision(self.0 + rhs)
    }
}

impl From<BlockHeight> for Revision {
    fn from(height: BlockHeight) -> Self {
        Revision(height.int())
    }
}

/// Opaque transaction payload carried inside a [`Block`](super::block::Block).
///
/// This crate never interprets transactions; that is the job of the block application callback.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Transaction(Vec<u8>);

impl Transaction {
    /// Create a new `Transaction` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner bytes of this `Transaction`.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}
