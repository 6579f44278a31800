/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Durable backing for a [`VersionedStore`].
//!
//! A persistent store lives in a directory containing two files:
//! - `LOCK`: held under an exclusive OS lock for as long as the store is open, so that no two
//!   processes ever open the same store.
//! - `state.bin`: the full contents of the store as of the last [`flush`](VersionedStore::flush).
//!
//! ## `state.bin` format
//!
//! |Bytes|Contents|
//! |---|---|
//! |8|The magic bytes `CHNSTATE`.|
//! |variable|Borsh encoding of the store: environment fingerprint, revision, open undo revisions, and one snapshot per index (records plus undo stack).|
//! |4|CRC32 of the borsh encoding, little-endian.|
//!
//! `state.bin` is always replaced atomically: the new contents are written to `state.bin.tmp`, synced,
//! and then renamed over the old file.
//!
//! ## Environment fingerprint
//!
//! The layout of the persisted state depends on the crate version, the encoding format, and the chain
//! it was built for. These are captured in an [`EnvironmentFingerprint`] which is stored alongside the
//! state and compared on open. Opening a store whose fingerprint differs from the running
//! environment's fails with `IncompatibleEnvironment`.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use borsh::{BorshDeserialize, BorshSerialize};
use fs2::FileExt;

use super::{store::VersionedStore, StoreError};
use crate::{
    record_index::index::IndexSnapshot,
    types::{
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{ChainID, CryptoHash, Revision},
    },
};

const MAGIC: &[u8; 8] = b"CHNSTATE";
const FORMAT_VERSION: u32 = 2;
const STATE_FILE: &str = "state.bin";
const STATE_TEMP_FILE: &str = "state.bin.tmp";
const LOCK_FILE: &str = "LOCK";

/// Properties of the running environment that the persisted layout depends on.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EnvironmentFingerprint {
    pub crate_version: String,
    pub format_version: u32,
    pub pointer_width: u8,
    pub little_endian: bool,
    pub chain_id: ChainID,
}

impl EnvironmentFingerprint {
    /// Get the fingerprint of the running environment for `chain_id`.
    pub fn current(chain_id: ChainID) -> Self {
        Self {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            format_version: FORMAT_VERSION,
            pointer_width: (usize::BITS / 8) as u8,
            little_endian: cfg!(target_endian = "little"),
            chain_id,
        }
    }

    /// Get the SHA256 digest of this fingerprint.
    pub fn digest(&self) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(self.crate_version.as_bytes());
        hasher.update(self.format_version.to_le_bytes());
        hasher.update([self.pointer_width, self.little_endian as u8]);
        hasher.update(self.chain_id.int().to_le_bytes());
        CryptoHash::new(hasher.finalize().into())
    }
}

#[derive(BorshSerialize, BorshDeserialize)]
struct PersistedState {
    fingerprint: EnvironmentFingerprint,
    revision: Revision,
    undo_revisions: Vec<Revision>,
    indices: Vec<IndexSnapshot>,
}

/// The directory and lock held by an open, persistent store.
pub(crate) struct Backing {
    dir: PathBuf,
    fingerprint: EnvironmentFingerprint,
    max_size: u64,
    // Dropping this file releases the lock.
    _lock: File,
}

impl VersionedStore {
    /// Open the persistent store in `dir`, creating it if it does not exist.
    ///
    /// Fails with `LockUnavailable` if another store holds `dir` open, and with
    /// `IncompatibleEnvironment` if `dir` was written by an incompatible environment. The persisted
    /// indices are restored lazily, as their record types are registered with
    /// [`add_index`](VersionedStore::add_index).
    pub fn open(dir: &Path, chain_id: ChainID, max_backing_size: u64) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|source| StoreError::LockUnavailable {
                path: lock_path,
                source,
            })?;

        let fingerprint = EnvironmentFingerprint::current(chain_id);
        let mut store = VersionedStore::new();

        let state_path = dir.join(STATE_FILE);
        if state_path.exists() {
            let persisted = read_state_file(&state_path)?;
            if persisted.fingerprint != fingerprint {
                return Err(StoreError::IncompatibleEnvironment {
                    expected: fingerprint.digest(),
                    found: persisted.fingerprint.digest(),
                });
            }
            store.revision = persisted.revision;
            store.undo_revisions = persisted.undo_revisions.into_iter().collect();
            store.unregistered = persisted
                .indices
                .into_iter()
                .map(|snapshot| (snapshot.table.clone(), snapshot))
                .collect();
            log::info!(
                "opened versioned store in {} at revision {}",
                dir.display(),
                store.revision
            );
        } else {
            log::info!("created versioned store in {}", dir.display());
        }

        store.backing = Some(Backing {
            dir: dir.to_path_buf(),
            fingerprint,
            max_size: max_backing_size,
            _lock: lock,
        });

        Ok(store)
    }

    /// Check whether this store is backed by a directory.
    pub fn is_persistent(&self) -> bool {
        self.backing.is_some()
    }

    /// Write the full contents of this store into its backing directory. Does nothing for an
    /// in-memory store.
    ///
    /// Fails with `InsufficientSpace`, leaving the previously flushed state intact, if the encoded
    /// state exceeds the configured maximum backing size or the free space on the file system.
    pub fn flush(&self) -> Result<(), StoreError> {
        let backing = match &self.backing {
            Some(backing) => backing,
            None => return Ok(()),
        };

        let mut indices = self
            .indices
            .iter()
            .map(|index| index.to_snapshot())
            .collect::<std::io::Result<Vec<_>>>()?;
        for snapshot in self.unregistered.values() {
            indices.push(snapshot.clone());
        }
        let persisted = PersistedState {
            fingerprint: backing.fingerprint.clone(),
            revision: self.revision,
            undo_revisions: self.undo_revisions.iter().copied().collect(),
            indices,
        };
        let body = persisted.try_to_vec()?;

        let required = (MAGIC.len() + body.len() + 4) as u64;
        if required > backing.max_size {
            return Err(StoreError::InsufficientSpace {
                required,
                available: backing.max_size,
            });
        }
        let available = fs2::available_space(&backing.dir)?;
        if required > available {
            return Err(StoreError::InsufficientSpace {
                required,
                available,
            });
        }

        let temp_path = backing.dir.join(STATE_TEMP_FILE);
        let mut temp = File::create(&temp_path)?;
        temp.write_all(MAGIC)?;
        temp.write_all(&body)?;
        temp.write_all(&crc32fast::hash(&body).to_le_bytes())?;
        temp.sync_all()?;
        fs::rename(&temp_path, backing.dir.join(STATE_FILE))?;
        sync_dir(&backing.dir)?;

        log::debug!(
            "flushed versioned store at revision {} ({} bytes)",
            self.revision,
            required
        );

        Ok(())
    }

    /// Flush this store and release its backing directory.
    pub fn close(self) -> Result<(), StoreError> {
        self.flush()
    }
}

fn read_state_file(path: &Path) -> Result<PersistedState, StoreError> {
    let bytes = fs::read(path)?;
    if bytes.len() < MAGIC.len() + 4 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(invalid_data("state file has no valid header"));
    }
    let (body, checksum) = bytes[MAGIC.len()..].split_at(bytes.len() - MAGIC.len() - 4);
    let mut checksum_bytes = [0u8; 4];
    checksum_bytes.copy_from_slice(checksum);
    if crc32fast::hash(body) != u32::from_le_bytes(checksum_bytes) {
        return Err(invalid_data("state file checksum mismatch"));
    }
    PersistedState::try_from_slice(body).map_err(StoreError::Deserialize)
}

fn invalid_data(message: &str) -> StoreError {
    StoreError::Deserialize(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message.to_string(),
    ))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
