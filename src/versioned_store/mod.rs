/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A set of record indices with nested, reversible undo sessions.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = VersionedStore::new();
//! store.add_index::<Account>()?;
//!
//! let mut session = store.start_session();
//! let id = session.insert(Account::new("alice", 100))?;
//! session.modify::<Account>(id, |account| account.balance += 10)?;
//!
//! // Dropping `session` here instead would revert both mutations.
//! session.push();
//! ```
//!
//! ## Failure semantics
//!
//! Errors that mean the store can no longer be trusted, e.g., a secondary ordering disagreeing with its
//! primary map, are reported as errors for which [`StoreError::is_fatal`] returns `true`. A session
//! that hits such an error while being reverted on drop panics.

use std::{
    fmt::{self, Display, Formatter},
    path::PathBuf,
};

use crate::{
    record_index::RecordIndexError,
    types::data_types::{CryptoHash, Revision},
};

pub mod store;

pub mod session;

pub mod persistence;

pub mod shared;

pub use persistence::EnvironmentFingerprint;
pub use session::Session;
pub use shared::SharedStore;
pub use store::VersionedStore;

/// Errors that may be encountered when operating a [`VersionedStore`].
#[derive(Debug)]
pub enum StoreError {
    /// See: [`RecordIndexError`].
    RecordIndexError(RecordIndexError),

    /// No record index is registered for `table`.
    IndexNotFound { table: &'static str },

    /// A record index for `table` is already registered.
    IndexAlreadyExists { table: &'static str },

    /// An undo operation was attempted with no open undo state.
    UndoStackUnderflow,

    /// A session tried to squash while it was not the innermost undo state.
    SessionOutOfOrder { session: Revision, top: Revision },

    /// The operation requires that no undo state be open, but `depth` are.
    UndoStatesOpen { depth: usize },

    /// The persisted state was written by an environment whose fingerprint digest is `found`, but the
    /// running environment's is `expected`.
    IncompatibleEnvironment {
        expected: CryptoHash,
        found: CryptoHash,
    },

    /// Writing the state requires `required` bytes, but only `available` may be used.
    InsufficientSpace { required: u64, available: u64 },

    /// The backing directory is locked by another store.
    LockUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The persisted state is malformed.
    Deserialize(std::io::Error),

    /// A thread panicked while holding the store's lock.
    LockPoisoned,

    Io(std::io::Error),
}

impl StoreError {
    /// Whether this error indicates corruption or an incompatible environment, in which case the
    /// store must not be used further.
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::RecordIndexError(err) => err.is_fatal(),
            StoreError::IncompatibleEnvironment { .. }
            | StoreError::Deserialize(_)
            | StoreError::LockPoisoned => true,
            _ => false,
        }
    }
}

impl From<RecordIndexError> for StoreError {
    fn from(value: RecordIndexError) -> Self {
        StoreError::RecordIndexError(value)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        StoreError::Io(value)
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::RecordIndexError(err) => write!(f, "{}", err),
            StoreError::IndexNotFound { table } => write!(f, "no index registered for table {}", table),
            StoreError::IndexAlreadyExists { table } => {
                write!(f, "an index is already registered for table {}", table)
            }
            StoreError::UndoStackUnderflow => write!(f, "no undo state to revert"),
            StoreError::SessionOutOfOrder { session, top } => write!(
                f,
                "session {} is not the innermost undo state (top is {})",
                session, top
            ),
            StoreError::UndoStatesOpen { depth } => {
                write!(f, "operation not allowed with {} open undo states", depth)
            }
            StoreError::IncompatibleEnvironment { expected, found } => write!(
                f,
                "persisted state fingerprint {} does not match environment fingerprint {}",
                found, expected
            ),
            StoreError::InsufficientSpace {
                required,
                available,
            } => write!(
                f,
                "state requires {} bytes but only {} are available",
                required, available
            ),
            StoreError::LockUnavailable { path, source } => {
                write!(f, "cannot lock {}: {}", path.display(), source)
            }
            StoreError::Deserialize(err) => write!(f, "malformed persisted state: {}", err),
            StoreError::LockPoisoned => write!(f, "store lock poisoned"),
            StoreError::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::RecordIndexError(err) => Some(err),
            StoreError::LockUnavailable { source, .. } => Some(source),
            StoreError::Deserialize(err) | StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}
