/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed, multi-ordered record tables.
//!
//! A [`RecordIndex`] owns every record of one [`Record`] type. Records are addressed only by their
//! [identity](crate::types::data_types::RecordId): callers get shared references scoped to a borrow
//! of the index, or owned copies, but never a long-lived handle to a record's storage.
//!
//! Record indices are not normally used on their own. Instead, they are registered in a
//! [`VersionedStore`](crate::versioned_store::VersionedStore), which opens and closes undo states on
//! all of its indices simultaneously.

use std::fmt::{self, Display, Formatter};

use crate::types::data_types::RecordId;

pub mod record;

pub mod index;

pub(crate) mod undo_state;

pub use index::RecordIndex;
pub use record::{IndexKey, IndexKeyBuilder, Record, SecondaryIndex, Uniqueness};

/// Errors that may be encountered when reading from or mutating a [`RecordIndex`].
#[derive(Debug)]
pub enum RecordIndexError {
    /// There is no record with identity `id` in `table`.
    KeyNotFound { table: &'static str, id: RecordId },

    /// The mutation would give a record the same key as record `existing` in the unique secondary
    /// ordering `index`. The index was left unchanged.
    ConstraintViolation {
        table: &'static str,
        index: &'static str,
        existing: RecordId,
    },

    /// A `modify` mutator tried to change the identity of record `id`. The index was left unchanged.
    IdentityChanged { table: &'static str, id: RecordId },

    /// `table` does not declare a secondary ordering called `index`.
    UnknownSecondaryIndex { table: &'static str, index: String },

    /// An undo operation was attempted on `table`, but it has no open undo state.
    UndoStackUnderflow { table: &'static str },

    /// A secondary ordering of `table` disagrees with its primary map. This can only happen through a
    /// bug, and leaves the index in an unknown state.
    IndexCorrupted {
        table: &'static str,
        detail: &'static str,
    },
}

impl RecordIndexError {
    /// Whether this error indicates that the index can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecordIndexError::UndoStackUnderflow { .. } | RecordIndexError::IndexCorrupted { .. }
        )
    }
}

impl Display for RecordIndexError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RecordIndexError::KeyNotFound { table, id } => {
                write!(f, "no record with id {} in table {}", id, table)
            }
            RecordIndexError::ConstraintViolation {
                table,
                index,
                existing,
            } => write!(
                f,
                "unique ordering {} of table {} already holds record {}",
                index, table, existing
            ),
            RecordIndexError::IdentityChanged { table, id } => {
                write!(f, "attempted to change the id of record {} in table {}", id, table)
            }
            RecordIndexError::UnknownSecondaryIndex { table, index } => {
                write!(f, "table {} has no secondary ordering {}", table, index)
            }
            RecordIndexError::UndoStackUnderflow { table } => {
                write!(f, "table {} has no undo state to revert", table)
            }
            RecordIndexError::IndexCorrupted { table, detail } => {
                write!(f, "table {} is corrupted: {}", table, detail)
            }
        }
    }
}

impl std::error::Error for RecordIndexError {}
