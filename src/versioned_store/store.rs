/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`VersionedStore`] type and its type-erased view of the record indices it manages.

use std::{
    any::Any,
    collections::{HashMap, VecDeque},
};

use super::{persistence::Backing, session::Session, StoreError};
use crate::{
    record_index::{index::IndexSnapshot, Record, RecordIndex, RecordIndexError},
    types::data_types::{RecordId, Revision},
};

/// Object-safe view of a [`RecordIndex`] of any record type, used by the store to drive undo states
/// on all of its indices at once.
pub(crate) trait AnyIndex: Send + Sync {
    fn table(&self) -> &'static str;
    fn start_undo_session(&mut self) -> Revision;
    fn undo(&mut self) -> Result<(), RecordIndexError>;
    fn squash(&mut self) -> Result<(), RecordIndexError>;
    fn commit(&mut self, revision: Revision);
    fn set_revision(&mut self, revision: Revision);
    fn clear(&mut self);
    fn to_snapshot(&self) -> std::io::Result<IndexSnapshot>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<R: Record> AnyIndex for RecordIndex<R> {
    fn table(&self) -> &'static str {
        R::TABLE
    }

    fn start_undo_session(&mut self) -> Revision {
        RecordIndex::start_undo_session(self)
    }

    fn undo(&mut self) -> Result<(), RecordIndexError> {
        RecordIndex::undo(self)
    }

    fn squash(&mut self) -> Result<(), RecordIndexError> {
        RecordIndex::squash(self)
    }

    fn commit(&mut self, revision: Revision) {
        RecordIndex::commit(self, revision)
    }

    fn set_revision(&mut self, revision: Revision) {
        RecordIndex::set_revision(self, revision)
    }

    fn clear(&mut self) {
        RecordIndex::clear(self)
    }

    fn to_snapshot(&self) -> std::io::Result<IndexSnapshot> {
        RecordIndex::to_snapshot(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A set of [`RecordIndex`]es with nested undo sessions and a shared revision counter.
///
/// ## Undo states
///
/// Every call to [`start_session`](Self::start_session) opens a new undo state on every registered
/// index simultaneously and increments the revision. Undo states form a strict stack: they can only
/// be reverted ([`undo`](Self::undo)) or merged into their parent ([`squash`](Self::squash)) from the
/// top, and only be made permanent ([`commit`](Self::commit)) from the bottom.
///
/// ## Persistence
///
/// A store created with [`new`](Self::new) lives only in memory. A store created with
/// [`open`](Self::open) is backed by a directory, and [`flush`](Self::flush) writes its full contents,
/// including open undo states, into that directory.
pub struct VersionedStore {
    pub(super) indices: Vec<Box<dyn AnyIndex>>,
    pub(super) revision: Revision,
    pub(super) undo_revisions: VecDeque<Revision>,
    pub(super) unregistered: HashMap<String, IndexSnapshot>,
    pub(super) backing: Option<Backing>,
}

impl VersionedStore {
    /// Create an empty, in-memory store at revision 0.
    pub fn new() -> Self {
        Self {
            indices: Vec::new(),
            revision: Revision::new(0),
            undo_revisions: VecDeque::new(),
            unregistered: HashMap::new(),
            backing: None,
        }
    }

    /* ↓↓↓ Index registration and access ↓↓↓ */

    /// Register a record index for records of type `R`.
    ///
    /// If the store was opened from disk and the persisted state contains a table called `R::TABLE`,
    /// the index is restored from it. Otherwise, an empty index is created at the current revision, in
    /// which case no undo state may be open.
    pub fn add_index<R: Record>(&mut self) -> Result<(), StoreError> {
        if self.indices.iter().any(|index| index.table() == R::TABLE) {
            return Err(StoreError::IndexAlreadyExists { table: R::TABLE });
        }

        let index = match self.unregistered.remove(R::TABLE) {
            Some(snapshot) => {
                RecordIndex::<R>::from_snapshot(snapshot).map_err(StoreError::Deserialize)?
            }
            None => {
                if !self.undo_revisions.is_empty() {
                    return Err(StoreError::UndoStatesOpen {
                        depth: self.undo_revisions.len(),
                    });
                }
                let mut index = RecordIndex::<R>::new();
                index.set_revision(self.revision);
                index
            }
        };
        self.indices.push(Box::new(index));

        Ok(())
    }

    pub fn has_index<R: Record>(&self) -> bool {
        self.indices
            .iter()
            .any(|index| index.as_any().is::<RecordIndex<R>>())
    }

    pub fn index<R: Record>(&self) -> Result<&RecordIndex<R>, StoreError> {
        self.indices
            .iter()
            .find_map(|index| index.as_any().downcast_ref::<RecordIndex<R>>())
            .ok_or(StoreError::IndexNotFound { table: R::TABLE })
    }

    pub fn index_mut<R: Record>(&mut self) -> Result<&mut RecordIndex<R>, StoreError> {
        self.indices
            .iter_mut()
            .find_map(|index| index.as_any_mut().downcast_mut::<RecordIndex<R>>())
            .ok_or(StoreError::IndexNotFound { table: R::TABLE })
    }

    /* ↓↓↓ Record shortcuts ↓↓↓ */

    pub fn insert<R: Record>(&mut self, record: R) -> Result<RecordId, StoreError> {
        Ok(self.index_mut::<R>()?.insert(record)?)
    }

    pub fn modify<R: Record>(
        &mut self,
        id: RecordId,
        mutator: impl FnOnce(&mut R),
    ) -> Result<(), StoreError> {
        Ok(self.index_mut::<R>()?.modify(id, mutator)?)
    }

    pub fn remove<R: Record>(&mut self, id: RecordId) -> Result<R, StoreError> {
        Ok(self.index_mut::<R>()?.remove(id)?)
    }

    pub fn find<R: Record>(&self, id: RecordId) -> Result<Option<&R>, StoreError> {
        Ok(self.index::<R>()?.find(id))
    }

    pub fn get<R: Record>(&self, id: RecordId) -> Result<&R, StoreError> {
        Ok(self.index::<R>()?.get(id)?)
    }

    /* ↓↓↓ Undo states ↓↓↓ */

    /// Open a new undo state on every index and return a handle to it.
    ///
    /// If the handle is dropped without calling [`Session::commit`], [`Session::squash`], or
    /// [`Session::push`], every change made since this call is reverted.
    pub fn start_session(&mut self) -> Session<'_> {
        self.revision = self.revision + 1;
        for index in &mut self.indices {
            index.start_undo_session();
        }
        self.undo_revisions.push_back(self.revision);
        log::debug!("opened undo session at revision {}", self.revision);

        let revision = self.revision;
        Session::new(self, revision)
    }

    /// Revert the most recently opened undo state on every index, then discard it.
    pub fn undo(&mut self) -> Result<(), StoreError> {
        if self.undo_revisions.is_empty() {
            return Err(StoreError::UndoStackUnderflow);
        }
        for index in &mut self.indices {
            index.undo()?;
        }
        self.undo_revisions.pop_back();
        self.revision = Revision::new(self.revision.int().saturating_sub(1));
        log::debug!("undid undo session, revision is now {}", self.revision);

        Ok(())
    }

    /// Merge the most recently opened undo state into its parent on every index.
    pub fn squash(&mut self) -> Result<(), StoreError> {
        if self.undo_revisions.is_empty() {
            return Err(StoreError::UndoStackUnderflow);
        }
        for index in &mut self.indices {
            index.squash()?;
        }
        self.undo_revisions.pop_back();
        self.revision = Revision::new(self.revision.int().saturating_sub(1));

        Ok(())
    }

    /// Make the changes of every undo state opened at or below `revision` permanent.
    pub fn commit(&mut self, revision: Revision) {
        for index in &mut self.indices {
            index.commit(revision);
        }
        while self
            .undo_revisions
            .front()
            .is_some_and(|undo_revision| *undo_revision <= revision)
        {
            self.undo_revisions.pop_front();
        }
    }

    /// Revert every open undo state, restoring the most recently committed state.
    pub fn undo_all(&mut self) -> Result<(), StoreError> {
        while !self.undo_revisions.is_empty() {
            self.undo()?;
        }
        Ok(())
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Overwrite the revision of the store and of every index. Only allowed while no undo state is
    /// open.
    pub fn set_revision(&mut self, revision: Revision) -> Result<(), StoreError> {
        if !self.undo_revisions.is_empty() {
            return Err(StoreError::UndoStatesOpen {
                depth: self.undo_revisions.len(),
            });
        }
        for index in &mut self.indices {
            index.set_revision(revision);
        }
        self.revision = revision;

        Ok(())
    }

    /// Get the number of open undo states.
    pub fn undo_depth(&self) -> usize {
        self.undo_revisions.len()
    }

    /// Remove every record from every index and reset the revision to 0. Only allowed while no undo
    /// state is open.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        if !self.undo_revisions.is_empty() {
            return Err(StoreError::UndoStatesOpen {
                depth: self.undo_revisions.len(),
            });
        }
        for index in &mut self.indices {
            index.clear();
        }
        self.unregistered.clear();
        self.set_revision(Revision::new(0))
    }

    /// Revert undo states from the top of the stack until the undo state at `revision` has been
    /// reverted too.
    pub(super) fn undo_through(&mut self, revision: Revision) -> Result<(), StoreError> {
        while self.revision >= revision {
            self.undo()?;
        }
        Ok(())
    }
}

impl Default for VersionedStore {
    fn default() -> Self {
        Self::new()
    }
}
