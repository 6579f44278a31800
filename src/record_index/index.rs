/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`RecordIndex`] type: a typed table with one primary ordering and any number of secondary
//! orderings, plus the undo stack that makes its mutations reversible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    record::{IndexKey, Record, SecondaryIndex, Uniqueness},
    undo_state::{decode_records, encode_records, UndoState, UndoStateSnapshot},
    RecordIndexError,
};
use crate::types::data_types::{RecordId, Revision};

/// A typed collection of records with a primary ordering by [`RecordId`] and the secondary orderings
/// declared by [`Record::secondary_indices`].
///
/// Every mutation is observed by the innermost open undo state (if any) before it takes effect. If no
/// undo state is open, mutations are permanent immediately.
pub struct RecordIndex<R: Record> {
    records: BTreeMap<RecordId, R>,
    secondaries: Vec<SecondaryOrdering<R>>,
    next_id: RecordId,
    revision: Revision,
    stack: VecDeque<UndoState<R>>,
}

struct SecondaryOrdering<R> {
    declaration: SecondaryIndex<R>,
    entries: BTreeMap<IndexKey, BTreeSet<RecordId>>,
}

impl<R: Record> RecordIndex<R> {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            secondaries: R::secondary_indices()
                .into_iter()
                .map(|declaration| SecondaryOrdering {
                    declaration,
                    entries: BTreeMap::new(),
                })
                .collect(),
            next_id: RecordId::new(0),
            revision: Revision::new(0),
            stack: VecDeque::new(),
        }
    }

    /* ↓↓↓ Queries ↓↓↓ */

    pub fn find(&self, id: RecordId) -> Option<&R> {
        self.records.get(&id)
    }

    /// Like [`find`](Self::find), but fails with `KeyNotFound` if there is no record with `id`.
    pub fn get(&self, id: RecordId) -> Result<&R, RecordIndexError> {
        self.records.get(&id).ok_or(RecordIndexError::KeyNotFound {
            table: R::TABLE,
            id,
        })
    }

    /// Find the record with `key` in the secondary ordering called `index`. If the ordering is
    /// non-unique, returns the record with the lowest identity among those with `key`.
    pub fn find_by(&self, index: &str, key: &IndexKey) -> Result<Option<&R>, RecordIndexError> {
        let ordering = self.secondary(index)?;
        Ok(ordering
            .entries
            .get(key)
            .and_then(|ids| ids.iter().next())
            .and_then(|id| self.records.get(id)))
    }

    /// Find every record with `key` in the secondary ordering called `index`, in identity order.
    pub fn find_all_by(&self, index: &str, key: &IndexKey) -> Result<Vec<&R>, RecordIndexError> {
        let ordering = self.secondary(index)?;
        Ok(ordering
            .entries
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
            .collect())
    }

    /// Iterate through all records in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &R> + '_ {
        self.records.values()
    }

    /// Iterate through all records in the order of the secondary ordering called `index`. Records
    /// with equal keys are visited in identity order.
    pub fn iter_by(&self, index: &str) -> Result<impl Iterator<Item = &R> + '_, RecordIndexError> {
        let ordering = self.secondary(index)?;
        Ok(ordering
            .entries
            .values()
            .flatten()
            .filter_map(|id| self.records.get(id)))
    }

    /// Iterate through the records whose key in the secondary ordering called `index` lies in the
    /// half-open range `[lower, upper)`.
    pub fn range_by(
        &self,
        index: &str,
        lower: &IndexKey,
        upper: &IndexKey,
    ) -> Result<impl Iterator<Item = &R> + '_, RecordIndexError> {
        let ordering = self.secondary(index)?;
        let range = if lower < upper {
            Some(ordering.entries.range(lower.clone()..upper.clone()))
        } else {
            None
        };
        Ok(range
            .into_iter()
            .flatten()
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.records.get(id)))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get the identity that the next inserted record will receive.
    pub fn next_id(&self) -> RecordId {
        self.next_id
    }

    /* ↓↓↓ Mutations ↓↓↓ */

    /// Insert `record`, assigning it the next identity, and return that identity.
    ///
    /// Fails with `ConstraintViolation`, leaving the index unchanged, if `record` collides with an
    /// existing record in a unique secondary ordering.
    pub fn insert(&mut self, mut record: R) -> Result<RecordId, RecordIndexError> {
        let id = self.next_id;
        record.set_id(id);
        self.check_unique_constraints(&record)?;

        if let Some(head) = self.stack.back_mut() {
            head.on_create(id);
        }
        self.link(&record);
        self.records.insert(id, record);
        self.next_id = id.next();

        Ok(id)
    }

    /// Apply `mutator` to the record with `id`.
    ///
    /// Fails with `KeyNotFound` if there is no such record, with `IdentityChanged` if `mutator`
    /// changed the record's identity, and with `ConstraintViolation` if the modified record collides
    /// with another record in a unique secondary ordering. In all three cases the index is unchanged.
    pub fn modify(
        &mut self,
        id: RecordId,
        mutator: impl FnOnce(&mut R),
    ) -> Result<(), RecordIndexError> {
        let old = self.get(id)?.clone();
        let mut new = old.clone();
        mutator(&mut new);
        if new.id() != id {
            return Err(RecordIndexError::IdentityChanged {
                table: R::TABLE,
                id,
            });
        }
        self.check_unique_constraints(&new)?;

        if let Some(head) = self.stack.back_mut() {
            head.on_modify(&old);
        }
        self.unlink(&old)?;
        self.link(&new);
        self.records.insert(id, new);

        Ok(())
    }

    /// Remove the record with `id` and return it. Its identity is never issued again.
    pub fn remove(&mut self, id: RecordId) -> Result<R, RecordIndexError> {
        let old = self.records.remove(&id).ok_or(RecordIndexError::KeyNotFound {
            table: R::TABLE,
            id,
        })?;
        self.unlink(&old)?;
        if let Some(head) = self.stack.back_mut() {
            head.on_remove(old.clone());
        }

        Ok(old)
    }

    /* ↓↓↓ Undo stack ↓↓↓ */

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn undo_depth(&self) -> usize {
        self.stack.len()
    }

    /// Open a new undo state and return the revision it represents.
    pub(crate) fn start_undo_session(&mut self) -> Revision {
        self.revision = self.revision + 1;
        self.stack.push_back(UndoState::new(self.revision));
        self.revision
    }

    /// Revert the innermost undo state, then discard it.
    pub(crate) fn undo(&mut self) -> Result<(), RecordIndexError> {
        let state = self.stack.pop_back().ok_or(RecordIndexError::UndoStackUnderflow {
            table: R::TABLE,
        })?;

        for id in &state.new_ids {
            let created = self.records.remove(id).ok_or(RecordIndexError::IndexCorrupted {
                table: R::TABLE,
                detail: "record created in undo state is missing",
            })?;
            self.unlink(&created)?;
        }

        // Unlink every modified record before relinking any, so that records which swapped unique
        // keys within this level never appear to collide.
        for id in state.old_values.keys() {
            let current = self.records.remove(id).ok_or(RecordIndexError::IndexCorrupted {
                table: R::TABLE,
                detail: "record modified in undo state is missing",
            })?;
            self.unlink(&current)?;
        }
        for (id, old) in state.old_values {
            self.link(&old);
            self.records.insert(id, old);
        }

        for (id, old) in state.removed_values {
            self.link(&old);
            self.records.insert(id, old);
        }

        self.revision = Revision::new(self.revision.int().saturating_sub(1));

        Ok(())
    }

    /// Merge the innermost undo state into its parent. If there is no parent, the innermost undo state
    /// is discarded, which makes its changes permanent.
    pub(crate) fn squash(&mut self) -> Result<(), RecordIndexError> {
        let state = self.stack.pop_back().ok_or(RecordIndexError::UndoStackUnderflow {
            table: R::TABLE,
        })?;
        if let Some(parent) = self.stack.back_mut() {
            parent.absorb(state);
        }
        self.revision = Revision::new(self.revision.int().saturating_sub(1));

        Ok(())
    }

    /// Discard every undo state whose revision is at most `revision`, making their changes
    /// permanent.
    pub(crate) fn commit(&mut self, revision: Revision) {
        while self
            .stack
            .front()
            .is_some_and(|state| state.revision <= revision)
        {
            self.stack.pop_front();
        }
    }

    pub(crate) fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }

    /// Remove every record and undo state, returning the index to its freshly created state.
    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.stack.clear();
        self.next_id = RecordId::new(0);
        for ordering in &mut self.secondaries {
            ordering.entries.clear();
        }
    }

    /* ↓↓↓ Persistence ↓↓↓ */

    pub(crate) fn to_snapshot(&self) -> std::io::Result<IndexSnapshot> {
        Ok(IndexSnapshot {
            table: R::TABLE.to_string(),
            next_id: self.next_id,
            revision: self.revision,
            records: encode_records(self.records.values())?,
            stack: self
                .stack
                .iter()
                .map(|state| state.to_snapshot())
                .collect::<std::io::Result<Vec<_>>>()?,
        })
    }

    /// Rebuild an index, including its secondary orderings, from a snapshot.
    pub(crate) fn from_snapshot(snapshot: IndexSnapshot) -> std::io::Result<Self> {
        let mut index = Self::new();
        for (id, record) in decode_records::<R>(&snapshot.records)? {
            if index.check_unique_constraints(&record).is_err() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("duplicate unique key in table {}", R::TABLE),
                ));
            }
            index.link(&record);
            index.records.insert(id, record);
        }
        index.next_id = snapshot.next_id;
        index.revision = snapshot.revision;
        index.stack = snapshot
            .stack
            .into_iter()
            .map(UndoState::from_snapshot)
            .collect::<std::io::Result<VecDeque<_>>>()?;

        Ok(index)
    }

    /* ↓↓↓ Secondary ordering maintenance ↓↓↓ */

    fn secondary(&self, index: &str) -> Result<&SecondaryOrdering<R>, RecordIndexError> {
        self.secondaries
            .iter()
            .find(|ordering| ordering.declaration.name == index)
            .ok_or_else(|| RecordIndexError::UnknownSecondaryIndex {
                table: R::TABLE,
                index: index.to_string(),
            })
    }

    fn check_unique_constraints(&self, record: &R) -> Result<(), RecordIndexError> {
        for ordering in &self.secondaries {
            if ordering.declaration.uniqueness != Uniqueness::Unique {
                continue;
            }
            let key = (ordering.declaration.key)(record);
            if let Some(existing) = ordering
                .entries
                .get(&key)
                .and_then(|ids| ids.iter().find(|id| **id != record.id()))
            {
                return Err(RecordIndexError::ConstraintViolation {
                    table: R::TABLE,
                    index: ordering.declaration.name,
                    existing: *existing,
                });
            }
        }
        Ok(())
    }

    fn link(&mut self, record: &R) {
        for ordering in &mut self.secondaries {
            ordering
                .entries
                .entry((ordering.declaration.key)(record))
                .or_default()
                .insert(record.id());
        }
    }

    fn unlink(&mut self, record: &R) -> Result<(), RecordIndexError> {
        for ordering in &mut self.secondaries {
            let key = (ordering.declaration.key)(record);
            let ids = ordering
                .entries
                .get_mut(&key)
                .ok_or(RecordIndexError::IndexCorrupted {
                    table: R::TABLE,
                    detail: "secondary ordering has no entry for a stored record",
                })?;
            if !ids.remove(&record.id()) {
                return Err(RecordIndexError::IndexCorrupted {
                    table: R::TABLE,
                    detail: "secondary ordering disagrees with the primary map",
                });
            }
            if ids.is_empty() {
                ordering.entries.remove(&key);
            }
        }
        Ok(())
    }
}

impl<R: Record> Default for RecordIndex<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// The on-disk form of a [`RecordIndex`]. Secondary orderings are not stored: they are rebuilt from
/// the records on load.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct IndexSnapshot {
    pub(crate) table: String,
    next_id: RecordId,
    revision: Revision,
    records: Vec<Vec<u8>>,
    stack: Vec<UndoStateSnapshot>,
}
