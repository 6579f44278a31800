/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-level change record kept by a [`RecordIndex`](super::RecordIndex) for each open undo
//! session.
//!
//! An [`UndoState`] remembers just enough to revert one nesting level:
//! - `new_ids`: the identities of records created at this level,
//! - `old_values`: the pre-image of every pre-existing record modified at this level, captured the first
//!   time it was modified,
//! - `removed_values`: the pre-image of every pre-existing record removed at this level.
//!
//! A record appears in at most one of these three collections. The identity counter is not part of an
//! undo state: reverting a level never rewinds it, so identities issued at a reverted level are
//! never issued again.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};

use super::record::Record;
use crate::types::data_types::{RecordId, Revision};

pub(crate) struct UndoState<R: Record> {
    pub(crate) revision: Revision,
    pub(crate) new_ids: BTreeSet<RecordId>,
    pub(crate) old_values: BTreeMap<RecordId, R>,
    pub(crate) removed_values: BTreeMap<RecordId, R>,
}

impl<R: Record> UndoState<R> {
    pub(crate) fn new(revision: Revision) -> Self {
        Self {
            revision,
            new_ids: BTreeSet::new(),
            old_values: BTreeMap::new(),
            removed_values: BTreeMap::new(),
        }
    }

    pub(crate) fn on_create(&mut self, id: RecordId) {
        self.new_ids.insert(id);
    }

    pub(crate) fn on_modify(&mut self, old: &R) {
        let id = old.id();
        if self.new_ids.contains(&id) || self.old_values.contains_key(&id) {
            return;
        }
        self.old_values.insert(id, old.clone());
    }

    pub(crate) fn on_remove(&mut self, old: R) {
        let id = old.id();
        if self.new_ids.remove(&id) {
            return;
        }
        if let Some(original) = self.old_values.remove(&id) {
            self.removed_values.insert(id, original);
            return;
        }
        self.removed_values.entry(id).or_insert(old);
    }

    /// Fold `child`, the level directly above this one, into this level, so that reverting this
    /// level afterwards reverts the combined effect of both.
    pub(crate) fn absorb(&mut self, child: UndoState<R>) {
        for (id, old) in child.old_values {
            if self.new_ids.contains(&id) || self.old_values.contains_key(&id) {
                continue;
            }
            self.old_values.insert(id, old);
        }

        self.new_ids.extend(child.new_ids);

        for (id, old) in child.removed_values {
            if self.new_ids.remove(&id) {
                continue;
            }
            if let Some(original) = self.old_values.remove(&id) {
                self.removed_values.insert(id, original);
                continue;
            }
            self.removed_values.insert(id, old);
        }
    }

    pub(crate) fn to_snapshot(&self) -> std::io::Result<UndoStateSnapshot> {
        Ok(UndoStateSnapshot {
            revision: self.revision,
            new_ids: self.new_ids.iter().copied().collect(),
            old_values: encode_records(self.old_values.values())?,
            removed_values: encode_records(self.removed_values.values())?,
        })
    }

    pub(crate) fn from_snapshot(snapshot: UndoStateSnapshot) -> std::io::Result<Self> {
        Ok(Self {
            revision: snapshot.revision,
            new_ids: snapshot.new_ids.into_iter().collect(),
            old_values: decode_records(&snapshot.old_values)?,
            removed_values: decode_records(&snapshot.removed_values)?,
        })
    }
}

/// The on-disk form of an [`UndoState`]. Records are kept as individually borsh-encoded blobs so
/// that the snapshot type does not depend on the record type.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct UndoStateSnapshot {
    revision: Revision,
    new_ids: Vec<RecordId>,
    old_values: Vec<Vec<u8>>,
    removed_values: Vec<Vec<u8>>,
}

pub(crate) fn encode_records<'a, R: Record>(
    records: impl Iterator<Item = &'a R>,
) -> std::io::Result<Vec<Vec<u8>>> {
    records.map(|record| record.try_to_vec()).collect()
}

pub(crate) fn decode_records<R: Record>(
    encoded: &[Vec<u8>],
) -> std::io::Result<BTreeMap<RecordId, R>> {
    encoded
        .iter()
        .map(|bytes| R::try_from_slice(bytes).map(|record| (record.id(), record)))
        .collect()
}
