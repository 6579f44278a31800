/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! RAII handles to undo states.
//!
//! A [`Session`] mutably borrows the [`VersionedStore`] it was opened on and dereferences to it, so all
//! reads and mutations during the session go through the handle. A nested session is opened from the
//! handle of its parent, which means the borrow checker guarantees that sessions are closed in
//! last-opened-first-closed order.
//!
//! Dropping a handle without closing it explicitly reverts the session, exactly like
//! [`Session::undo`]. This makes early returns and panics unable to leak uncommitted changes into the
//! store.

use std::ops::{Deref, DerefMut};

use super::{store::VersionedStore, StoreError};
use crate::types::data_types::Revision;

/// Handle to an open undo state. See the [module-level docs](self).
#[must_use = "dropping a session reverts every change made through it"]
pub struct Session<'a> {
    store: &'a mut VersionedStore,
    revision: Revision,
    open: bool,
}

impl<'a> Session<'a> {
    pub(super) fn new(store: &'a mut VersionedStore, revision: Revision) -> Self {
        Self {
            store,
            revision,
            open: true,
        }
    }

    /// Get the revision that this session opened.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Leave this session's undo state on the store's stack, to be undone or committed later through
    /// [`VersionedStore::undo`] or [`VersionedStore::commit`].
    pub fn push(mut self) {
        self.open = false;
    }

    /// Merge this session into its parent, so that undoing the parent also undoes this session.
    ///
    /// Fails with `SessionOutOfOrder` if this session is no longer the innermost undo state. The
    /// session is then dropped as if it had never been closed, which reverts it.
    pub fn squash(mut self) -> Result<(), StoreError> {
        if self.store.revision() != self.revision {
            return Err(StoreError::SessionOutOfOrder {
                session: self.revision,
                top: self.store.revision(),
            });
        }
        self.open = false;
        self.store.squash()
    }

    /// Revert every change made since this session was opened, including changes made in sessions
    /// nested in it that were pushed or squashed.
    pub fn undo(mut self) -> Result<(), StoreError> {
        self.open = false;
        self.store.undo_through(self.revision)
    }

    /// Make this session, and every undo state opened before it, permanent.
    pub fn commit(mut self) {
        self.open = false;
        self.store.commit(self.revision)
    }
}

impl Deref for Session<'_> {
    type Target = VersionedStore;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}

impl DerefMut for Session<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.store
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        log::debug!("reverting undo session {} on drop", self.revision);
        match self.store.undo_through(self.revision) {
            Ok(()) => (),
            Err(err) if err.is_fatal() => {
                log::error!(
                    "failed to revert undo session {}: {}",
                    self.revision,
                    err
                );
                if !std::thread::panicking() {
                    panic!("versioned store corrupted while reverting undo session: {}", err);
                }
            }
            // The session's undo state was already committed through the store.
            Err(err) => log::warn!(
                "could not revert undo session {}: {}",
                self.revision,
                err
            ),
        }
    }
}
