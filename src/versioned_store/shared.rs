/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A [`VersionedStore`] shared between threads.
//!
//! Writers (block application, undo, commit) hold the write lock exclusively. Readers hold the read
//! lock, and therefore see a consistent state across all record indices: never one in which some
//! indices reflect a mutation and others do not.

use std::sync::{Arc, RwLock};

use super::{store::VersionedStore, StoreError};

/// Cheaply cloneable, thread-safe handle to a [`VersionedStore`].
#[derive(Clone)]
pub struct SharedStore(Arc<RwLock<VersionedStore>>);

impl SharedStore {
    pub fn new(store: VersionedStore) -> Self {
        Self(Arc::new(RwLock::new(store)))
    }

    /// Run `f` while holding the read lock.
    pub fn with_read_lock<T>(
        &self,
        f: impl FnOnce(&VersionedStore) -> T,
    ) -> Result<T, StoreError> {
        let store = self.0.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&store))
    }

    /// Run `f` while holding the write lock.
    pub fn with_write_lock<T>(
        &self,
        f: impl FnOnce(&mut VersionedStore) -> T,
    ) -> Result<T, StoreError> {
        let mut store = self.0.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&mut store))
    }
}
