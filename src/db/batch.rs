//! Transactions. All edits made inside one succeed or all are undone.

use super::GeoStore;
use super::internal::Tables;
use crate::error::Result;
use std::ops::{Deref, DerefMut};

/// Open transaction over a [`GeoStore`].
///
/// Dereferences to the store, so every store operation is available. Edits
/// are rolled back when the guard is dropped without [`commit`](Self::commit).
pub struct Transaction<'a> {
    store: &'a mut GeoStore,
    checkpoint: Option<Tables>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(store: &'a mut GeoStore) -> Self {
        let checkpoint = Some(store.tables.clone());
        Self { store, checkpoint }
    }

    pub fn commit(mut self) {
        self.checkpoint = None;
    }

    pub fn rollback(self) {
        drop(self);
    }
}

impl Deref for Transaction<'_> {
    type Target = GeoStore;

    fn deref(&self) -> &GeoStore {
        self.store
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut GeoStore {
        self.store
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            log::debug!("Rolling back store transaction");
            self.store.tables = checkpoint;
        }
    }
}

impl GeoStore {
    pub fn begin(&mut self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Runs `f` in a transaction, committing only when it returns `Ok`.
    pub fn transaction<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut GeoStore) -> Result<R>,
    {
        let mut tx = self.begin();
        let result = f(&mut *tx)?;
        tx.commit();
        Ok(result)
    }
}
