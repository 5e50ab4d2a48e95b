//! Row storage support
//!
//! The durable store is an external collaborator; the core only defines the
//! shape it hands over ([`RowMap`]) and ships an in-memory implementation
//! for tests and single-process embedding.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::pack::DataLoader;

/// Rows produced by one pack call: element key → (row name → ciphertext
/// chunk). Each entry is one row to persist under its key.
pub type RowMap<T> = HashMap<T, HashMap<String, Vec<u8>>>;

/// In-memory row store.
///
/// Cheaply clonable; clones share the same rows. Suitable for tests and
/// single-process deployments; rows are lost when the process terminates.
pub struct MemoryStore<T> {
    rows: Arc<RwLock<RowMap<T>>>,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self { rows: Arc::clone(&self.rows) }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self { rows: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl<T> MemoryStore<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist the rows from a pack call, merging with existing rows
    pub fn put_rows(&self, rows: RowMap<T>) {
        let mut stored = self.rows.write();
        for (key, row) in rows {
            stored.entry(key).or_default().extend(row);
        }
    }

    /// The row stored under `key`, if any
    pub fn rows_for(&self, key: &T) -> Option<HashMap<String, Vec<u8>>> {
        self.rows.read().get(key).cloned()
    }

    /// Number of rows currently stored
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// A [`DataLoader`] over this store.
    ///
    /// Flattens the requested elements' rows into a single name → bytes
    /// map; row names are unique per pack call, so entries cannot clash.
    /// Keys with no stored row are skipped.
    pub fn loader(&self) -> DataLoader<T> {
        let store = self.clone();
        Arc::new(move |_ctx, keys| {
            let rows = store.rows.read();
            let mut attrs = HashMap::new();
            for key in keys {
                if let Some(row) = rows.get(key) {
                    for (name, bytes) in row {
                        attrs.insert(name.clone(), bytes.clone());
                    }
                }
            }
            Ok(attrs)
        })
    }
}
