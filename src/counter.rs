//! Counter storage collaborator.
//!
//! The check-and-count protocol only needs two things from the store that
//! holds the counters: a hash-field increment and a clear-everything. Hosts
//! plug their own store in through [`CounterStore`]; [`MemoryCounterStore`]
//! keeps everything in process memory.

use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// External store that holds the per-collection counters.
pub trait CounterStore: Send + Sync {
    /// Add `delta` to `field` of the hash stored at `key` and return the new
    /// value. A missing field counts as 0.
    fn increment(&self, key: &[u8], field: &[u8], delta: i64) -> Result<i64>;

    /// Remove every counter the store holds.
    fn clear_all(&self) -> Result<()>;
}

/// Thread-safe in-memory counter store.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    hashes: RwLock<HashMap<Bytes, HashMap<Bytes, i64>>>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, if it was ever incremented.
    pub fn get(&self, key: &[u8], field: &[u8]) -> Option<i64> {
        self.hashes.read().get(key).and_then(|fields| fields.get(field).copied())
    }

    /// Number of hashes with at least one counter.
    pub fn len(&self) -> usize {
        self.hashes.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.hashes.read().is_empty()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &[u8], field: &[u8], delta: i64) -> Result<i64> {
        let mut hashes = self.hashes.write();
        let value = hashes
            .entry(Bytes::copy_from_slice(key))
            .or_default()
            .entry(Bytes::copy_from_slice(field))
            .or_insert(0);

        *value = value
            .checked_add(delta)
            .ok_or_else(|| Error::counter("increment or decrement would overflow"))?;
        Ok(*value)
    }

    fn clear_all(&self) -> Result<()> {
        self.hashes.write().clear();
        Ok(())
    }
}
