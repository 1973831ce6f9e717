//! Approximate membership filters.
//!
//! This module provides the counting bloom page and the scaling filter that
//! stacks pages to back one collection.

pub mod page;
pub mod scaling;

pub use page::BloomPage;
pub use scaling::ScalingBloomFilter;

/// Filter trait for approximate membership checks
pub trait Filter {
    /// Check if a key may exist (can have false positives, never false negatives)
    fn may_contain(&self, key: &[u8]) -> bool;

    /// Add a key, tagged with the collection's insertion id
    fn add(&mut self, key: &[u8], id: u64) -> crate::Result<()>;

    /// Number of keys added
    fn len(&self) -> u64;

    /// Whether nothing has been added yet
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
