//! Counting bloom page.
//!
//! A fixed-capacity counting bloom filter: one partition of 4-bit counters
//! per hash function. Counters make removal possible and saturate at 15 so
//! an overflowing slot can never drop back to zero.

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::storage::PageHeader;
use std::alloc::{alloc_zeroed, Layout};
use std::collections::BTreeSet;
use std::f64::consts::LN_2;
use std::hash::Hasher;

/// Largest value a 4-bit counter holds.
pub const COUNTER_MAX: u8 = 0x0f;

/// Granularity of dirty tracking over the counter bytes.
pub const BLOCK_SIZE: usize = 4096;

const SEED_1: u32 = 0xbc9f1d34;
const SEED_2: u32 = 0xd0e89c7b;

/// BloomPage is one generation of a scaling filter.
///
/// # Example
/// ```
/// use bloomcount::filter::BloomPage;
///
/// let mut page = BloomPage::new(1000, 0.01)?;
/// page.insert(b"alice", 0);
/// page.insert(b"bob", 1);
///
/// assert!(page.contains(b"alice"));
/// assert!(page.contains(b"bob"));
/// assert_eq!(page.count(), 2);
/// # Ok::<(), bloomcount::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct BloomPage {
    /// 4-bit counters, two per byte, low nibble first
    counters: Vec<u8>,
    num_funcs: u32,
    counts_per_func: u64,
    capacity: u64,
    error_rate: f64,
    /// Elements inserted so far
    count: u64,
    first_id: u64,
    last_id: u64,
    header_dirty: bool,
    dirty_blocks: BTreeSet<usize>,
}

impl BloomPage {
    /// Create an empty page sized for `capacity` elements at `error_rate`.
    ///
    /// Fails with [`Error::OutOfMemory`] when the counters cannot be
    /// allocated, and with [`Error::InvalidArgument`] when the page is too
    /// large to address at all.
    pub fn new(capacity: u64, error_rate: f64) -> Result<Self> {
        let capacity = capacity.max(1);
        let p = error_rate.clamp(1e-15, 0.9999);

        // k = ln(1/p) / ln(2)
        let num_funcs = ((1.0 / p).ln() / LN_2).ceil().clamp(1.0, 64.0) as u32;

        // m/k = n * |ln p| / (k * ln(2)^2)
        let counts_per_func =
            ((capacity as f64 * p.ln().abs()) / (num_funcs as f64 * LN_2 * LN_2)).ceil() as u64;
        let counts_per_func = counts_per_func.max(1);

        let header = PageHeader {
            num_funcs,
            counts_per_func,
            capacity,
            error_rate: p,
            count: 0,
            first_id: 0,
            last_id: 0,
        };

        Ok(Self {
            counters: zeroed_counters(header.counter_bytes()?)?,
            num_funcs,
            counts_per_func,
            capacity,
            error_rate: p,
            count: 0,
            first_id: 0,
            last_id: 0,
            header_dirty: true,
            dirty_blocks: BTreeSet::new(),
        })
    }

    /// Rebuild a page from its stored header and counter bytes.
    pub fn from_parts(header: PageHeader, counters: Vec<u8>) -> Result<Self> {
        let expected = header.counter_bytes()?;
        if counters.len() != expected {
            return Err(Error::corruption(format!(
                "Page counter size mismatch: expected {}, got {}",
                expected,
                counters.len()
            )));
        }

        Ok(Self {
            counters,
            num_funcs: header.num_funcs,
            counts_per_func: header.counts_per_func,
            capacity: header.capacity,
            error_rate: header.error_rate,
            count: header.count,
            first_id: header.first_id,
            last_id: header.last_id,
            header_dirty: false,
            dirty_blocks: BTreeSet::new(),
        })
    }

    /// Header describing this page's current state.
    pub fn header(&self) -> PageHeader {
        PageHeader {
            num_funcs: self.num_funcs,
            counts_per_func: self.counts_per_func,
            capacity: self.capacity,
            error_rate: self.error_rate,
            count: self.count,
            first_id: self.first_id,
            last_id: self.last_id,
        }
    }

    /// Add a key, recording `id` in the page's id range.
    pub fn insert(&mut self, key: &[u8], id: u64) {
        for pos in self.positions(key) {
            let value = self.counter(pos);
            if value < COUNTER_MAX {
                self.set_counter(pos, value + 1);
            }
        }

        if self.count == 0 {
            self.first_id = id;
            self.last_id = id;
        } else {
            self.first_id = self.first_id.min(id);
            self.last_id = self.last_id.max(id);
        }
        self.count += 1;
        self.header_dirty = true;
    }

    /// Check whether a key may be in the page.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.positions(key).all(|pos| self.counter(pos) != 0)
    }

    /// Remove a previously inserted key.
    ///
    /// Returns false, leaving the page untouched, when the key is certainly
    /// absent. Saturated counters are left as they are.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        if !self.contains(key) {
            return false;
        }

        for pos in self.positions(key) {
            let value = self.counter(pos);
            if value < COUNTER_MAX {
                self.set_counter(pos, value - 1);
            }
        }

        self.count = self.count.saturating_sub(1);
        self.header_dirty = true;
        true
    }

    /// Whether `id` falls inside the id range of this page's inserts.
    pub fn holds_id(&self, id: u64) -> bool {
        self.count > 0 && self.first_id <= id && id <= self.last_id
    }

    /// A page is full once it holds `capacity` elements.
    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    /// Elements inserted so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Elements the page holds before it is full.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The page's false positive target.
    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    /// Number of hash functions.
    pub fn num_funcs(&self) -> u32 {
        self.num_funcs
    }

    /// Size of the counter array in bytes.
    pub fn size(&self) -> usize {
        self.counters.len()
    }

    /// Counter bytes of the page.
    pub fn counters(&self) -> &[u8] {
        &self.counters
    }

    /// Estimated false positive rate at the current fill.
    ///
    /// Each partition has `m/k` counters and receives one increment per
    /// insert, so p = (1 - e^(-n/(m/k)))^k.
    pub fn estimated_false_positive_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let fill = 1.0 - (-(self.count as f64) / self.counts_per_func as f64).exp();
        fill.powi(self.num_funcs as i32)
    }

    /// Take the pending changes: whether the header changed, and which
    /// counter blocks did.
    pub fn take_dirty(&mut self) -> (bool, Vec<usize>) {
        let header_dirty = std::mem::replace(&mut self.header_dirty, false);
        let blocks = std::mem::take(&mut self.dirty_blocks).into_iter().collect();
        (header_dirty, blocks)
    }

    /// Counter bytes of dirty block `block`.
    pub fn block(&self, block: usize) -> &[u8] {
        let start = (block * BLOCK_SIZE).min(self.counters.len());
        let end = (start + BLOCK_SIZE).min(self.counters.len());
        &self.counters[start..end]
    }

    /// Counter positions of a key, one per partition.
    ///
    /// Double hashing: h_i = h1 + i*h2, reduced into partition i.
    fn positions(&self, key: &[u8]) -> impl Iterator<Item = u64> {
        let h1 = hash_with_seed(key, SEED_1);
        let h2 = hash_with_seed(key, SEED_2) | 1;
        let per_func = self.counts_per_func;

        (0..self.num_funcs as u64)
            .map(move |i| i * per_func + h1.wrapping_add(i.wrapping_mul(h2)) % per_func)
    }

    fn counter(&self, pos: u64) -> u8 {
        let byte = self.counters[(pos / 2) as usize];
        if pos % 2 == 0 {
            byte & 0x0f
        } else {
            byte >> 4
        }
    }

    fn set_counter(&mut self, pos: u64, value: u8) {
        let idx = (pos / 2) as usize;
        let byte = &mut self.counters[idx];
        if pos % 2 == 0 {
            *byte = (*byte & 0xf0) | (value & 0x0f);
        } else {
            *byte = (*byte & 0x0f) | (value << 4);
        }
        self.dirty_blocks.insert(idx / BLOCK_SIZE);
    }
}

impl Filter for BloomPage {
    fn may_contain(&self, key: &[u8]) -> bool {
        self.contains(key)
    }

    fn add(&mut self, key: &[u8], id: u64) -> Result<()> {
        self.insert(key, id);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.count
    }
}

/// Allocate `len` zeroed counter bytes, reporting allocation failure as an
/// error instead of aborting.
///
/// The memory comes from `alloc_zeroed`, so untouched counters of a large
/// page cost no resident memory.
pub(crate) fn zeroed_counters(len: usize) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }

    let layout = Layout::array::<u8>(len)
        .map_err(|_| Error::invalid_argument(format!("page of {} bytes is too large", len)))?;

    // SAFETY: layout has a non-zero size. The pointer is checked for null and
    // comes from the global allocator with exactly this layout, so the Vec
    // owns it with length == capacity == len, and zero is a valid u8.
    unsafe {
        let ptr = alloc_zeroed(layout);
        if ptr.is_null() {
            return Err(Error::OutOfMemory(format!("page of {} bytes", len)));
        }
        Ok(Vec::from_raw_parts(ptr, len, len))
    }
}

fn hash_with_seed(key: &[u8], seed: u32) -> u64 {
    let mut hasher = FnvHasher::new_with_seed(seed);
    hasher.write(key);
    fmix64(hasher.finish())
}

/// Final avalanche step so nearby FNV states spread over the whole range.
fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}

/// Simple FNV-1a hasher for bloom pages
struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    fn new_with_seed(seed: u32) -> Self {
        Self { state: Self::FNV_OFFSET_BASIS ^ (seed as u64) }
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::FNV_PRIME);
        }
    }
}
