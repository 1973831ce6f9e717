//! Filter registry.
//!
//! Maps collection names to their [`FilterHandle`]. A handle is created the
//! first time its name is resolved and lives until [`FilterRegistry::destroy_all`]
//! (or the registry itself) goes away; there is no per-collection removal.

use crate::config::Options;
use crate::error::Result;
use crate::filter::{Filter, ScalingBloomFilter};
use crate::storage::{BackingFile, NameGenerator, SequentialNames};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One collection's filter and insertion counter.
pub struct FilterHandle {
    name: Bytes,
    path: PathBuf,
    /// Insertion id for the next new sub-key
    next_id: AtomicU64,
    filter: Mutex<ScalingBloomFilter>,
    flush_on_insert: bool,
}

impl FilterHandle {
    /// Collection name.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insertion id the next new sub-key will get.
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Check whether a sub-key may have been seen.
    pub fn check(&self, key: &[u8]) -> bool {
        self.filter.lock().may_contain(key)
    }

    /// Check a sub-key and insert it when it is new.
    ///
    /// Returns `true` when the key was (probably) already present, in which
    /// case the filter is untouched. Otherwise the key is inserted with the
    /// current `next_id`, the id advances and `false` is returned. Both steps
    /// run under the filter lock.
    pub fn check_or_insert(&self, key: &[u8]) -> Result<bool> {
        let mut filter = self.filter.lock();
        if filter.may_contain(key) {
            return Ok(true);
        }

        let id = self.next_id.load(Ordering::SeqCst);
        filter.add(key, id)?;
        self.next_id.store(id + 1, Ordering::SeqCst);

        if self.flush_on_insert {
            if let Err(e) = filter.flush() {
                log::warn!("Write-back of filter {:?} failed: {}", self.path, e);
            }
        }

        Ok(false)
    }

    /// Snapshot of the filter's size and fill.
    pub fn stats(&self) -> FilterStats {
        let filter = self.filter.lock();
        FilterStats {
            name: self.name.clone(),
            path: self.path.clone(),
            pages: filter.num_pages(),
            count: filter.len(),
            next_id: self.next_id(),
            size_bytes: filter.size_bytes(),
            estimated_false_positive_rate: filter.estimated_false_positive_rate(),
        }
    }

    fn destroy(self) -> Result<()> {
        self.filter.into_inner().destroy()
    }
}

impl std::fmt::Debug for FilterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterHandle")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("next_id", &self.next_id())
            .finish()
    }
}

/// Statistics for one collection.
#[derive(Debug, Clone)]
pub struct FilterStats {
    /// Collection name
    pub name: Bytes,
    /// Backing file
    pub path: PathBuf,
    /// Number of bloom pages
    pub pages: usize,
    /// Keys inserted
    pub count: u64,
    /// Next insertion id
    pub next_id: u64,
    /// Counter bytes across pages
    pub size_bytes: usize,
    /// Upper bound on the current false positive rate
    pub estimated_false_positive_rate: f64,
}

/// Name → filter mapping shared by all protocol calls.
pub struct FilterRegistry {
    options: Options,
    names: Box<dyn NameGenerator>,
    filters: Mutex<HashMap<Bytes, Arc<FilterHandle>>>,
}

impl FilterRegistry {
    /// Create a registry naming files with [`SequentialNames`].
    pub fn new(options: Options) -> Result<Self> {
        Self::with_name_generator(options, Box::new(SequentialNames::new()))
    }

    /// Create a registry with a custom name generator.
    ///
    /// The filter directory is created if it does not exist.
    pub fn with_name_generator(options: Options, names: Box<dyn NameGenerator>) -> Result<Self> {
        options.validate()?;
        std::fs::create_dir_all(&options.filter_dir)?;

        Ok(Self { options, names, filters: Mutex::new(HashMap::new()) })
    }

    /// Registry that trusts `options` as given.
    #[cfg(test)]
    pub(crate) fn without_validation(options: Options) -> Self {
        Self { options, names: Box::new(SequentialNames::new()), filters: Mutex::new(HashMap::new()) }
    }

    /// Options the registry creates filters with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Return the handle for `name`, creating it on first use.
    ///
    /// Lookup and creation happen under the registry lock, so concurrent
    /// callers for one name share a single handle and file. If creation
    /// fails nothing is inserted and the new file is removed.
    pub fn resolve_or_create(&self, name: &[u8]) -> Result<Arc<FilterHandle>> {
        let mut filters = self.filters.lock();
        if let Some(handle) = filters.get(name) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(self.create_handle(name)?);
        filters.insert(handle.name.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    fn create_handle(&self, name: &[u8]) -> Result<FilterHandle> {
        let file = BackingFile::create_unique(
            &self.options.filter_dir,
            &self.options.file_prefix,
            self.names.as_ref(),
            self.options.max_create_attempts,
        )?;
        let path = file.path().to_path_buf();

        let mut filter =
            ScalingBloomFilter::create(file, self.options.capacity, self.options.error_rate)?;
        filter.set_sync_on_flush(self.options.sync_on_flush);

        log::info!(
            "Created filter for collection {:?} at {:?}",
            String::from_utf8_lossy(name),
            path
        );

        Ok(FilterHandle {
            name: Bytes::copy_from_slice(name),
            path,
            next_id: AtomicU64::new(0),
            filter: Mutex::new(filter),
            flush_on_insert: self.options.flush_on_insert,
        })
    }

    /// Handle for `name`, if it exists.
    pub fn get(&self, name: &[u8]) -> Option<Arc<FilterHandle>> {
        self.filters.lock().get(name).cloned()
    }

    /// Number of collections.
    pub fn len(&self) -> usize {
        self.filters.lock().len()
    }

    /// Whether no collection exists.
    pub fn is_empty(&self) -> bool {
        self.filters.lock().is_empty()
    }

    /// Collection names, sorted.
    pub fn names(&self) -> Vec<Bytes> {
        let mut names: Vec<Bytes> = self.filters.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Statistics for every collection, sorted by name.
    pub fn stats(&self) -> Vec<FilterStats> {
        let handles: Vec<Arc<FilterHandle>> = self.filters.lock().values().cloned().collect();
        let mut stats: Vec<FilterStats> = handles.iter().map(|h| h.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Destroy every filter and delete every backing file.
    ///
    /// The map is emptied first, so the next [`resolve_or_create`] starts
    /// fresh. All handles are processed even if a file cannot be removed;
    /// the first such error is returned. A handle still borrowed by an
    /// in-flight call is destroyed when that call releases it.
    ///
    /// [`resolve_or_create`]: Self::resolve_or_create
    pub fn destroy_all(&self) -> Result<usize> {
        let drained: Vec<Arc<FilterHandle>> = {
            let mut filters = self.filters.lock();
            filters.drain().map(|(_, handle)| handle).collect()
        };
        let count = drained.len();

        let mut first_error = None;
        for handle in drained {
            match Arc::try_unwrap(handle) {
                Ok(handle) => {
                    if let Err(e) = handle.destroy() {
                        log::warn!("Failed to destroy filter: {}", e);
                        first_error.get_or_insert(e);
                    }
                }
                Err(shared) => {
                    log::debug!("Filter {:?} still in use, deferring removal", shared.path());
                }
            }
        }

        if count > 0 {
            log::info!("Destroyed {} filters", count);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("options", &self.options)
            .field("filters", &self.len())
            .finish()
    }
}
