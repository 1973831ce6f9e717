//! Scaling bloom filter.
//!
//! An append-only sequence of [`BloomPage`]s sharing one backing file. When
//! the newest page is full a new one is appended with a tighter error
//! target: page `n` gets `error_rate * 0.5^(n+1)`, so the false positive
//! rates of all pages sum to at most `error_rate` however far the filter
//! grows.

use crate::error::{Error, Result};
use crate::filter::page::{zeroed_counters, BloomPage, BLOCK_SIZE};
use crate::filter::Filter;
use crate::storage::format::{FILE_HEADER_SIZE, PAGE_HEADER_SIZE};
use crate::storage::{BackingFile, FileHeader, PageHeader};
use std::path::{Path, PathBuf};

/// Ratio by which each new page's error target shrinks.
pub const ERROR_TIGHTENING_RATIO: f64 = 0.5;

/// ScalingBloomFilter grows by whole pages and never reports a false negative.
///
/// All pages live in the filter's backing file. Dropping the filter frees
/// the pages and then deletes the file; [`close`](Self::close) keeps it.
pub struct ScalingBloomFilter {
    /// Per-page capacity
    capacity: u64,
    /// Aggregate false positive target
    error_rate: f64,
    /// Pages, oldest first
    pages: Vec<BloomPage>,
    /// File offset of each page region
    offsets: Vec<u64>,
    /// Highest insertion id seen
    max_id: u64,
    header_dirty: bool,
    sync_on_flush: bool,
    file: BackingFile,
}

impl ScalingBloomFilter {
    /// Create a filter in a freshly allocated backing file.
    ///
    /// The file header and the first page are written before returning. On
    /// error the file is removed along with `file`.
    pub fn create(file: BackingFile, capacity: u64, error_rate: f64) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_argument("capacity must be > 0"));
        }
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(Error::invalid_argument("error_rate must be between 0 and 1"));
        }

        let mut filter = Self {
            capacity,
            error_rate,
            pages: Vec::new(),
            offsets: Vec::new(),
            max_id: 0,
            header_dirty: true,
            sync_on_flush: false,
            file,
        };
        filter.append_page()?;
        filter.flush()?;

        log::info!(
            "Created scaling filter {:?} (capacity {}, error rate {})",
            filter.path(),
            capacity,
            error_rate
        );

        Ok(filter)
    }

    /// Reopen a filter from a file written by [`create`](Self::create).
    ///
    /// Reconstructs every page with its counters, fill count and id range.
    /// A file that fails validation is left on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = BackingFile::open(path)?;

        match Self::load(&mut file) {
            Ok((header, pages, offsets)) => {
                log::debug!("Reopened scaling filter {:?} with {} pages", file.path(), pages.len());
                Ok(Self {
                    capacity: header.capacity,
                    error_rate: header.error_rate,
                    pages,
                    offsets,
                    max_id: header.max_id,
                    header_dirty: false,
                    sync_on_flush: false,
                    file,
                })
            }
            Err(e) => {
                file.keep();
                Err(e)
            }
        }
    }

    fn load(file: &mut BackingFile) -> Result<(FileHeader, Vec<BloomPage>, Vec<u64>)> {
        let mut buf = vec![0u8; FILE_HEADER_SIZE];
        file.read_at(0, &mut buf)?;
        let header = FileHeader::decode(&buf)?;
        let file_len = file.len()?;

        let mut pages = Vec::with_capacity(header.num_pages as usize);
        let mut offsets = Vec::with_capacity(header.num_pages as usize);
        let mut offset = FILE_HEADER_SIZE as u64;

        for _ in 0..header.num_pages {
            let mut buf = vec![0u8; PAGE_HEADER_SIZE];
            file.read_at(offset, &mut buf)?;
            let page_header = PageHeader::decode(&buf)?;

            let region_size = page_header.region_size()?;
            if offset.checked_add(region_size).map_or(true, |end| end > file_len) {
                return Err(Error::corruption(format!(
                    "Page at offset {} needs {} bytes, file has {}",
                    offset, region_size, file_len
                )));
            }

            let mut counters = zeroed_counters(page_header.counter_bytes()?)?;
            file.read_at(offset + PAGE_HEADER_SIZE as u64, &mut counters)?;

            pages.push(BloomPage::from_parts(page_header, counters)?);
            offsets.push(offset);
            offset += region_size;
        }

        Ok((header, pages, offsets))
    }

    /// fsync the file after each [`flush`](Self::flush).
    pub fn set_sync_on_flush(&mut self, value: bool) {
        self.sync_on_flush = value;
    }

    /// Check whether a key may have been inserted.
    pub fn check(&self, key: &[u8]) -> bool {
        self.pages.iter().rev().any(|page| page.contains(key))
    }

    /// Insert a key into the newest page, appending a page first if it is full.
    pub fn insert(&mut self, key: &[u8], id: u64) -> Result<()> {
        if self.pages.last().map_or(true, BloomPage::is_full) {
            self.append_page()?;
        }

        if let Some(page) = self.pages.last_mut() {
            page.insert(key, id);
        }
        if id > self.max_id {
            self.max_id = id;
            self.header_dirty = true;
        }

        Ok(())
    }

    /// Remove a key that was inserted with `id`.
    ///
    /// The key is removed from the page whose id range holds `id`. Returns
    /// false when no page holds `id` or the page certainly lacks the key.
    pub fn remove(&mut self, key: &[u8], id: u64) -> bool {
        match self.pages.iter_mut().rev().find(|page| page.holds_id(id)) {
            Some(page) => page.remove(key),
            None => false,
        }
    }

    /// Write changed headers and counter blocks back to the file.
    pub fn flush(&mut self) -> Result<()> {
        for (page, &offset) in self.pages.iter_mut().zip(&self.offsets) {
            let (header_dirty, blocks) = page.take_dirty();

            if header_dirty {
                self.file.write_at(offset, &page.header().encode())?;
            }
            for block in blocks {
                let start = offset + (PAGE_HEADER_SIZE + block * BLOCK_SIZE) as u64;
                self.file.write_at(start, page.block(block))?;
            }
        }

        if self.header_dirty {
            self.write_file_header()?;
        }
        if self.sync_on_flush {
            self.file.sync()?;
        }

        Ok(())
    }

    /// Flush and release the backing file, returning its path.
    pub fn close(mut self) -> Result<PathBuf> {
        let flushed = self.flush();
        let Self { file, .. } = self;
        let path = file.keep();

        log::info!("Closed scaling filter {:?}", path);
        flushed.map(|_| path)
    }

    /// Free all pages and delete the backing file.
    pub fn destroy(self) -> Result<()> {
        let Self { pages, file, .. } = self;
        drop(pages);

        log::info!("Destroying scaling filter {:?}", file.path());
        file.remove()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of pages.
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// The pages, oldest first.
    pub fn pages(&self) -> &[BloomPage] {
        &self.pages
    }

    /// Per-page capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Aggregate false positive target.
    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    /// Highest insertion id seen.
    pub fn max_id(&self) -> u64 {
        self.max_id
    }

    /// Total counter bytes across all pages.
    pub fn size_bytes(&self) -> usize {
        self.pages.iter().map(BloomPage::size).sum()
    }

    /// Upper bound on the current false positive rate: the sum of the pages'
    /// estimates.
    pub fn estimated_false_positive_rate(&self) -> f64 {
        self.pages.iter().map(BloomPage::estimated_false_positive_rate).sum()
    }

    fn append_page(&mut self) -> Result<()> {
        let index = self.pages.len() as i32;
        let page_error = self.error_rate * ERROR_TIGHTENING_RATIO.powi(index + 1);
        let mut page = BloomPage::new(self.capacity, page_error)?;

        let offset = match (self.offsets.last(), self.pages.last()) {
            (Some(&offset), Some(last)) => offset + last.header().region_size()?,
            _ => FILE_HEADER_SIZE as u64,
        };

        // The counters start zeroed, so extending the file covers them.
        self.file.set_len(offset + page.header().region_size()?)?;
        page.take_dirty();
        self.file.write_at(offset, &page.header().encode())?;

        self.pages.push(page);
        self.offsets.push(offset);
        self.write_file_header()?;

        log::debug!(
            "Scaling filter {:?} grew to {} pages (page error rate {:.3e})",
            self.file.path(),
            self.pages.len(),
            page_error
        );

        Ok(())
    }

    fn write_file_header(&mut self) -> Result<()> {
        let header = FileHeader {
            num_pages: self.pages.len() as u32,
            max_id: self.max_id,
            ..FileHeader::new(self.capacity, self.error_rate)
        };
        self.file.write_at(0, &header.encode()?)?;
        self.header_dirty = false;
        Ok(())
    }
}

impl Filter for ScalingBloomFilter {
    fn may_contain(&self, key: &[u8]) -> bool {
        self.check(key)
    }

    fn add(&mut self, key: &[u8], id: u64) -> Result<()> {
        self.insert(key, id)
    }

    fn len(&self) -> u64 {
        self.pages.iter().map(BloomPage::count).sum()
    }
}

impl std::fmt::Debug for ScalingBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalingBloomFilter")
            .field("path", &self.file.path())
            .field("capacity", &self.capacity)
            .field("error_rate", &self.error_rate)
            .field("pages", &self.pages.len())
            .field("max_id", &self.max_id)
            .finish()
    }
}
