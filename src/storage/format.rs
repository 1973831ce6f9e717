//! Backing file layout.
//!
//! A filter file starts with a fixed-size file header followed by one region
//! per bloom page, oldest first:
//!
//! ```text
//! [file header: 64 bytes]
//!   magic u64 | checksum u32 | body_len u32 | bincode(FileHeader) | zero padding
//! [page header: 64 bytes]
//!   checksum u32 | num_funcs u32 | counts_per_func u64 | capacity u64
//!   | error_rate f64 | count u64 | first_id u64 | last_id u64 | zero padding
//! [page counters: PageHeader::counter_bytes() bytes]
//! [page header] [page counters] ...
//! ```
//!
//! Headers are checksummed with CRC32. Counter bytes are not: a torn write
//! to the tail page is accepted rather than detected.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Magic number at the start of every filter file ("bloomcnt").
pub const MAGIC_NUMBER: u64 = 0x626c_6f6f_6d63_6e74;

/// Current file format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the file header region.
pub const FILE_HEADER_SIZE: usize = 64;

/// Size of each page header region.
pub const PAGE_HEADER_SIZE: usize = 64;

/// Bytes used by the fixed fields of a page header (checksum excluded).
const PAGE_HEADER_BODY: usize = 52;

/// Filter-wide metadata stored at the start of the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Format version the file was written with.
    pub version: u32,
    /// Per-page capacity.
    pub capacity: u64,
    /// Aggregate false positive target.
    pub error_rate: f64,
    /// Number of pages that follow the header.
    pub num_pages: u32,
    /// Highest insertion id recorded so far.
    pub max_id: u64,
}

impl FileHeader {
    /// Create a header for a filter with a single, empty page.
    pub fn new(capacity: u64, error_rate: f64) -> Self {
        Self { version: FORMAT_VERSION, capacity, error_rate, num_pages: 1, max_id: 0 }
    }

    /// Encode the header into its fixed-size region.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        if body.len() > FILE_HEADER_SIZE - 16 {
            return Err(Error::Serialization(format!(
                "File header too large: {} bytes",
                body.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(FILE_HEADER_SIZE);
        buf.put_u64_le(MAGIC_NUMBER);
        buf.put_u32_le(checksum(&body));
        buf.put_u32_le(body.len() as u32);
        buf.put_slice(&body);
        buf.resize(FILE_HEADER_SIZE, 0);

        Ok(buf.to_vec())
    }

    /// Decode and validate a file header.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < FILE_HEADER_SIZE {
            return Err(Error::corruption(format!(
                "File header too short: {} bytes",
                data.len()
            )));
        }

        let magic = data.get_u64_le();
        if magic != MAGIC_NUMBER {
            return Err(Error::corruption(format!(
                "Invalid filter file magic number: expected {:#x}, got {:#x}",
                MAGIC_NUMBER, magic
            )));
        }

        let stored = data.get_u32_le();
        let len = data.get_u32_le() as usize;
        if len > FILE_HEADER_SIZE - 16 {
            return Err(Error::corruption(format!("File header body length {} out of range", len)));
        }

        let body = &data[..len];
        let actual = checksum(body);
        if stored != actual {
            return Err(Error::corruption(format!(
                "File header checksum mismatch: expected {:#x}, got {:#x}",
                stored, actual
            )));
        }

        let header: FileHeader = bincode::deserialize(body)?;
        if header.version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "Unsupported filter file version {}",
                header.version
            )));
        }
        if header.num_pages == 0 {
            return Err(Error::corruption("Filter file has no pages"));
        }

        Ok(header)
    }
}

/// Per-page metadata stored in front of each page's counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageHeader {
    /// Number of hash functions (and counter partitions).
    pub num_funcs: u32,
    /// Counters in each partition.
    pub counts_per_func: u64,
    /// Elements the page holds before it is full.
    pub capacity: u64,
    /// The page's own false positive target.
    pub error_rate: f64,
    /// Elements inserted so far.
    pub count: u64,
    /// Smallest insertion id in the page.
    pub first_id: u64,
    /// Largest insertion id in the page.
    pub last_id: u64,
}

impl PageHeader {
    /// Number of bytes holding this page's 4-bit counters.
    ///
    /// Fails when the counter array cannot be addressed on this platform.
    pub fn counter_bytes(&self) -> Result<usize> {
        (self.num_funcs as u64)
            .checked_mul(self.counts_per_func)
            .map(|total| total / 2 + total % 2)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .filter(|&bytes| bytes <= isize::MAX as usize - PAGE_HEADER_SIZE)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "page of {} x {} counters is too large",
                    self.num_funcs, self.counts_per_func
                ))
            })
    }

    /// Total size of the page region, header included.
    pub fn region_size(&self) -> Result<u64> {
        Ok((PAGE_HEADER_SIZE + self.counter_bytes()?) as u64)
    }

    /// Encode the header into its fixed-size region.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = BytesMut::with_capacity(PAGE_HEADER_BODY);
        body.put_u32_le(self.num_funcs);
        body.put_u64_le(self.counts_per_func);
        body.put_u64_le(self.capacity);
        body.put_f64_le(self.error_rate);
        body.put_u64_le(self.count);
        body.put_u64_le(self.first_id);
        body.put_u64_le(self.last_id);

        let mut buf = BytesMut::with_capacity(PAGE_HEADER_SIZE);
        buf.put_u32_le(checksum(&body));
        buf.put_slice(&body);
        buf.resize(PAGE_HEADER_SIZE, 0);

        buf.to_vec()
    }

    /// Decode and validate a page header.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PAGE_HEADER_SIZE {
            return Err(Error::corruption(format!(
                "Page header too short: {} bytes",
                data.len()
            )));
        }

        let stored = (&data[0..4]).get_u32_le();
        let mut body = &data[4..4 + PAGE_HEADER_BODY];
        let actual = checksum(body);
        if stored != actual {
            return Err(Error::corruption(format!(
                "Page header checksum mismatch: expected {:#x}, got {:#x}",
                stored, actual
            )));
        }

        let header = PageHeader {
            num_funcs: body.get_u32_le(),
            counts_per_func: body.get_u64_le(),
            capacity: body.get_u64_le(),
            error_rate: body.get_f64_le(),
            count: body.get_u64_le(),
            first_id: body.get_u64_le(),
            last_id: body.get_u64_le(),
        };

        if header.num_funcs == 0 || header.counts_per_func == 0 {
            return Err(Error::corruption("Page header describes an empty page"));
        }
        if header.counter_bytes().is_err() {
            return Err(Error::corruption(format!(
                "Page header describes {} x {} counters",
                header.num_funcs, header.counts_per_func
            )));
        }

        Ok(header)
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
