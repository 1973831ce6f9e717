//! Owned backing file of a scaling filter.

use super::namer::NameGenerator;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A filter's backing file.
///
/// The file is deleted when the value is dropped unless it was released
/// with [`keep`](BackingFile::keep). [`remove`](BackingFile::remove) deletes
/// it eagerly and reports the outcome.
pub struct BackingFile {
    path: PathBuf,
    file: File,
    remove_on_drop: bool,
}

impl BackingFile {
    /// Create a new file in `dir` whose name no other file has.
    ///
    /// Every candidate from `names` is created with `create_new`, so a name
    /// taken by another process (or another filter) is never reused. After
    /// `max_attempts` taken names the allocation fails.
    pub fn create_unique(
        dir: &Path,
        prefix: &str,
        names: &dyn NameGenerator,
        max_attempts: u32,
    ) -> Result<Self> {
        for _ in 0..max_attempts {
            let path = dir.join(names.next_name(prefix));

            match OpenOptions::new().read(true).write(true).create_new(true).open(&path) {
                Ok(file) => {
                    log::debug!("Created filter file {:?}", path);
                    return Ok(Self { path, file, remove_on_drop: true });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    log::debug!("Filter file {:?} already exists, trying another name", path);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::NameExhausted { dir: dir.to_path_buf(), attempts: max_attempts })
    }

    /// Open an existing file for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self { path, file, remove_on_drop: true })
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the file in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Grow or shrink the file. Growth leaves a zero-filled (sparse) tail.
    pub fn set_len(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Write `data` at `offset`.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Fill `buf` from `offset`. A short file is reported as corruption.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::corruption(format!(
                    "Filter file {:?} truncated: {} bytes missing at offset {}",
                    self.path,
                    buf.len(),
                    offset
                ))
            } else {
                Error::Io(e)
            }
        })
    }

    /// fsync the file.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Release the file so it survives this value.
    pub fn keep(mut self) -> PathBuf {
        self.remove_on_drop = false;
        self.path.clone()
    }

    /// Delete the file now.
    pub fn remove(mut self) -> Result<()> {
        self.remove_on_drop = false;
        std::fs::remove_file(&self.path)?;
        log::debug!("Removed filter file {:?}", self.path);
        Ok(())
    }
}

impl Drop for BackingFile {
    fn drop(&mut self) {
        if !self.remove_on_drop {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed filter file {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove filter file {:?}: {}", self.path, e),
        }
    }
}

impl std::fmt::Debug for BackingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingFile")
            .field("path", &self.path)
            .field("remove_on_drop", &self.remove_on_drop)
            .finish()
    }
}
