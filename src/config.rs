//! Configuration options for bloomcount.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest per-page capacity accepted by [`Options::validate`].
///
/// A first page at this capacity and a 1% target already needs about 22 GiB
/// of counters; later pages are larger still.
pub const MAX_CAPACITY: u64 = 1 << 32;

/// Configuration options for a [`BloomCounter`](crate::BloomCounter) and the
/// filters it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Directory holding the backing file of every collection.
    /// Default: the system temp directory
    pub filter_dir: PathBuf,

    /// Prefix for backing file names.
    /// Default: "rbf_"
    pub file_prefix: String,

    /// Number of elements each bloom page holds before a new page is added.
    /// Default: 64Mi
    pub capacity: u64,

    /// Aggregate false positive rate across all pages of a filter.
    /// Default: 0.01 (1%)
    pub error_rate: f64,

    /// Write changed counter blocks back to the file after every insert.
    /// Default: true
    pub flush_on_insert: bool,

    /// fsync the backing file after each write-back.
    /// Default: false
    pub sync_on_flush: bool,

    /// Number of names tried when creating a backing file exclusively.
    /// Default: 16
    pub max_create_attempts: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            filter_dir: std::env::temp_dir(),
            file_prefix: "rbf_".to_string(),
            capacity: 64 * 1024 * 1024, // 64Mi elements per page
            error_rate: 0.01,
            flush_on_insert: true,
            sync_on_flush: false,
            max_create_attempts: 16,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let options: Options = serde_json::from_slice(&data)?;
        options.validate()?;
        Ok(options)
    }

    /// Sets the directory for backing files.
    pub fn filter_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.filter_dir = dir.into();
        self
    }

    /// Sets the backing file name prefix.
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Sets the per-page capacity.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the aggregate false positive rate.
    pub fn error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = error_rate;
        self
    }

    /// Enables or disables write-back after every insert.
    pub fn flush_on_insert(mut self, value: bool) -> Self {
        self.flush_on_insert = value;
        self
    }

    /// Enables or disables fsync after write-back.
    pub fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.capacity == 0 {
            return Err(crate::Error::invalid_argument("capacity must be > 0"));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(crate::Error::invalid_argument(format!(
                "capacity must be <= {}, got {}",
                MAX_CAPACITY, self.capacity
            )));
        }
        if !(self.error_rate > 0.0 && self.error_rate < 1.0) {
            return Err(crate::Error::invalid_argument("error_rate must be between 0 and 1"));
        }
        if self.max_create_attempts == 0 {
            return Err(crate::Error::invalid_argument("max_create_attempts must be > 0"));
        }
        if self.file_prefix.is_empty() || self.file_prefix.contains(std::path::is_separator) {
            return Err(crate::Error::invalid_argument(
                "file_prefix must be non-empty and must not contain path separators",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.capacity, 64 * 1024 * 1024);
        assert_eq!(opts.error_rate, 0.01);
        assert_eq!(opts.file_prefix, "rbf_");
        assert!(opts.flush_on_insert);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .filter_dir("/var/lib/bloomcount")
            .capacity(1000)
            .error_rate(0.05)
            .flush_on_insert(false);

        assert_eq!(opts.filter_dir, PathBuf::from("/var/lib/bloomcount"));
        assert_eq!(opts.capacity, 1000);
        assert_eq!(opts.error_rate, 0.05);
        assert!(!opts.flush_on_insert);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        opts.capacity = 0;
        assert!(opts.validate().is_err());

        opts.capacity = MAX_CAPACITY + 1;
        assert!(matches!(opts.validate(), Err(crate::Error::InvalidArgument(_))));
        opts.capacity = MAX_CAPACITY;
        assert!(opts.validate().is_ok());

        opts.capacity = 1024;
        opts.error_rate = 1.5;
        assert!(opts.validate().is_err());

        opts.error_rate = 0.01;
        opts.file_prefix = "a/b".to_string();
        assert!(opts.validate().is_err());

        opts.file_prefix = "bf_".to_string();
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_from_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bloomcount.json");
        std::fs::write(&path, r#"{ "capacity": 5000, "error_rate": 0.02 }"#).unwrap();

        let opts = Options::from_json_file(&path).unwrap();
        assert_eq!(opts.capacity, 5000);
        assert_eq!(opts.error_rate, 0.02);
        assert_eq!(opts.file_prefix, "rbf_");

        std::fs::write(&path, r#"{ "capacity": 0 }"#).unwrap();
        assert!(Options::from_json_file(&path).is_err());

        std::fs::write(&path, r#"{ "capacity": 4398046511104 }"#).unwrap();
        assert!(Options::from_json_file(&path).is_err());
    }
}
