//! # bloomcount - Seen-Before Counting over Scaling Bloom Filters
//!
//! bloomcount answers "have I seen this sub-key in this collection before?"
//! with no false negatives and a bounded false positive rate, and uses the
//! answer to gate a counter increment: a sub-key's counter moves only once
//! the sub-key has been seen at least once before.
//!
//! ## Architecture
//!
//! - **Bloom Page**: fixed-capacity counting bloom filter
//! - **Scaling Bloom Filter**: append-only pages with geometrically tighter
//!   error targets, persisted in one backing file
//! - **Filter Registry**: collection name → filter, created on first use
//! - **Check-and-Count Protocol**: [`BloomCounter::check_and_count`] and
//!   [`BloomCounter::flush_all`]
//! - **Counter Store**: the external hash-increment store, see [`counter`]
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bloomcount::counter::MemoryCounterStore;
//! use bloomcount::{BloomCounter, Options};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), bloomcount::Error> {
//! let store = Arc::new(MemoryCounterStore::new());
//! let counter = BloomCounter::open(Options::default(), store.clone())?;
//!
//! assert_eq!(counter.check_and_count(b"users", b"alice")?, 0); // new
//! assert_eq!(counter.check_and_count(b"users", b"alice")?, 1); // seen
//!
//! counter.flush_all()?;
//! assert_eq!(counter.check_and_count(b"users", b"alice")?, 0); // forgotten
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod command;
pub mod config;
pub mod counter;
pub mod error;
pub mod filter;
pub mod registry;
pub mod storage;

// Re-exports
pub use command::{Command, CommandTable, Reply};
pub use config::Options;
pub use error::{Error, Result};
pub use registry::{FilterHandle, FilterRegistry, FilterStats};

use counter::CounterStore;
use std::sync::Arc;
use storage::NameGenerator;

/// The main service handle.
///
/// Owns the filter registry, the command table and a reference to the
/// counter store. All filters and their files live exactly as long as this
/// handle or until [`flush_all`](Self::flush_all).
///
/// # Thread Safety
///
/// `BloomCounter` is thread-safe and can be shared across threads using
/// `Arc<BloomCounter>`. Check-then-insert on one collection is atomic.
pub struct BloomCounter {
    /// Collection name → filter
    registry: FilterRegistry,

    /// Registered commands
    commands: CommandTable,

    /// Where counters live
    store: Arc<dyn CounterStore>,
}

impl BloomCounter {
    /// Opens a service with the given options and counter store.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - The filter directory cannot be created
    /// - Command registration fails
    pub fn open(options: Options, store: Arc<dyn CounterStore>) -> Result<Self> {
        let registry = FilterRegistry::new(options)?;
        Self::from_parts(registry, store)
    }

    /// Opens a service whose backing files are named by `names`.
    pub fn with_name_generator(
        options: Options,
        names: Box<dyn NameGenerator>,
        store: Arc<dyn CounterStore>,
    ) -> Result<Self> {
        let registry = FilterRegistry::with_name_generator(options, names)?;
        Self::from_parts(registry, store)
    }

    fn from_parts(registry: FilterRegistry, store: Arc<dyn CounterStore>) -> Result<Self> {
        let commands = CommandTable::standard()?;

        log::info!(
            "bloomcount ready: filters in {:?}, commands {:?}",
            registry.options().filter_dir,
            commands.names()
        );

        Ok(Self { registry, commands, store })
    }

    /// Checks `sub_key` in `collection` and counts it if it was seen before.
    ///
    /// A new sub-key is inserted into the collection's filter and `0` is
    /// returned. A seen sub-key increments the counter `(collection, sub_key)`
    /// in the store by one and returns the store's new value.
    ///
    /// A false positive makes a new sub-key look seen; it is counted instead
    /// of recorded and no error is raised.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection's filter cannot be created or
    /// grown, or if the counter store fails.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use bloomcount::counter::MemoryCounterStore;
    /// # use bloomcount::{BloomCounter, Options};
    /// # use std::sync::Arc;
    /// # fn main() -> Result<(), bloomcount::Error> {
    /// # let counter = BloomCounter::open(Options::default(), Arc::new(MemoryCounterStore::new()))?;
    /// let count = counter.check_and_count(b"page:home", b"visitor-42")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn check_and_count(&self, collection: &[u8], sub_key: &[u8]) -> Result<i64> {
        let handle = self.registry.resolve_or_create(collection)?;

        if handle.check_or_insert(sub_key)? {
            self.store.increment(collection, sub_key, 1)
        } else {
            Ok(0)
        }
    }

    /// Destroys every filter, then clears the counter store.
    ///
    /// The two steps are not atomic: a crash between them leaves the counters
    /// and the filters out of step.
    pub fn flush_all(&self) -> Result<()> {
        let destroyed = self.registry.destroy_all();
        self.store.clear_all()?;
        let count = destroyed?;

        log::info!("Flushed {} filters and the counter store", count);
        Ok(())
    }

    /// Executes a validated command.
    pub fn execute(&self, command: Command) -> Result<Reply> {
        match command {
            Command::CheckAndCount { collection, sub_key } => {
                self.check_and_count(&collection, &sub_key).map(Reply::Integer)
            }
            Command::FlushAll => self.flush_all().map(|_| Reply::Ok),
        }
    }

    /// Validates and executes a command given by name and raw arguments.
    ///
    /// Usage errors (unknown name, wrong arity) are returned before anything
    /// is touched.
    pub fn execute_raw<A: AsRef<[u8]>>(&self, name: &str, args: &[A]) -> Result<Reply> {
        let command = self.commands.parse(name, args)?;
        self.execute(command)
    }

    /// The filter registry.
    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// The registered commands.
    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Destroys every filter and deletes their files.
    ///
    /// The counter store is left alone.
    pub fn close(&self) -> Result<()> {
        let count = self.registry.destroy_all()?;
        log::info!("bloomcount closed, {} filters destroyed", count);
        Ok(())
    }
}

impl Drop for BloomCounter {
    fn drop(&mut self) {
        // Errors cannot be propagated out of drop
        if let Err(e) = self.registry.destroy_all() {
            log::warn!("Error destroying filters during drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> (BloomCounter, Arc<MemoryCounterStore>) {
        let store = Arc::new(MemoryCounterStore::new());
        let options = Options::default().filter_dir(dir.path()).capacity(1000);
        let counter = BloomCounter::open(options, store.clone()).unwrap();
        (counter, store)
    }

    #[test]
    fn test_open() {
        let dir = TempDir::new().unwrap();
        let (counter, _) = open(&dir);
        assert!(counter.registry().is_empty());
        assert_eq!(counter.commands().names().len(), 2);
    }

    #[test]
    fn test_new_then_seen() {
        let dir = TempDir::new().unwrap();
        let (counter, store) = open(&dir);

        assert_eq!(counter.check_and_count(b"users", b"alice").unwrap(), 0);
        assert_eq!(store.get(b"users", b"alice"), None);

        assert_eq!(counter.check_and_count(b"users", b"alice").unwrap(), 1);
        assert_eq!(counter.check_and_count(b"users", b"alice").unwrap(), 2);
        assert_eq!(store.get(b"users", b"alice"), Some(2));

        let handle = counter.registry().get(b"users").unwrap();
        assert_eq!(handle.next_id(), 1);
    }

    #[test]
    fn test_flush_all() {
        let dir = TempDir::new().unwrap();
        let (counter, store) = open(&dir);

        counter.check_and_count(b"users", b"alice").unwrap();
        counter.check_and_count(b"users", b"alice").unwrap();
        let path = counter.registry().get(b"users").unwrap().path().to_path_buf();

        counter.flush_all().unwrap();
        assert!(!path.exists());
        assert!(store.is_empty());
        assert_eq!(counter.check_and_count(b"users", b"alice").unwrap(), 0);
    }

    #[test]
    fn test_execute_raw() {
        let dir = TempDir::new().unwrap();
        let (counter, _) = open(&dir);

        assert_eq!(counter.execute_raw("bf.hincr", &["c", "x"]).unwrap(), Reply::Integer(0));
        assert_eq!(counter.execute_raw("BF.HINCR", &["c", "x"]).unwrap(), Reply::Integer(1));

        let none: [&str; 0] = [];
        assert_eq!(counter.execute_raw("bf.flushall", &none).unwrap(), Reply::Ok);
        assert!(counter.registry().is_empty());
    }

    #[test]
    fn test_unallocatable_filter_fails_only_the_call() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryCounterStore::new());

        // Skip validation to reach a page no allocator can provide.
        let registry = FilterRegistry::without_validation(
            Options::default().filter_dir(dir.path()).capacity(1 << 60),
        );
        let counter = BloomCounter::from_parts(registry, store.clone()).unwrap();

        let result = counter.check_and_count(b"huge", b"x");
        assert!(matches!(result, Err(Error::OutOfMemory(_))), "got {:?}", result);
        assert!(counter.registry().is_empty());
        assert!(store.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // Other services in the process keep working.
        let (other, _) = open(&dir);
        assert_eq!(other.check_and_count(b"small", b"x").unwrap(), 0);
        assert_eq!(other.check_and_count(b"small", b"x").unwrap(), 1);
    }

    #[test]
    fn test_drop_removes_files() {
        let dir = TempDir::new().unwrap();
        let path = {
            let (counter, _) = open(&dir);
            counter.check_and_count(b"c", b"x").unwrap();
            counter.registry().get(b"c").unwrap().path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_close_keeps_counters() {
        let dir = TempDir::new().unwrap();
        let (counter, store) = open(&dir);

        counter.check_and_count(b"c", b"x").unwrap();
        counter.check_and_count(b"c", b"x").unwrap();
        counter.close().unwrap();

        assert!(counter.registry().is_empty());
        assert_eq!(store.get(b"c", b"x"), Some(1));
    }
}
