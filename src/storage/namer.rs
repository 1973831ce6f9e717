//! Backing file name generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Produces candidate file names for new backing files.
///
/// Names only need to be likely unique. [`BackingFile::create_unique`]
/// creates each candidate exclusively and asks for another name when the
/// file already exists.
///
/// [`BackingFile::create_unique`]: crate::storage::BackingFile::create_unique
pub trait NameGenerator: Send + Sync {
    /// Return the next candidate name, starting with `prefix`.
    fn next_name(&self, prefix: &str) -> String;
}

/// Names built from a prefix, a per-process tag and a counter:
/// `rbf_4242_000017.bf`.
#[derive(Debug)]
pub struct SequentialNames {
    tag: String,
    counter: AtomicU64,
}

impl SequentialNames {
    /// Tag names with the current process id.
    pub fn new() -> Self {
        Self::with_tag(std::process::id().to_string())
    }

    /// Tag names with a caller-chosen string.
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self { tag: tag.into(), counter: AtomicU64::new(0) }
    }
}

impl Default for SequentialNames {
    fn default() -> Self {
        Self::new()
    }
}

impl NameGenerator for SequentialNames {
    fn next_name(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}_{:06}.bf", prefix, self.tag, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_names() {
        let names = SequentialNames::with_tag("t");
        assert_eq!(names.next_name("rbf_"), "rbf_t_000000.bf");
        assert_eq!(names.next_name("rbf_"), "rbf_t_000001.bf");
        assert_eq!(names.next_name("x"), "xt_000002.bf");
    }

    #[test]
    fn test_default_tag_is_pid() {
        let names = SequentialNames::new();
        let name = names.next_name("rbf_");
        assert!(name.starts_with(&format!("rbf_{}_", std::process::id())));
    }
}
