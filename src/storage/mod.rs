//! Backing storage for scaling filters.
//!
//! Every collection's filter lives in exactly one regular file. This module
//! owns how those files are named, created, written and removed:
//!
//! - **Naming**: a [`NameGenerator`] proposes names, and each one is created
//!   exclusively so two filters never share a file
//! - **Ownership**: a [`BackingFile`] deletes its file when dropped
//! - **Format**: [`format`] describes the header and page regions

pub mod file;
pub mod format;
pub mod namer;

pub use file::BackingFile;
pub use format::{FileHeader, PageHeader};
pub use namer::{NameGenerator, SequentialNames};
