//! Error types for bloomcount.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The result type used throughout bloomcount.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for bloomcount operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred on a backing file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A backing file failed validation when it was reopened.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// An invalid argument or option was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A command was invoked with the wrong number of arguments.
    #[error("wrong number of arguments for '{command}' command: expected {expected}, got {actual}")]
    WrongArity {
        /// The command name.
        command: String,
        /// The number of arguments the command takes.
        expected: usize,
        /// The number of arguments supplied.
        actual: usize,
    },

    /// No command is registered under the given name.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A command with the same name is already registered.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// No unique backing file could be created.
    #[error("could not create a unique filter file in {dir:?} after {attempts} attempts")]
    NameExhausted {
        /// Directory the allocator was writing to.
        dir: PathBuf,
        /// Number of names tried.
        attempts: u32,
    },

    /// Memory for a filter page could not be allocated.
    #[error("Cannot allocate memory: {0}")]
    OutOfMemory(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The external counter store reported a failure.
    #[error("Counter store error: {0}")]
    Counter(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new counter store error.
    pub fn counter(msg: impl Into<String>) -> Self {
        Error::Counter(msg.into())
    }

    /// Returns true if this error is a client usage error rather than a
    /// failure of the service itself.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Error::WrongArity { .. } | Error::UnknownCommand(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad page header");
        assert_eq!(err.to_string(), "Data corruption: bad page header");

        let err = Error::WrongArity { command: "bf.hincr".into(), expected: 2, actual: 3 };
        assert_eq!(
            err.to_string(),
            "wrong number of arguments for 'bf.hincr' command: expected 2, got 3"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_usage_error());
    }

    #[test]
    fn test_out_of_memory_display() {
        let err = Error::OutOfMemory("page of 64 bytes".into());
        assert_eq!(err.to_string(), "Cannot allocate memory: page of 64 bytes");
        assert!(!err.is_usage_error());
    }

    #[test]
    fn test_usage_errors() {
        assert!(Error::UnknownCommand("bf.nope".into()).is_usage_error());
        assert!(Error::WrongArity { command: "x".into(), expected: 0, actual: 1 }.is_usage_error());
        assert!(!Error::counter("down").is_usage_error());
    }
}
