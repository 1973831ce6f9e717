//! Typed command surface.
//!
//! Hosts decode their wire format into a command name plus arguments and
//! hand them to [`CommandTable::parse`], which checks the name and arity and
//! produces a [`Command`]. Exactly two commands exist:
//!
//! | Command | Arguments | Reply |
//! |---|---|---|
//! | `bf.hincr` | collection, sub-key | integer count |
//! | `bf.flushall` | none | OK |

use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;

/// Name of the check-and-count command.
pub const CHECK_AND_COUNT: &str = "bf.hincr";

/// Name of the flush command.
pub const FLUSH_ALL: &str = "bf.flushall";

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Count `sub_key` in `collection` if it was seen before, else record it.
    CheckAndCount {
        /// Collection name
        collection: Bytes,
        /// Sub-key to check
        sub_key: Bytes,
    },
    /// Drop every filter and clear the counter store.
    FlushAll,
}

/// Result of executing a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// An integer count.
    Integer(i64),
    /// Plain acknowledgement.
    Ok,
}

/// Which command a table entry builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// [`Command::CheckAndCount`]
    CheckAndCount,
    /// [`Command::FlushAll`]
    FlushAll,
}

/// A registered command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Lowercase command name
    pub name: &'static str,
    /// Number of arguments after the name
    pub arity: usize,
    /// What the command does
    pub kind: CommandKind,
}

/// Registered commands, looked up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    specs: HashMap<String, CommandSpec>,
}

impl CommandTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with both bloomcount commands.
    ///
    /// Fails as a whole if either registration fails.
    pub fn standard() -> Result<Self> {
        let mut table = Self::new();
        table.register(CommandSpec {
            name: CHECK_AND_COUNT,
            arity: 2,
            kind: CommandKind::CheckAndCount,
        })?;
        table.register(CommandSpec { name: FLUSH_ALL, arity: 0, kind: CommandKind::FlushAll })?;
        Ok(table)
    }

    /// Register a command. Names are unique regardless of case.
    pub fn register(&mut self, spec: CommandSpec) -> Result<()> {
        let key = spec.name.to_ascii_lowercase();
        if self.specs.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("command '{}'", spec.name)));
        }
        log::debug!("Registered command '{}' (arity {})", spec.name, spec.arity);
        self.specs.insert(key, spec);
        Ok(())
    }

    /// Look up a command by name.
    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(&name.to_ascii_lowercase())
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.specs.values().map(|spec| spec.name).collect();
        names.sort_unstable();
        names
    }

    /// Validate a request and build the command.
    ///
    /// `args` excludes the command name itself.
    pub fn parse<A: AsRef<[u8]>>(&self, name: &str, args: &[A]) -> Result<Command> {
        let spec = self.lookup(name).ok_or_else(|| Error::UnknownCommand(name.to_string()))?;

        if args.len() != spec.arity {
            return Err(Error::WrongArity {
                command: spec.name.to_string(),
                expected: spec.arity,
                actual: args.len(),
            });
        }

        Ok(match spec.kind {
            CommandKind::CheckAndCount => Command::CheckAndCount {
                collection: Bytes::copy_from_slice(args[0].as_ref()),
                sub_key: Bytes::copy_from_slice(args[1].as_ref()),
            },
            CommandKind::FlushAll => Command::FlushAll,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = CommandTable::standard().unwrap();
        assert_eq!(table.names(), vec![FLUSH_ALL, CHECK_AND_COUNT]);
        assert_eq!(table.lookup("BF.HINCR").unwrap().arity, 2);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut table = CommandTable::standard().unwrap();
        let result = table.register(CommandSpec {
            name: "BF.FLUSHALL",
            arity: 0,
            kind: CommandKind::FlushAll,
        });
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_parse_check_and_count() {
        let table = CommandTable::standard().unwrap();
        let cmd = table.parse("bf.hincr", &["users", "alice"]).unwrap();
        assert_eq!(
            cmd,
            Command::CheckAndCount {
                collection: Bytes::from_static(b"users"),
                sub_key: Bytes::from_static(b"alice"),
            }
        );
    }

    #[test]
    fn test_parse_wrong_arity() {
        let table = CommandTable::standard().unwrap();

        for args in [vec![], vec!["users"], vec!["users", "alice", "extra"]] {
            match table.parse("bf.hincr", &args) {
                Err(Error::WrongArity { expected, actual, .. }) => {
                    assert_eq!(expected, 2);
                    assert_eq!(actual, args.len());
                }
                other => panic!("Expected WrongArity, got {:?}", other),
            }
        }

        assert!(matches!(table.parse("bf.flushall", &["x"]), Err(Error::WrongArity { .. })));
    }

    #[test]
    fn test_parse_flushall() {
        let table = CommandTable::standard().unwrap();
        let none: [&[u8]; 0] = [];
        assert_eq!(table.parse("BF.FLUSHALL", &none).unwrap(), Command::FlushAll);
    }

    #[test]
    fn test_unknown_command() {
        let table = CommandTable::standard().unwrap();
        let none: [&[u8]; 0] = [];
        assert!(matches!(table.parse("bf.nope", &none), Err(Error::UnknownCommand(_))));
    }
}
