//! Error taxonomy shared by the command engine, persistence and replication.
//!
//! No `anyhow`/`thiserror` here by convention — plain enums with a
//! hand-written `Display` that renders the exact wire text a client sees,
//! mirroring the rest of the pack's preference for small, local error types
//! over a blanket error crate.

use std::fmt;
use std::io;

/// Errors surfaced to a connected client as a `-ERR ...` reply.
#[derive(Debug)]
pub enum StoreError {
    UnknownCommand(String),
    WrongArity(String),
    WrongKind,
    IndexOutOfRange,
    NoSuchKey,
    Syntax,
    NotAuthenticated,
    DenyOom,
    NotAnInteger,
    NotAFloat,
    BackgroundSaveInProgress,
    Custom(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownCommand(name) => write!(f, "unknown command '{name}'"),
            StoreError::WrongArity(name) => {
                write!(f, "wrong number of arguments for '{name}'")
            }
            StoreError::WrongKind => {
                write!(f, "Operation against a key holding the wrong kind of value")
            }
            StoreError::IndexOutOfRange => write!(f, "index out of range"),
            StoreError::NoSuchKey => write!(f, "no such key"),
            StoreError::Syntax => write!(f, "syntax error"),
            StoreError::NotAuthenticated => write!(f, "operation not permitted"),
            StoreError::DenyOom => {
                write!(f, "command not allowed when used memory > 'maxmemory'")
            }
            StoreError::NotAnInteger => write!(f, "value is not an integer or out of range"),
            StoreError::NotAFloat => write!(f, "value is not a valid float"),
            StoreError::BackgroundSaveInProgress => write!(f, "background save in progress"),
            StoreError::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Custom(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_spec_error_text() {
        assert_eq!(
            StoreError::WrongKind.to_string(),
            "Operation against a key holding the wrong kind of value"
        );
        assert_eq!(
            StoreError::UnknownCommand("FOO".into()).to_string(),
            "unknown command 'FOO'"
        );
        assert_eq!(
            StoreError::DenyOom.to_string(),
            "command not allowed when used memory > 'maxmemory'"
        );
    }
}
