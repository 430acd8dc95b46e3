//! Error types for the engine core.

use std::error::Error;
use std::fmt;
use std::io;

/// Error type covering the fallible surfaces of the engine core: position
/// setup, move text, tablebase files and hash persistence.
#[derive(Debug)]
pub enum EngineError {
    /// I/O operation failed
    Io(io::Error),
    /// Malformed FEN string
    Fen(String),
    /// Unparseable or illegal move text
    MoveText(String),
    /// Corrupt or unreadable tablebase file
    Tablebase(String),
    /// Corrupt or incompatible hash dump
    HashFile(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io(err) => write!(f, "IO error: {err}"),
            EngineError::Fen(msg) => write!(f, "FEN error: {msg}"),
            EngineError::MoveText(msg) => write!(f, "move error: {msg}"),
            EngineError::Tablebase(msg) => write!(f, "tablebase error: {msg}"),
            EngineError::HashFile(msg) => write!(f, "hash file error: {msg}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Io(err)
    }
}
