use std::io;
use std::path::PathBuf;

use tessera_types::ErrorKind;

/// Errors produced by the transaction log.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// I/O error while reading or writing a segment.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A segment line could not be decoded. Recovery stops here.
    #[error("corrupted log: segment {segment}, line {line}: {reason}")]
    Corrupted {
        segment: u64,
        line: usize,
        reason: String,
    },

    /// The log directory exists but is not a directory.
    #[error("log path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Flushing buffered events to the active segment failed.
    #[error("flush to segment {segment} failed: {source}")]
    Flush {
        segment: u64,
        #[source]
        source: io::Error,
    },

    /// Opening the next segment during rotation failed.
    #[error("rotation to segment {segment} failed: {source}")]
    Rotate {
        segment: u64,
        #[source]
        source: io::Error,
    },
}

impl WalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Corrupted { .. } => ErrorKind::CorruptedLog,
            _ => ErrorKind::Internal,
        }
    }
}

/// Convenience alias used throughout the log crate.
pub type WalResult<T> = std::result::Result<T, WalError>;
