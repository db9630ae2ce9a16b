use std::fmt;

use thiserror::Error;

/// Errors produced by type conversions and name validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid level value: {0}")]
    InvalidLevel(String),

    #[error("name must not be empty")]
    EmptyName,

    #[error("path {0:?} contains an empty segment")]
    EmptySegment(String),
}

/// Transport-neutral classification of a failure.
///
/// Every error type in the workspace can be reduced to one of these kinds so
/// that a transport layer can map outcomes to its own status codes without
/// matching nested error enums.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ObjectNotFound,
    AlreadyExists,
    CircularAttachment,
    Forbidden,
    InvalidName,
    Unavailable,
    UnknownShard,
    CorruptedLog,
    NoShardsAvailable,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::ObjectNotFound => "object not found",
            Self::AlreadyExists => "already exists",
            Self::CircularAttachment => "circular attachment",
            Self::Forbidden => "forbidden",
            Self::InvalidName => "invalid name",
            Self::Unavailable => "unavailable",
            Self::UnknownShard => "unknown shard",
            Self::CorruptedLog => "corrupted log",
            Self::NoShardsAvailable => "no shards available",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl TypeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidLevel(_) => ErrorKind::Internal,
            Self::EmptyName | Self::EmptySegment(_) => ErrorKind::InvalidName,
        }
    }
}
