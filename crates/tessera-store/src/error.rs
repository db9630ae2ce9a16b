use tessera_types::{ErrorKind, TypeError};

/// Errors from storage engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// No object resolves at the given path.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The key exists and may not be overwritten (unique write or read-only value).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A path segment names a value where an object was expected.
    #[error("path conflict at {path}: {segment} is a value")]
    PathConflict { path: String, segment: String },

    /// Attaching `src` under `dst` would make an object reachable from itself.
    #[error("circular attachment: {src} is already reachable from {dst}")]
    CircularAttachment { dst: String, src: String },

    /// The name or path is malformed.
    #[error("invalid name: {0}")]
    InvalidName(#[from] TypeError),

    /// No active user with this login or id.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// An active user with this login already exists.
    #[error("user already exists: {0}")]
    UserExists(String),

    /// JSON rendering failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::UserNotFound(_) => ErrorKind::NotFound,
            Self::ObjectNotFound(_) => ErrorKind::ObjectNotFound,
            Self::AlreadyExists(_) | Self::PathConflict { .. } | Self::UserExists(_) => {
                ErrorKind::AlreadyExists
            }
            Self::CircularAttachment { .. } => ErrorKind::CircularAttachment,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::ObjectNotFound)
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
