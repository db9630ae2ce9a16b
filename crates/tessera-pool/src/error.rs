use tessera_store::StoreError;
use tessera_types::{ErrorKind, ShardId};

/// Errors produced by the shard pool and by individual shards.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The shard executed the call and its store refused it.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The shard could not be reached.
    #[error("shard {shard} unavailable: {reason}")]
    Unavailable { shard: ShardId, reason: String },

    /// No shard is registered under this id.
    #[error("unknown shard {0}")]
    UnknownShard(ShardId),

    /// No online shard can take a placement.
    #[error("no shards available")]
    NoShardsAvailable,

    /// No shard holds the key.
    #[error("key not found on any shard: {0}")]
    NotFound(String),

    /// A shard with this address is already registered.
    #[error("shard already connected: {0}")]
    AlreadyConnected(String),

    /// The initial connection to a new shard failed.
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// The caller's context was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// The shard answered with a response that does not fit the request.
    #[error("unexpected response from shard {shard}: {detail}")]
    Protocol { shard: ShardId, detail: String },

    /// Cluster membership could not be loaded or saved.
    #[error("cluster config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Unavailable { .. } | Self::Connect { .. } => ErrorKind::Unavailable,
            Self::UnknownShard(_) => ErrorKind::UnknownShard,
            Self::NoShardsAvailable => ErrorKind::NoShardsAvailable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyConnected(_) => ErrorKind::AlreadyExists,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Protocol { .. } | Self::Config(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failure came from reaching the shard rather than from the
    /// shard's answer. Only these count against a shard's retry budget.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Connect { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::ObjectNotFound)
    }
}

/// Convenience alias used throughout the pool crate.
pub type PoolResult<T> = std::result::Result<T, PoolError>;
