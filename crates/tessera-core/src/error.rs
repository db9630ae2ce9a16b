use tessera_pool::PoolError;
use tessera_store::StoreError;
use tessera_types::{ErrorKind, ShardId};
use tessera_wal::WalError;

/// Errors returned by the router and the node.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pool(PoolError),

    #[error(transparent)]
    Wal(#[from] WalError),

    /// The caller's level is below the resource's level.
    #[error("forbidden")]
    Forbidden,

    /// Login or password did not match an active user.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The session token is unknown or its user no longer exists.
    #[error("invalid session token")]
    InvalidToken,

    /// A set-to-all reached some shards but not others.
    #[error("some shards did not receive the value: {}", format_ids(.failed))]
    PartialBroadcast { failed: Vec<ShardId> },

    #[error("config error: {0}")]
    Config(String),
}

fn format_ids(ids: &[ShardId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Pool(e) => e.kind(),
            Self::Wal(e) => e.kind(),
            Self::Forbidden | Self::InvalidCredentials | Self::InvalidToken => ErrorKind::Forbidden,
            Self::PartialBroadcast { .. } => ErrorKind::Unavailable,
            Self::Config(_) => ErrorKind::Internal,
        }
    }
}

/// Shard errors that carry a store error are reported as that store error.
impl From<PoolError> for CoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Store(e) => Self::Store(e),
            other => Self::Pool(other),
        }
    }
}

/// Result alias for router and node operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_wrapped_error() {
        let e = CoreError::from(PoolError::Store(StoreError::NotFound("k".into())));
        assert!(matches!(e, CoreError::Store(StoreError::NotFound(_))));
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert_eq!(
            CoreError::from(PoolError::UnknownShard(ShardId::new(4))).kind(),
            ErrorKind::UnknownShard
        );
        assert_eq!(CoreError::Forbidden.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn partial_broadcast_lists_shards() {
        let e = CoreError::PartialBroadcast {
            failed: vec![ShardId::new(2), ShardId::new(5)],
        };
        assert_eq!(e.to_string(), "some shards did not receive the value: s#2, s#5");
    }
}
