use async_trait::async_trait;
use tessera_types::{Level, Ram, SetOptions, ShardId, User, Value};

use crate::context::Context;
use crate::error::PoolResult;

/// One storage backend in the pool.
///
/// The pool holds every shard, local or remote, behind this trait and
/// never branches on which kind it has. Health accessors are synchronous
/// snapshots; data operations take the caller's [`Context`] and fail with
/// [`PoolError::Cancelled`](crate::PoolError::Cancelled) once it is done.
#[async_trait]
pub trait Shard: Send + Sync {
    fn id(&self) -> ShardId;

    /// Network address, `None` for the local shard.
    fn address(&self) -> Option<&str>;

    /// Last known capacity.
    fn ram(&self) -> Ram;

    fn is_offline(&self) -> bool;

    /// Consecutive transport failures since the last successful call.
    fn tries(&self) -> u32;

    /// Fetch fresh capacity figures and remember them.
    async fn refresh_ram(&self, ctx: &Context) -> PoolResult<Ram>;

    /// Re-establish the connection of an offline shard.
    async fn reconnect(&self, ctx: &Context) -> PoolResult<()>;

    async fn get(&self, ctx: &Context, key: &str) -> PoolResult<Value>;
    async fn set(&self, ctx: &Context, key: &str, data: &str, opts: SetOptions) -> PoolResult<()>;
    async fn delete(&self, ctx: &Context, key: &str) -> PoolResult<()>;

    async fn create_object(&self, ctx: &Context, path: &str, level: Level) -> PoolResult<()>;
    async fn set_to_object(
        &self,
        ctx: &Context,
        path: &str,
        key: &str,
        data: &str,
        read_only: bool,
    ) -> PoolResult<()>;
    async fn get_from_object(&self, ctx: &Context, path: &str, key: &str) -> PoolResult<String>;
    async fn object_to_json(&self, ctx: &Context, path: &str) -> PoolResult<String>;
    async fn object_size(&self, ctx: &Context, path: &str) -> PoolResult<u64>;
    async fn is_object(&self, ctx: &Context, path: &str) -> PoolResult<bool>;
    async fn delete_object(&self, ctx: &Context, path: &str) -> PoolResult<()>;
    async fn attach_to_object(&self, ctx: &Context, dst: &str, src: &str) -> PoolResult<()>;
    async fn delete_attr(&self, ctx: &Context, path: &str, key: &str) -> PoolResult<()>;

    /// Insert or replace a user record, keyed by login.
    async fn put_user(&self, ctx: &Context, user: &User) -> PoolResult<()>;
    async fn delete_user(&self, ctx: &Context, login: &str) -> PoolResult<()>;
}
