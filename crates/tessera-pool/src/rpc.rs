//! Request/response records exchanged with remote shards, and the client
//! seam they travel through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_types::{Level, Ram, SetOptions, ShardId, User, Value};

use crate::context::Context;
use crate::error::{PoolError, PoolResult};
use crate::local::LocalShard;
use crate::shard::Shard;

/// One call against a shard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShardRequest {
    Ping,
    Ram,
    Get { key: String },
    Set { key: String, data: String, opts: SetOptions },
    Delete { key: String },
    CreateObject { path: String, level: Level },
    SetToObject { path: String, key: String, data: String, read_only: bool },
    GetFromObject { path: String, key: String },
    ObjectToJson { path: String },
    ObjectSize { path: String },
    IsObject { path: String },
    DeleteObject { path: String },
    AttachToObject { dst: String, src: String },
    DeleteAttr { path: String, key: String },
    PutUser { user: User },
    DeleteUser { login: String },
}

impl ShardRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Ram => "Ram",
            Self::Get { .. } => "Get",
            Self::Set { .. } => "Set",
            Self::Delete { .. } => "Delete",
            Self::CreateObject { .. } => "CreateObject",
            Self::SetToObject { .. } => "SetToObject",
            Self::GetFromObject { .. } => "GetFromObject",
            Self::ObjectToJson { .. } => "ObjectToJson",
            Self::ObjectSize { .. } => "ObjectSize",
            Self::IsObject { .. } => "IsObject",
            Self::DeleteObject { .. } => "DeleteObject",
            Self::AttachToObject { .. } => "AttachToObject",
            Self::DeleteAttr { .. } => "DeleteAttr",
            Self::PutUser { .. } => "PutUser",
            Self::DeleteUser { .. } => "DeleteUser",
        }
    }

    /// The key or object path the request addresses, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Ping | Self::Ram => None,
            Self::Get { key } | Self::Set { key, .. } | Self::Delete { key } => Some(key),
            Self::CreateObject { path, .. }
            | Self::SetToObject { path, .. }
            | Self::GetFromObject { path, .. }
            | Self::ObjectToJson { path }
            | Self::ObjectSize { path }
            | Self::IsObject { path }
            | Self::DeleteObject { path }
            | Self::DeleteAttr { path, .. } => Some(path),
            Self::AttachToObject { dst, .. } => Some(dst),
            Self::PutUser { user } => Some(&user.login),
            Self::DeleteUser { login } => Some(login),
        }
    }
}

/// Successful answer to a [`ShardRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShardResponse {
    Done,
    Ram(Ram),
    Value(Value),
    Text(String),
    Size(u64),
    Flag(bool),
}

/// Connection to one remote shard.
///
/// Transport failures surface as [`PoolError::Unavailable`]; errors the
/// shard itself reports (not found, conflicts) come back unchanged.
#[async_trait]
pub trait ShardClient: Send + Sync {
    async fn call(&self, ctx: &Context, request: ShardRequest) -> PoolResult<ShardResponse>;
}

/// Opens [`ShardClient`]s by address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, ctx: &Context, address: &str) -> PoolResult<Arc<dyn ShardClient>>;
}

/// Execute a request against a shard.
pub async fn serve(shard: &dyn Shard, ctx: &Context, request: ShardRequest) -> PoolResult<ShardResponse> {
    Ok(match request {
        ShardRequest::Ping => ShardResponse::Done,
        ShardRequest::Ram => ShardResponse::Ram(shard.refresh_ram(ctx).await?),
        ShardRequest::Get { key } => ShardResponse::Value(shard.get(ctx, &key).await?),
        ShardRequest::Set { key, data, opts } => {
            shard.set(ctx, &key, &data, opts).await?;
            ShardResponse::Done
        }
        ShardRequest::Delete { key } => {
            shard.delete(ctx, &key).await?;
            ShardResponse::Done
        }
        ShardRequest::CreateObject { path, level } => {
            shard.create_object(ctx, &path, level).await?;
            ShardResponse::Done
        }
        ShardRequest::SetToObject {
            path,
            key,
            data,
            read_only,
        } => {
            shard.set_to_object(ctx, &path, &key, &data, read_only).await?;
            ShardResponse::Done
        }
        ShardRequest::GetFromObject { path, key } => {
            ShardResponse::Text(shard.get_from_object(ctx, &path, &key).await?)
        }
        ShardRequest::ObjectToJson { path } => {
            ShardResponse::Text(shard.object_to_json(ctx, &path).await?)
        }
        ShardRequest::ObjectSize { path } => {
            ShardResponse::Size(shard.object_size(ctx, &path).await?)
        }
        ShardRequest::IsObject { path } => ShardResponse::Flag(shard.is_object(ctx, &path).await?),
        ShardRequest::DeleteObject { path } => {
            shard.delete_object(ctx, &path).await?;
            ShardResponse::Done
        }
        ShardRequest::AttachToObject { dst, src } => {
            shard.attach_to_object(ctx, &dst, &src).await?;
            ShardResponse::Done
        }
        ShardRequest::DeleteAttr { path, key } => {
            shard.delete_attr(ctx, &path, &key).await?;
            ShardResponse::Done
        }
        ShardRequest::PutUser { user } => {
            shard.put_user(ctx, &user).await?;
            ShardResponse::Done
        }
        ShardRequest::DeleteUser { login } => {
            shard.delete_user(ctx, &login).await?;
            ShardResponse::Done
        }
    })
}

/// Client that serves requests from a [`LocalShard`] in the same process.
///
/// Used to run several nodes inside one process. Marking the client
/// unreachable makes every call fail as a transport error.
pub struct InProcessClient {
    target: Arc<LocalShard>,
    reachable: AtomicBool,
}

impl InProcessClient {
    pub fn new(target: Arc<LocalShard>) -> Self {
        Self {
            target,
            reachable: AtomicBool::new(true),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn target(&self) -> &Arc<LocalShard> {
        &self.target
    }
}

#[async_trait]
impl ShardClient for InProcessClient {
    async fn call(&self, ctx: &Context, request: ShardRequest) -> PoolResult<ShardResponse> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(PoolError::Unavailable {
                shard: ShardId::LOCAL,
                reason: "peer unreachable".into(),
            });
        }
        serve(self.target.as_ref(), ctx, request).await
    }
}

/// Address book of [`InProcessClient`]s.
#[derive(Default)]
pub struct InProcessConnector {
    peers: RwLock<HashMap<String, Arc<InProcessClient>>>,
}

impl InProcessConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `shard` reachable under `address`.
    pub fn register(&self, address: &str, shard: Arc<LocalShard>) -> Arc<InProcessClient> {
        let client = Arc::new(InProcessClient::new(shard));
        self.peers
            .write()
            .expect("peers lock poisoned")
            .insert(address.to_string(), Arc::clone(&client));
        client
    }

    pub fn unregister(&self, address: &str) -> bool {
        self.peers
            .write()
            .expect("peers lock poisoned")
            .remove(address)
            .is_some()
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn connect(&self, _ctx: &Context, address: &str) -> PoolResult<Arc<dyn ShardClient>> {
        let peers = self.peers.read().expect("peers lock poisoned");
        match peers.get(address) {
            Some(client) if client.reachable.load(Ordering::SeqCst) => {
                Ok(Arc::clone(client) as Arc<dyn ShardClient>)
            }
            _ => Err(PoolError::Connect {
                address: address.to_string(),
                reason: "no such peer".into(),
            }),
        }
    }
}
