//! Shards reached through a [`ShardClient`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tessera_types::{Level, Ram, SetOptions, ShardId, User, Value};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{PoolError, PoolResult};
use crate::rpc::{Connector, ShardClient, ShardRequest, ShardResponse};
use crate::shard::Shard;

/// A shard on another node.
///
/// Every transport failure bumps the retry counter; any successful call
/// resets it. The shard is offline while it has no connection or once the
/// counter reaches `max_tries`; the health loop then takes over
/// reconnection or removal.
pub struct RemoteShard {
    id: ShardId,
    address: String,
    client: RwLock<Option<Arc<dyn ShardClient>>>,
    connector: Arc<dyn Connector>,
    ram: Mutex<Ram>,
    tries: AtomicU32,
    max_tries: u32,
    connect_timeout: Duration,
}

impl RemoteShard {
    /// Connect to `address` and read its capacity.
    pub async fn connect(
        ctx: &Context,
        id: ShardId,
        address: &str,
        connector: Arc<dyn Connector>,
        max_tries: u32,
        connect_timeout: Duration,
    ) -> PoolResult<Self> {
        let shard = Self::disconnected(id, address, connector, max_tries, connect_timeout);
        shard.reconnect(ctx).await?;
        Ok(shard)
    }

    /// A shard that starts offline and waits for the health loop to
    /// connect it.
    pub fn disconnected(
        id: ShardId,
        address: &str,
        connector: Arc<dyn Connector>,
        max_tries: u32,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            id,
            address: address.to_string(),
            client: RwLock::new(None),
            connector,
            ram: Mutex::new(Ram::default()),
            tries: AtomicU32::new(0),
            max_tries,
            connect_timeout,
        }
    }

    fn client(&self) -> PoolResult<Arc<dyn ShardClient>> {
        self.client
            .read()
            .expect("client lock poisoned")
            .clone()
            .ok_or_else(|| PoolError::Unavailable {
                shard: self.id,
                reason: "not connected".into(),
            })
    }

    fn record_failure(&self, err: &PoolError) {
        let tries = self.tries.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(shard = %self.id, tries, error = %err, "shard call failed");
    }

    fn record_success(&self) {
        self.tries.store(0, Ordering::SeqCst);
    }

    /// Send one request. Waiting stops as soon as `ctx` is done.
    async fn call(&self, ctx: &Context, request: ShardRequest) -> PoolResult<ShardResponse> {
        if ctx.is_done() {
            return Err(PoolError::Cancelled);
        }
        let name = request.name();
        let client = match self.client() {
            Ok(client) => client,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };

        let result = tokio::select! {
            r = client.call(ctx, request) => r,
            _ = ctx.done() => return Err(PoolError::Cancelled),
        };

        match result {
            Ok(response) => {
                self.record_success();
                debug!(shard = %self.id, call = name, "shard call ok");
                Ok(response)
            }
            Err(e) if e.is_transport() => {
                self.record_failure(&e);
                Err(PoolError::Unavailable {
                    shard: self.id,
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                // The shard answered; the connection is healthy.
                self.record_success();
                Err(e)
            }
        }
    }

    fn unexpected(&self, response: ShardResponse) -> PoolError {
        PoolError::Protocol {
            shard: self.id,
            detail: format!("{response:?}"),
        }
    }

    async fn call_done(&self, ctx: &Context, request: ShardRequest) -> PoolResult<()> {
        match self.call(ctx, request).await? {
            ShardResponse::Done => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    async fn call_text(&self, ctx: &Context, request: ShardRequest) -> PoolResult<String> {
        match self.call(ctx, request).await? {
            ShardResponse::Text(text) => Ok(text),
            other => Err(self.unexpected(other)),
        }
    }
}

#[async_trait]
impl Shard for RemoteShard {
    fn id(&self) -> ShardId {
        self.id
    }

    fn address(&self) -> Option<&str> {
        Some(&self.address)
    }

    fn ram(&self) -> Ram {
        *self.ram.lock().expect("ram lock poisoned")
    }

    fn is_offline(&self) -> bool {
        self.client.read().expect("client lock poisoned").is_none()
            || self.tries.load(Ordering::SeqCst) >= self.max_tries
    }

    fn tries(&self) -> u32 {
        self.tries.load(Ordering::SeqCst)
    }

    async fn refresh_ram(&self, ctx: &Context) -> PoolResult<Ram> {
        match self.call(ctx, ShardRequest::Ram).await? {
            ShardResponse::Ram(ram) => {
                *self.ram.lock().expect("ram lock poisoned") = ram;
                Ok(ram)
            }
            other => Err(self.unexpected(other)),
        }
    }

    async fn reconnect(&self, ctx: &Context) -> PoolResult<()> {
        let ctx = ctx.child_with_timeout(self.connect_timeout);
        let connected = tokio::select! {
            r = self.connector.connect(&ctx, &self.address) => r,
            _ = ctx.done() => Err(PoolError::Connect {
                address: self.address.clone(),
                reason: "timed out".into(),
            }),
        };
        let client = match connected {
            Ok(client) => client,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };
        *self.client.write().expect("client lock poisoned") = Some(client);
        self.refresh_ram(&ctx).await?;
        debug!(shard = %self.id, address = %self.address, "shard connected");
        Ok(())
    }

    async fn get(&self, ctx: &Context, key: &str) -> PoolResult<Value> {
        let request = ShardRequest::Get {
            key: key.to_string(),
        };
        match self.call(ctx, request).await? {
            ShardResponse::Value(value) => Ok(value),
            other => Err(self.unexpected(other)),
        }
    }

    async fn set(&self, ctx: &Context, key: &str, data: &str, opts: SetOptions) -> PoolResult<()> {
        let request = ShardRequest::Set {
            key: key.to_string(),
            data: data.to_string(),
            opts,
        };
        self.call_done(ctx, request).await
    }

    async fn delete(&self, ctx: &Context, key: &str) -> PoolResult<()> {
        let request = ShardRequest::Delete {
            key: key.to_string(),
        };
        self.call_done(ctx, request).await
    }

    async fn create_object(&self, ctx: &Context, path: &str, level: Level) -> PoolResult<()> {
        let request = ShardRequest::CreateObject {
            path: path.to_string(),
            level,
        };
        self.call_done(ctx, request).await
    }

    async fn set_to_object(
        &self,
        ctx: &Context,
        path: &str,
        key: &str,
        data: &str,
        read_only: bool,
    ) -> PoolResult<()> {
        let request = ShardRequest::SetToObject {
            path: path.to_string(),
            key: key.to_string(),
            data: data.to_string(),
            read_only,
        };
        self.call_done(ctx, request).await
    }

    async fn get_from_object(&self, ctx: &Context, path: &str, key: &str) -> PoolResult<String> {
        let request = ShardRequest::GetFromObject {
            path: path.to_string(),
            key: key.to_string(),
        };
        self.call_text(ctx, request).await
    }

    async fn object_to_json(&self, ctx: &Context, path: &str) -> PoolResult<String> {
        let request = ShardRequest::ObjectToJson {
            path: path.to_string(),
        };
        self.call_text(ctx, request).await
    }

    async fn object_size(&self, ctx: &Context, path: &str) -> PoolResult<u64> {
        let request = ShardRequest::ObjectSize {
            path: path.to_string(),
        };
        match self.call(ctx, request).await? {
            ShardResponse::Size(size) => Ok(size),
            other => Err(self.unexpected(other)),
        }
    }

    async fn is_object(&self, ctx: &Context, path: &str) -> PoolResult<bool> {
        let request = ShardRequest::IsObject {
            path: path.to_string(),
        };
        match self.call(ctx, request).await? {
            ShardResponse::Flag(flag) => Ok(flag),
            other => Err(self.unexpected(other)),
        }
    }

    async fn delete_object(&self, ctx: &Context, path: &str) -> PoolResult<()> {
        let request = ShardRequest::DeleteObject {
            path: path.to_string(),
        };
        self.call_done(ctx, request).await
    }

    async fn attach_to_object(&self, ctx: &Context, dst: &str, src: &str) -> PoolResult<()> {
        let request = ShardRequest::AttachToObject {
            dst: dst.to_string(),
            src: src.to_string(),
        };
        self.call_done(ctx, request).await
    }

    async fn delete_attr(&self, ctx: &Context, path: &str, key: &str) -> PoolResult<()> {
        let request = ShardRequest::DeleteAttr {
            path: path.to_string(),
            key: key.to_string(),
        };
        self.call_done(ctx, request).await
    }

    async fn put_user(&self, ctx: &Context, user: &User) -> PoolResult<()> {
        let request = ShardRequest::PutUser { user: user.clone() };
        self.call_done(ctx, request).await
    }

    async fn delete_user(&self, ctx: &Context, login: &str) -> PoolResult<()> {
        let request = ShardRequest::DeleteUser {
            login: login.to_string(),
        };
        self.call_done(ctx, request).await
    }
}

impl std::fmt::Debug for RemoteShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteShard")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("tries", &self.tries())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{FixedRam, LocalShard};
    use crate::rpc::InProcessConnector;
    use tessera_store::{Store, StoreError};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn peer(connector: &InProcessConnector, address: &str, ram: Ram) -> Arc<crate::rpc::InProcessClient> {
        let shard = LocalShard::with_probe(Arc::new(Store::new()), None, Box::new(FixedRam(ram)));
        connector.register(address, Arc::new(shard))
    }

    #[tokio::test]
    async fn connect_reads_capacity() {
        let connector = Arc::new(InProcessConnector::new());
        peer(&connector, "p:1", Ram::new(100, 70));
        let ctx = Context::background();
        let shard = RemoteShard::connect(&ctx, ShardId::new(1), "p:1", connector, 3, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(shard.ram(), Ram::new(100, 70));
        assert!(!shard.is_offline());
        assert_eq!(shard.address(), Some("p:1"));
    }

    #[tokio::test]
    async fn transport_failures_count_toward_offline() {
        let connector = Arc::new(InProcessConnector::new());
        let client = peer(&connector, "p:1", Ram::new(100, 70));
        let ctx = Context::background();
        let shard = RemoteShard::connect(&ctx, ShardId::new(1), "p:1", connector, 2, TIMEOUT)
            .await
            .unwrap();

        client.set_reachable(false);
        assert!(matches!(shard.get(&ctx, "k").await, Err(PoolError::Unavailable { .. })));
        assert_eq!(shard.tries(), 1);
        assert!(!shard.is_offline());
        assert!(shard.get(&ctx, "k").await.is_err());
        assert!(shard.is_offline());

        client.set_reachable(true);
        shard.reconnect(&ctx).await.unwrap();
        assert_eq!(shard.tries(), 0);
    }

    #[tokio::test]
    async fn shard_errors_pass_through_and_reset_tries() {
        let connector = Arc::new(InProcessConnector::new());
        peer(&connector, "p:1", Ram::new(100, 70));
        let ctx = Context::background();
        let shard = RemoteShard::connect(&ctx, ShardId::new(1), "p:1", connector, 3, TIMEOUT)
            .await
            .unwrap();
        let err = shard.get(&ctx, "absent").await.unwrap_err();
        assert!(matches!(err, PoolError::Store(StoreError::NotFound(_))));
        assert_eq!(shard.tries(), 0);

        shard.set(&ctx, "k", "v", SetOptions::default()).await.unwrap();
        assert_eq!(shard.get(&ctx, "k").await.unwrap().data, "v");
    }

    #[tokio::test]
    async fn disconnected_shard_starts_offline() {
        let connector: Arc<dyn Connector> = Arc::new(InProcessConnector::new());
        let shard = RemoteShard::disconnected(ShardId::new(3), "gone:1", connector, 3, TIMEOUT);
        assert!(shard.is_offline());
        assert_eq!(shard.tries(), 0);
        assert!(shard.reconnect(&Context::background()).await.is_err());
        assert_eq!(shard.tries(), 1);
        assert!(shard.is_offline());
    }
}
