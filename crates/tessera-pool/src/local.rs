//! The in-process shard.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysinfo::System;
use tessera_store::Store;
use tessera_types::{Level, Ram, SetOptions, ShardId, User, Value};
use tessera_wal::TransactionLog;
use tracing::debug;

use crate::context::Context;
use crate::error::{PoolError, PoolResult};
use crate::shard::Shard;

/// Source of capacity figures for the local shard.
pub trait RamProbe: Send + Sync {
    fn sample(&self) -> Ram;
}

/// Reads host memory through `sysinfo`.
#[derive(Debug, Default)]
pub struct SystemRam;

const MB: u64 = 1024 * 1024;

impl RamProbe for SystemRam {
    fn sample(&self) -> Ram {
        let mut sys = System::new();
        sys.refresh_memory();
        Ram::new(sys.total_memory() / MB, sys.available_memory() / MB)
    }
}

/// Always reports the same figures.
#[derive(Clone, Copy, Debug)]
pub struct FixedRam(pub Ram);

impl RamProbe for FixedRam {
    fn sample(&self) -> Ram {
        self.0
    }
}

/// Shard backed by this node's [`Store`].
///
/// Committed mutations are written through to the transaction log, when
/// one is attached. Failed mutations are never logged. The local shard has
/// no address and is never offline.
pub struct LocalShard {
    store: Arc<Store>,
    log: Option<Arc<TransactionLog>>,
    probe: Box<dyn RamProbe>,
    ram: Mutex<Ram>,
}

impl LocalShard {
    pub fn new(store: Arc<Store>, log: Option<Arc<TransactionLog>>) -> Self {
        Self::with_probe(store, log, Box::new(SystemRam))
    }

    pub fn with_probe(
        store: Arc<Store>,
        log: Option<Arc<TransactionLog>>,
        probe: Box<dyn RamProbe>,
    ) -> Self {
        let ram = probe.sample();
        Self {
            store,
            log,
            probe,
            ram: Mutex::new(ram),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn log(&self) -> Option<&Arc<TransactionLog>> {
        self.log.as_ref()
    }
}

fn check(ctx: &Context) -> PoolResult<()> {
    if ctx.is_done() {
        Err(PoolError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl Shard for LocalShard {
    fn id(&self) -> ShardId {
        ShardId::LOCAL
    }

    fn address(&self) -> Option<&str> {
        None
    }

    fn ram(&self) -> Ram {
        *self.ram.lock().expect("ram lock poisoned")
    }

    fn is_offline(&self) -> bool {
        false
    }

    fn tries(&self) -> u32 {
        0
    }

    async fn refresh_ram(&self, _ctx: &Context) -> PoolResult<Ram> {
        let ram = self.probe.sample();
        *self.ram.lock().expect("ram lock poisoned") = ram;
        Ok(ram)
    }

    async fn reconnect(&self, _ctx: &Context) -> PoolResult<()> {
        Ok(())
    }

    async fn get(&self, ctx: &Context, key: &str) -> PoolResult<Value> {
        check(ctx)?;
        Ok(self.store.get(key)?)
    }

    async fn set(&self, ctx: &Context, key: &str, data: &str, opts: SetOptions) -> PoolResult<()> {
        check(ctx)?;
        self.store.set(key, data, &opts)?;
        debug!(key, "local set");
        if let Some(log) = &self.log {
            let value = Value::new(data)
                .read_only(opts.read_only)
                .with_level(opts.level);
            log.write_set(key, &value).await;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &Context, key: &str) -> PoolResult<()> {
        check(ctx)?;
        self.store.delete(key)?;
        if let Some(log) = &self.log {
            log.write_delete(key).await;
        }
        Ok(())
    }

    async fn create_object(&self, ctx: &Context, path: &str, level: Level) -> PoolResult<()> {
        check(ctx)?;
        self.store.create_object(path, level)?;
        if let Some(log) = &self.log {
            log.write_create_object(path, level).await;
        }
        Ok(())
    }

    async fn set_to_object(
        &self,
        ctx: &Context,
        path: &str,
        key: &str,
        data: &str,
        read_only: bool,
    ) -> PoolResult<()> {
        check(ctx)?;
        let opts = tessera_types::SetToObjectOptions {
            read_only,
            ..Default::default()
        };
        self.store.set_to_object(path, key, data, &opts)?;
        if let Some(log) = &self.log {
            log.write_set_to_object(path, key, data, read_only).await;
        }
        Ok(())
    }

    async fn get_from_object(&self, ctx: &Context, path: &str, key: &str) -> PoolResult<String> {
        check(ctx)?;
        Ok(self.store.get_from_object(path, key)?)
    }

    async fn object_to_json(&self, ctx: &Context, path: &str) -> PoolResult<String> {
        check(ctx)?;
        Ok(self.store.object_to_json(path)?)
    }

    async fn object_size(&self, ctx: &Context, path: &str) -> PoolResult<u64> {
        check(ctx)?;
        Ok(self.store.object_size(path)?)
    }

    async fn is_object(&self, ctx: &Context, path: &str) -> PoolResult<bool> {
        check(ctx)?;
        Ok(self.store.is_object(path))
    }

    async fn delete_object(&self, ctx: &Context, path: &str) -> PoolResult<()> {
        check(ctx)?;
        self.store.delete_object(path)?;
        if let Some(log) = &self.log {
            log.write_delete_object(path).await;
        }
        Ok(())
    }

    async fn attach_to_object(&self, ctx: &Context, dst: &str, src: &str) -> PoolResult<()> {
        check(ctx)?;
        self.store.attach_to_object(dst, src)?;
        if let Some(log) = &self.log {
            log.write_attach(dst, src).await;
        }
        Ok(())
    }

    async fn delete_attr(&self, ctx: &Context, path: &str, key: &str) -> PoolResult<()> {
        check(ctx)?;
        self.store.delete_attr(path, key)?;
        if let Some(log) = &self.log {
            log.write_delete_attr(path, key).await;
        }
        Ok(())
    }

    async fn put_user(&self, ctx: &Context, user: &User) -> PoolResult<()> {
        check(ctx)?;
        let mut stored = user.clone();
        stored.id = self.store.put_user(user.clone());
        if let Some(log) = &self.log {
            log.write_user(&stored).await;
        }
        Ok(())
    }

    async fn delete_user(&self, ctx: &Context, login: &str) -> PoolResult<()> {
        check(ctx)?;
        self.store.delete_user(login)?;
        if let Some(log) = &self.log {
            log.write_delete_user(login).await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocalShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalShard")
            .field("store", &self.store)
            .field("logged", &self.log.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::StoreError;
    use tessera_wal::WalConfig;

    fn shard() -> LocalShard {
        LocalShard::with_probe(
            Arc::new(Store::new()),
            None,
            Box::new(FixedRam(Ram::new(100, 40))),
        )
    }

    #[tokio::test]
    async fn local_shard_identity() {
        let s = shard();
        assert_eq!(s.id(), ShardId::LOCAL);
        assert!(s.address().is_none());
        assert!(!s.is_offline());
        assert_eq!(s.ram(), Ram::new(100, 40));
    }

    #[tokio::test]
    async fn values_round_trip() {
        let s = shard();
        let ctx = Context::background();
        s.set(&ctx, "k", "v", SetOptions::default()).await.unwrap();
        assert_eq!(s.get(&ctx, "k").await.unwrap().data, "v");
        s.delete(&ctx, "k").await.unwrap();
        let err = s.get(&ctx, "k").await.unwrap_err();
        assert!(matches!(err, PoolError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn cancelled_context_is_refused() {
        let s = shard();
        let ctx = Context::background();
        ctx.cancel();
        let err = s.set(&ctx, "k", "v", SetOptions::default()).await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
        assert_eq!(s.store().key_count(), 0);
    }

    #[tokio::test]
    async fn only_committed_mutations_reach_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WalConfig {
            sync_interval_ms: 60_000,
            ..WalConfig::in_dir(dir.path())
        };
        let log = Arc::new(TransactionLog::open(&cfg).unwrap());
        let s = LocalShard::with_probe(
            Arc::new(Store::new()),
            Some(Arc::clone(&log)),
            Box::new(FixedRam(Ram::default())),
        );
        let ctx = Context::background();

        s.set(&ctx, "a", "1", SetOptions::default().with_level(Level::Restricted))
            .await
            .unwrap();
        assert!(s.delete(&ctx, "missing").await.is_err());
        s.create_object(&ctx, "obj.inner", Level::Default).await.unwrap();
        s.set_to_object(&ctx, "obj.inner", "k", "v", true).await.unwrap();
        log.stop().await.unwrap();

        let replayed = Store::new();
        let stats = log.restore(&replayed).unwrap();
        assert_eq!(stats.events, 3);
        assert_eq!(replayed.get("a").unwrap().level, Level::Restricted);
        assert_eq!(replayed.get_from_object("obj.inner", "k").unwrap(), "v");
    }
}
