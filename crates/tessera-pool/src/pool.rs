use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tessera_types::{SetOptions, ShardId, ShardTarget, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ClusterConfig, PoolConfig};
use crate::context::Context;
use crate::error::{PoolError, PoolResult};
use crate::gate::AdmissionGate;
use crate::remote::RemoteShard;
use crate::rpc::Connector;
use crate::shard::Shard;

/// Result of [`ShardPool::add_shard`].
#[derive(Clone, Debug)]
pub struct AddedShard {
    pub id: ShardId,
    /// Whether the initial connection succeeded. A forced shard that failed
    /// to connect waits for the health loop.
    pub connected: bool,
    /// Membership after the addition, to be persisted by the caller.
    pub config: ClusterConfig,
}

/// A mutation sent to every shard.
#[derive(Clone, Debug)]
pub enum BroadcastOp {
    Set {
        key: String,
        data: String,
        opts: SetOptions,
    },
    Delete {
        key: String,
    },
}

/// Per-shard outcome of a broadcast, each list in ascending id order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub succeeded: Vec<ShardId>,
    pub failed: Vec<ShardId>,
}

/// Outcome of one health pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub refreshed: usize,
    pub reconnected: Vec<ShardId>,
    pub removed: Vec<ShardId>,
}

/// Single result slot written by exactly one task.
struct ResultSlot<T> {
    claimed: AtomicBool,
    value: Mutex<Option<T>>,
}

impl<T> ResultSlot<T> {
    fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            value: Mutex::new(None),
        }
    }

    /// Store `value` if no other task has. Returns whether this call won.
    fn offer(&self, value: T) -> bool {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.value.lock().expect("slot lock poisoned") = Some(value);
        true
    }

    fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<T> {
        self.value.lock().expect("slot lock poisoned").take()
    }
}

/// Membership, placement and fan-out over the set of shards.
///
/// The pool knows nothing about objects or permissions. It hands out
/// shards, picks one for new data, searches all of them for a key,
/// broadcasts mutations, and keeps remote shards healthy.
///
/// Cluster membership is passed in as a [`ClusterConfig`] and every change
/// returns the updated config; persisting it is the caller's business.
pub struct ShardPool {
    shards: RwLock<BTreeMap<ShardId, Arc<dyn Shard>>>,
    cluster: Mutex<ClusterConfig>,
    connector: Arc<dyn Connector>,
    gate: AdmissionGate,
    fanout: Arc<Semaphore>,
    config: PoolConfig,
}

impl ShardPool {
    pub fn new(config: PoolConfig, cluster: ClusterConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            shards: RwLock::new(BTreeMap::new()),
            cluster: Mutex::new(cluster),
            connector,
            gate: AdmissionGate::new(config.admission_capacity),
            fanout: Arc::new(Semaphore::new(config.fanout_limit.max(1))),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The admission gate shared by every routed operation.
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn cluster(&self) -> ClusterConfig {
        self.cluster.lock().expect("cluster lock poisoned").clone()
    }

    /// Register a shard that is already constructed, such as the local one.
    pub fn insert(&self, shard: Arc<dyn Shard>) {
        let id = shard.id();
        self.shards
            .write()
            .expect("shards lock poisoned")
            .insert(id, shard);
        debug!(shard = %id, "shard registered");
    }

    pub fn len(&self) -> usize {
        self.shards.read().expect("shards lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ShardId> {
        self.shards
            .read()
            .expect("shards lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Shard>> {
        self.shards
            .read()
            .expect("shards lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Every shard that currently reports itself online, in id order.
    pub fn online(&self) -> Vec<Arc<dyn Shard>> {
        self.snapshot()
            .into_iter()
            .filter(|s| !s.is_offline())
            .collect()
    }

    fn has_address(&self, address: &str) -> bool {
        self.shards
            .read()
            .expect("shards lock poisoned")
            .values()
            .any(|s| s.address() == Some(address))
    }

    /// Connect a new remote shard and give it the next free id.
    ///
    /// With `force`, a shard whose initial connection fails is registered
    /// anyway and left to the health loop.
    pub async fn add_shard(
        &self,
        ctx: &Context,
        address: &str,
        force: bool,
    ) -> PoolResult<AddedShard> {
        if self.has_address(address) {
            return Err(PoolError::AlreadyConnected(address.to_string()));
        }
        let id = {
            let mut cluster = self.cluster.lock().expect("cluster lock poisoned");
            if cluster.contains_address(address) {
                return Err(PoolError::AlreadyConnected(address.to_string()));
            }
            cluster.register(address)
        };

        let (shard, connected) = match self.open_remote(ctx, id, address).await {
            Ok(shard) => (shard, true),
            Err(e) if force => {
                warn!(address, error = %e, "initial connect failed; shard kept for retry");
                (self.offline_remote(id, address), false)
            }
            Err(e) => {
                let mut cluster = self.cluster.lock().expect("cluster lock poisoned");
                cluster.forget(id);
                // Hand the id out again unless a later registration took the next one.
                if cluster.next_id == id.next() {
                    cluster.next_id = id;
                }
                return Err(e);
            }
        };

        self.insert(Arc::new(shard));
        info!(shard = %id, address, connected, "shard added");
        Ok(AddedShard {
            id,
            connected,
            config: self.cluster(),
        })
    }

    /// Re-register a shard remembered in the cluster config under its old id.
    ///
    /// Connection failures are not errors here; the shard starts offline and
    /// the health loop retries it.
    pub async fn restore_shard(&self, ctx: &Context, id: ShardId, address: &str) -> bool {
        let (shard, connected) = match self.open_remote(ctx, id, address).await {
            Ok(shard) => (shard, true),
            Err(e) => {
                warn!(shard = %id, address, error = %e, "known shard unreachable at startup");
                (self.offline_remote(id, address), false)
            }
        };
        self.insert(Arc::new(shard));
        connected
    }

    async fn open_remote(&self, ctx: &Context, id: ShardId, address: &str) -> PoolResult<RemoteShard> {
        RemoteShard::connect(
            ctx,
            id,
            address,
            Arc::clone(&self.connector),
            self.config.max_tries,
            self.config.connect_timeout(),
        )
        .await
        .map_err(|e| match e {
            PoolError::Connect { .. } => e,
            other => PoolError::Connect {
                address: address.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn offline_remote(&self, id: ShardId, address: &str) -> RemoteShard {
        RemoteShard::disconnected(
            id,
            address,
            Arc::clone(&self.connector),
            self.config.max_tries,
            self.config.connect_timeout(),
        )
    }

    /// Remove a shard and forget it in the cluster config.
    ///
    /// The local shard cannot be disconnected. Calls already holding the
    /// removed shard finish against it; later lookups fail with
    /// [`PoolError::UnknownShard`].
    pub fn disconnect(&self, id: ShardId) -> PoolResult<ClusterConfig> {
        if id.is_local() {
            return Err(PoolError::UnknownShard(id));
        }
        let removed = self
            .shards
            .write()
            .expect("shards lock poisoned")
            .remove(&id);
        let mut cluster = self.cluster.lock().expect("cluster lock poisoned");
        let forgotten = cluster.forget(id);
        if removed.is_none() && !forgotten {
            return Err(PoolError::UnknownShard(id));
        }
        info!(shard = %id, "shard disconnected");
        Ok(cluster.clone())
    }

    pub fn shard(&self, id: ShardId) -> PoolResult<Arc<dyn Shard>> {
        self.shards
            .read()
            .expect("shards lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(PoolError::UnknownShard(id))
    }

    /// The online shard with the most free memory relative to its size.
    ///
    /// Ties go to the lowest id.
    pub fn pick_best(&self) -> PoolResult<Arc<dyn Shard>> {
        let mut best: Option<(Arc<dyn Shard>, tessera_types::Ram)> = None;
        for shard in self.online() {
            let ram = shard.ram();
            let better = match &best {
                None => true,
                Some((_, best_ram)) => ram.cmp_ratio(best_ram).is_gt(),
            };
            if better {
                best = Some((shard, ram));
            }
        }
        best.map(|(shard, _)| shard).ok_or(PoolError::NoShardsAvailable)
    }

    /// Resolve a single-shard target. `All` names no single shard.
    pub fn resolve(&self, target: ShardTarget) -> PoolResult<Arc<dyn Shard>> {
        match target {
            ShardTarget::Auto => self.pick_best(),
            ShardTarget::Shard(id) => self.shard(id),
            ShardTarget::All => Err(PoolError::UnknownShard(ShardId::new(ShardTarget::RAW_ALL))),
        }
    }

    /// Ask every online shard for `key` at once and return the first hit.
    ///
    /// The winner cancels the context handed to the other calls. Returns
    /// [`PoolError::NotFound`] once every shard has answered without it.
    pub async fn deep_search(&self, ctx: &Context, key: &str) -> PoolResult<(ShardId, Value)> {
        let shards = self.online();
        let search = ctx.child();
        let slot = Arc::new(ResultSlot::new());
        let mut tasks = JoinSet::new();

        for shard in shards {
            let search = search.clone();
            let slot = Arc::clone(&slot);
            let fanout = Arc::clone(&self.fanout);
            let key = key.to_string();
            tasks.spawn(async move {
                let permit = tokio::select! {
                    p = fanout.acquire_owned() => p,
                    _ = search.done() => return,
                };
                let Ok(_permit) = permit else { return };
                let id = shard.id();
                match shard.get(&search, &key).await {
                    Ok(value) => {
                        if slot.offer((id, value)) {
                            search.cancel();
                        }
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(PoolError::Cancelled) => {}
                    Err(e) => debug!(shard = %id, key = %key, error = %e, "deep search call failed"),
                }
            });
        }

        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "deep search task failed");
                }
                if slot.is_claimed() {
                    break;
                }
            }
        };
        let cancelled = tokio::select! {
            _ = collect => false,
            _ = ctx.done() => true,
        };
        search.cancel();
        // Dropping the set aborts calls that have not noticed the cancellation.
        drop(tasks);

        if (cancelled || ctx.is_done()) && !slot.is_claimed() {
            return Err(PoolError::Cancelled);
        }
        match slot.take() {
            Some(found) => {
                debug!(shard = %found.0, key, "deep search hit");
                Ok(found)
            }
            None => Err(PoolError::NotFound(key.to_string())),
        }
    }

    /// Apply `op` on every registered shard concurrently.
    ///
    /// Failures do not stop the other calls. The caller's context bounds
    /// the overall wait.
    pub async fn broadcast(&self, ctx: &Context, op: BroadcastOp) -> PoolResult<BroadcastReport> {
        let op = Arc::new(op);
        let mut tasks = JoinSet::new();
        for shard in self.snapshot() {
            let ctx = ctx.clone();
            let op = Arc::clone(&op);
            let fanout = Arc::clone(&self.fanout);
            tasks.spawn(async move {
                let id = shard.id();
                let permit = tokio::select! {
                    p = fanout.acquire_owned() => p,
                    _ = ctx.done() => return (id, Err(PoolError::Cancelled)),
                };
                let Ok(_permit) = permit else {
                    return (id, Err(PoolError::Cancelled));
                };
                let result = match op.as_ref() {
                    BroadcastOp::Set { key, data, opts } => shard.set(&ctx, key, data, *opts).await,
                    BroadcastOp::Delete { key } => shard.delete(&ctx, key).await,
                };
                if let Err(e) = &result {
                    debug!(shard = %id, error = %e, "broadcast call failed");
                }
                (id, result)
            });
        }

        let mut report = BroadcastReport::default();
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, Ok(()))) => report.succeeded.push(id),
                    Ok((id, Err(_))) => report.failed.push(id),
                    Err(e) => warn!(error = %e, "broadcast task failed"),
                }
            }
        };
        let cancelled = tokio::select! {
            _ = collect => false,
            _ = ctx.done() => true,
        };
        if cancelled {
            return Err(PoolError::Cancelled);
        }
        report.succeeded.sort();
        report.failed.sort();
        Ok(report)
    }

    /// Set `key` on every shard. Returns the shards that failed.
    pub async fn set_to_all(
        &self,
        ctx: &Context,
        key: &str,
        data: &str,
        opts: SetOptions,
    ) -> PoolResult<Vec<ShardId>> {
        let op = BroadcastOp::Set {
            key: key.to_string(),
            data: data.to_string(),
            opts,
        };
        Ok(self.broadcast(ctx, op).await?.failed)
    }

    /// Delete `key` from every shard. Returns whether at least one shard
    /// deleted it.
    pub async fn delete_from_all(&self, ctx: &Context, key: &str) -> PoolResult<bool> {
        let op = BroadcastOp::Delete {
            key: key.to_string(),
        };
        Ok(!self.broadcast(ctx, op).await?.succeeded.is_empty())
    }

    /// Visit online shards one at a time, stopping at the first error.
    pub async fn iter<F, Fut>(&self, mut visit: F) -> PoolResult<()>
    where
        F: FnMut(Arc<dyn Shard>) -> Fut,
        Fut: Future<Output = PoolResult<()>>,
    {
        for shard in self.online() {
            visit(shard).await?;
        }
        Ok(())
    }

    /// One line per shard: `s#<id> Available: <n> MB, Total: <n> MB`.
    pub fn servers(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|s| format!("{} {}", s.id(), s.ram()))
            .collect()
    }

    /// One health pass over every shard.
    ///
    /// Offline shards are reconnected first, then every reachable shard's
    /// memory figures are refreshed. Failures are logged and swallowed. A
    /// shard whose retry count has climbed past `max_tries` is removed.
    pub async fn health_tick(&self, ctx: &Context) -> HealthReport {
        let mut report = HealthReport::default();
        for shard in self.snapshot() {
            let id = shard.id();
            if shard.tries() > self.config.max_tries {
                self.shards
                    .write()
                    .expect("shards lock poisoned")
                    .remove(&id);
                warn!(shard = %id, tries = shard.tries(), "shard removed after repeated failures");
                report.removed.push(id);
                continue;
            }
            if shard.is_offline() {
                match shard.reconnect(ctx).await {
                    Ok(()) => {
                        info!(shard = %id, "shard reconnected");
                        report.reconnected.push(id);
                    }
                    Err(e) => {
                        warn!(shard = %id, error = %e, "reconnect failed");
                        continue;
                    }
                }
            }
            match shard.refresh_ram(ctx).await {
                Ok(_) => report.refreshed += 1,
                Err(e) => warn!(shard = %id, error = %e, "ram refresh failed"),
            }
        }
        report
    }
}

impl std::fmt::Debug for ShardPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardPool")
            .field("shards", &self.ids())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{FixedRam, LocalShard};
    use crate::rpc::InProcessConnector;
    use crate::testing::{ScriptedConnector, ScriptedShard};
    use std::time::Duration;
    use tessera_store::Store;
    use tessera_types::Ram;

    fn pool_with(connector: Arc<dyn Connector>) -> ShardPool {
        ShardPool::new(PoolConfig::default(), ClusterConfig::default(), connector)
    }

    async fn scripted_pool(rams: &[Ram]) -> (ShardPool, Arc<ScriptedConnector>) {
        let connector = Arc::new(ScriptedConnector::new());
        let pool = pool_with(connector.clone());
        let ctx = Context::background();
        for (i, ram) in rams.iter().enumerate() {
            let address = format!("shard-{}", i + 1);
            connector.add(&address, *ram);
            pool.add_shard(&ctx, &address, false).await.unwrap();
        }
        (pool, connector)
    }

    fn scripted(connector: &ScriptedConnector, n: i32) -> Arc<ScriptedShard> {
        connector.get(&format!("shard-{n}")).unwrap()
    }

    // ------------------------------------------------------------------
    // 1. Placement
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn pick_best_prefers_free_ratio() {
        let (pool, _) = scripted_pool(&[
            Ram::new(100, 10),
            Ram::new(100, 80),
            Ram::new(100, 50),
        ])
        .await;
        assert_eq!(pool.pick_best().unwrap().id(), ShardId::new(2));
    }

    #[tokio::test]
    async fn pick_best_skips_offline_and_breaks_ties_by_id() {
        let (pool, connector) = scripted_pool(&[
            Ram::new(100, 50),
            Ram::new(200, 100),
            Ram::new(100, 90),
        ])
        .await;
        scripted(&connector, 3).set_failing(true);
        let ctx = Context::background();
        let best = pool.shard(ShardId::new(3)).unwrap();
        for _ in 0..pool.config().max_tries {
            let _ = best.get(&ctx, "k").await;
        }
        assert!(best.is_offline());
        assert_eq!(pool.pick_best().unwrap().id(), ShardId::new(1));
    }

    #[tokio::test]
    async fn empty_pool_has_no_placement() {
        let pool = pool_with(Arc::new(InProcessConnector::new()));
        assert!(matches!(pool.pick_best(), Err(PoolError::NoShardsAvailable)));
        assert!(matches!(
            pool.resolve(ShardTarget::Shard(ShardId::new(9))),
            Err(PoolError::UnknownShard(_))
        ));
    }

    // ------------------------------------------------------------------
    // 2. Membership
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn add_shard_assigns_ids_and_rejects_duplicates() {
        let (pool, _) = scripted_pool(&[Ram::new(10, 5), Ram::new(10, 5)]).await;
        let cluster = pool.cluster();
        assert_eq!(cluster.next_id, ShardId::new(3));
        assert_eq!(cluster.addresses.len(), 2);

        let err = pool
            .add_shard(&Context::background(), "shard-1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::AlreadyConnected(_)));
    }

    #[tokio::test]
    async fn add_shard_without_force_fails_on_unreachable() {
        let pool = pool_with(Arc::new(ScriptedConnector::new()));
        let err = pool
            .add_shard(&Context::background(), "nowhere", false)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Connect { .. }));
        assert!(pool.is_empty());
        assert_eq!(pool.cluster().next_id, ShardId::FIRST_REMOTE);
    }

    #[tokio::test]
    async fn forced_shard_is_kept_and_later_reconnected() {
        let connector = Arc::new(ScriptedConnector::new());
        let pool = pool_with(connector.clone());
        let ctx = Context::background();

        let added = pool.add_shard(&ctx, "late", true).await.unwrap();
        assert!(!added.connected);
        assert_eq!(added.config.addresses.len(), 1);
        assert!(pool.shard(added.id).unwrap().is_offline());

        connector.add("late", Ram::new(100, 60));
        let report = pool.health_tick(&ctx).await;
        assert_eq!(report.reconnected, vec![added.id]);
        assert!(!pool.shard(added.id).unwrap().is_offline());
        assert_eq!(pool.shard(added.id).unwrap().ram(), Ram::new(100, 60));
    }

    #[tokio::test]
    async fn disconnect_forgets_shard() {
        let (pool, _) = scripted_pool(&[Ram::new(10, 5)]).await;
        let config = pool.disconnect(ShardId::new(1)).unwrap();
        assert!(config.addresses.is_empty());
        assert!(matches!(pool.shard(ShardId::new(1)), Err(PoolError::UnknownShard(_))));
        assert!(pool.disconnect(ShardId::new(1)).is_err());
        assert!(pool.disconnect(ShardId::LOCAL).is_err());
    }

    #[tokio::test]
    async fn servers_lists_capacity() {
        let pool = pool_with(Arc::new(InProcessConnector::new()));
        pool.insert(Arc::new(LocalShard::with_probe(
            Arc::new(Store::new()),
            None,
            Box::new(FixedRam(Ram::new(2048, 1024))),
        )));
        assert_eq!(pool.servers(), vec!["s#0 Available: 1024 MB, Total: 2048 MB"]);
    }

    // ------------------------------------------------------------------
    // 3. Deep search
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn deep_search_returns_holder_and_cancels_losers() {
        let (pool, connector) = scripted_pool(&[
            Ram::new(10, 5),
            Ram::new(10, 5),
            Ram::new(10, 5),
        ])
        .await;
        scripted(&connector, 1).set_blocking(true);
        scripted(&connector, 2).set_blocking(true);
        scripted(&connector, 3).put("k", Value::new("v"));

        let (id, value) = pool
            .deep_search(&Context::background(), "k")
            .await
            .unwrap();
        assert_eq!(id, ShardId::new(3));
        assert_eq!(value.data, "v");

        for n in [1, 2] {
            let contexts = scripted(&connector, n).get_contexts();
            assert!(!contexts.is_empty());
            assert!(contexts.iter().all(Context::is_done), "shard {n} not cancelled");
        }
    }

    #[tokio::test]
    async fn deep_search_misses_only_after_every_shard_answers() {
        let (pool, connector) = scripted_pool(&[
            Ram::new(10, 5),
            Ram::new(10, 5),
            Ram::new(10, 5),
        ])
        .await;
        let err = pool
            .deep_search(&Context::background(), "absent")
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::NotFound(_)));
        for n in 1..=3 {
            assert_eq!(scripted(&connector, n).calls("Get"), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deep_search_honours_caller_deadline() {
        let (pool, connector) = scripted_pool(&[Ram::new(10, 5)]).await;
        scripted(&connector, 1).set_blocking(true);
        let ctx = Context::with_timeout(Duration::from_millis(50));
        let err = pool.deep_search(&ctx, "k").await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
    }

    // ------------------------------------------------------------------
    // 4. Broadcast
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn set_to_all_reports_exactly_the_failed_shards() {
        let (pool, connector) = scripted_pool(&[
            Ram::new(10, 5),
            Ram::new(10, 5),
            Ram::new(10, 5),
            Ram::new(10, 5),
        ])
        .await;
        scripted(&connector, 2).set_failing(true);
        scripted(&connector, 4).set_failing(true);

        let failed = pool
            .set_to_all(&Context::background(), "k", "v", SetOptions::default())
            .await
            .unwrap();
        assert_eq!(failed, vec![ShardId::new(2), ShardId::new(4)]);
        assert_eq!(scripted(&connector, 1).value("k").unwrap().data, "v");
    }

    #[tokio::test]
    async fn set_to_all_reports_offline_shards_as_failed() {
        let (pool, connector) = scripted_pool(&[Ram::new(10, 5), Ram::new(10, 5)]).await;
        scripted(&connector, 2).set_failing(true);
        drive_offline(&pool, ShardId::new(2)).await;

        let failed = pool
            .set_to_all(&Context::background(), "k", "v", SetOptions::default())
            .await
            .unwrap();
        assert_eq!(failed, vec![ShardId::new(2)]);
        assert_eq!(pool.ids(), vec![ShardId::new(1), ShardId::new(2)]);
        assert_eq!(scripted(&connector, 1).value("k").unwrap().data, "v");
    }

    #[tokio::test]
    async fn delete_from_all_needs_one_success() {
        let (pool, connector) = scripted_pool(&[Ram::new(10, 5), Ram::new(10, 5)]).await;
        let ctx = Context::background();
        assert!(!pool.delete_from_all(&ctx, "k").await.unwrap());

        scripted(&connector, 2).put("k", Value::new("v"));
        assert!(pool.delete_from_all(&ctx, "k").await.unwrap());
        assert!(scripted(&connector, 2).value("k").is_none());
    }

    // ------------------------------------------------------------------
    // 5. Iteration and health
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn iter_stops_at_first_error() {
        let (pool, _) = scripted_pool(&[Ram::new(10, 5), Ram::new(10, 5), Ram::new(10, 5)]).await;
        let mut visited = Vec::new();
        let result = pool
            .iter(|shard| {
                visited.push(shard.id());
                let fail = shard.id() == ShardId::new(2);
                async move {
                    if fail {
                        Err(PoolError::NoShardsAvailable)
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(visited, vec![ShardId::new(1), ShardId::new(2)]);
    }

    #[tokio::test]
    async fn health_tick_refreshes_ram() {
        let (pool, connector) = scripted_pool(&[Ram::new(100, 10)]).await;
        scripted(&connector, 1).set_ram(Ram::new(100, 90));
        let report = pool.health_tick(&Context::background()).await;
        assert_eq!(report.refreshed, 1);
        assert_eq!(pool.shard(ShardId::new(1)).unwrap().ram(), Ram::new(100, 90));
    }

    #[tokio::test]
    async fn failing_shard_is_removed_after_retry_budget() {
        let (pool, connector) = scripted_pool(&[Ram::new(100, 10)]).await;
        scripted(&connector, 1).set_failing(true);
        connector.remove("shard-1");
        drive_offline(&pool, ShardId::new(1)).await;
        let ctx = Context::background();

        // Offline at max_tries; one more failed reconnect pushes it past.
        let first = pool.health_tick(&ctx).await;
        assert!(first.removed.is_empty());
        let second = pool.health_tick(&ctx).await;
        assert_eq!(second.removed, vec![ShardId::new(1)]);
        assert!(pool.shard(ShardId::new(1)).is_err());
    }

    async fn drive_offline(pool: &ShardPool, id: ShardId) {
        let shard = pool.shard(id).unwrap();
        let ctx = Context::background();
        while !shard.is_offline() {
            let _ = shard.refresh_ram(&ctx).await;
        }
    }
}
