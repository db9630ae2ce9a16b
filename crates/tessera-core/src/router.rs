use std::future::Future;
use std::sync::Arc;

use tessera_pool::{ConfigStore, Context, PoolError, Shard, ShardPool};
use tessera_store::{Store, StoreError};
use tessera_types::{GetOptions, Level, SetOptions, ShardId, ShardTarget, TargetOptions, UserClaims, Value};
use tessera_wal::TransactionLog;
use tracing::debug;

use crate::auth::AuthProvider;
use crate::cache::PlacementCache;
use crate::error::{CoreError, CoreResult};
use crate::security::SecurityConfig;

/// Everything a [`Router`] is built from.
pub struct RouterParts {
    pub pool: Arc<ShardPool>,
    /// The node's own store. Holds the object index and the user table.
    pub store: Arc<Store>,
    pub log: Option<Arc<TransactionLog>>,
    pub security: SecurityConfig,
    pub auth: Arc<dyn AuthProvider>,
    pub cluster_store: Arc<dyn ConfigStore>,
}

/// Placement router.
///
/// Decides which shard serves each operation, checks permissions before any
/// shard is touched, and keeps the key placement cache and the object index
/// current. Every public operation runs under the pool's admission gate.
///
/// Resolution order for keys: an explicit shard, then a cached placement,
/// then deep search (reads) or the best shard (writes). `ShardTarget::All`
/// broadcasts writes and deletes.
pub struct Router {
    pub(crate) pool: Arc<ShardPool>,
    pub(crate) store: Arc<Store>,
    pub(crate) log: Option<Arc<TransactionLog>>,
    pub(crate) cache: PlacementCache,
    pub(crate) security: SecurityConfig,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) cluster_store: Arc<dyn ConfigStore>,
}

impl Router {
    pub fn new(parts: RouterParts) -> Self {
        Self {
            pool: parts.pool,
            store: parts.store,
            log: parts.log,
            cache: PlacementCache::new(),
            security: parts.security,
            auth: parts.auth,
            cluster_store: parts.cluster_store,
        }
    }

    pub fn pool(&self) -> &Arc<ShardPool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn cache(&self) -> &PlacementCache {
        &self.cache
    }

    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// Run `work` under the admission gate.
    pub(crate) async fn admitted<T, F>(&self, ctx: &Context, work: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        self.pool.gate().run(ctx, work).await
    }

    pub(crate) fn require(&self, claims: Option<&UserClaims>, level: Level) -> CoreResult<()> {
        if self.security.has_permission(claims, level) {
            Ok(())
        } else {
            Err(CoreError::Forbidden)
        }
    }

    /// Cached shard for `key`, if it is still registered.
    fn cached_shard(&self, key: &str) -> Option<Arc<dyn Shard>> {
        let id = self.cache.get(key)?;
        match self.pool.shard(id) {
            Ok(shard) => Some(shard),
            Err(_) => {
                self.cache.remove(key);
                None
            }
        }
    }

    /// Store `data` under `key`. Returns where it went.
    pub async fn set(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        key: &str,
        data: &str,
        opts: SetOptions,
    ) -> CoreResult<ShardTarget> {
        self.require(claims, opts.level)?;
        self.admitted(ctx, async {
            let shard = match opts.target {
                ShardTarget::All => {
                    let failed = self.pool.set_to_all(ctx, key, data, opts).await?;
                    self.cache.remove(key);
                    if !failed.is_empty() {
                        return Err(CoreError::PartialBroadcast { failed });
                    }
                    return Ok(ShardTarget::All);
                }
                ShardTarget::Shard(id) => self.pool.shard(id)?,
                ShardTarget::Auto => match self.cached_shard(key) {
                    Some(shard) => shard,
                    None => self.pool.pick_best()?,
                },
            };
            shard.set(ctx, key, data, opts).await?;
            let id = shard.id();
            self.cache.put(key, id);
            debug!(key, shard = %id, "set");
            Ok(ShardTarget::Shard(id))
        })
        .await
    }

    /// Locate `key` and fetch it, without the permission check.
    async fn locate(&self, ctx: &Context, key: &str, target: ShardTarget) -> CoreResult<(ShardId, Value)> {
        if let ShardTarget::Shard(id) = target {
            let shard = self.pool.shard(id)?;
            return Ok((id, shard.get(ctx, key).await?));
        }

        if let (ShardTarget::Auto, Some(shard)) = (target, self.cached_shard(key)) {
            match shard.get(ctx, key).await {
                Ok(value) => return Ok((shard.id(), value)),
                Err(e) if e.is_not_found() => {
                    // Moved or deleted behind our back; search again.
                    self.cache.remove(key);
                }
                Err(e) => return Err(e.into()),
            }
        }

        match self.pool.deep_search(ctx, key).await {
            Ok((id, value)) => {
                self.cache.put(key, id);
                Ok((id, value))
            }
            Err(PoolError::NotFound(_)) => Err(StoreError::NotFound(key.to_string()).into()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        key: &str,
        opts: GetOptions,
    ) -> CoreResult<Value> {
        self.admitted(ctx, async {
            let (_, value) = self.locate(ctx, key, opts.target).await?;
            self.require(claims, value.level)?;
            Ok(value)
        })
        .await
    }

    /// Delete `key`.
    ///
    /// The value is read first so its level can be checked. Deleting from
    /// every shard skips that read and therefore needs `Secret` claims.
    pub async fn delete(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        key: &str,
        opts: TargetOptions,
    ) -> CoreResult<()> {
        if opts.target == ShardTarget::All {
            self.require(claims, Level::Secret)?;
        }
        self.admitted(ctx, async {
            if opts.target == ShardTarget::All {
                self.cache.remove(key);
                return if self.pool.delete_from_all(ctx, key).await? {
                    Ok(())
                } else {
                    Err(StoreError::NotFound(key.to_string()).into())
                };
            }

            let (id, value) = self.locate(ctx, key, opts.target).await?;
            self.require(claims, value.level)?;
            self.pool.shard(id)?.delete(ctx, key).await?;
            self.cache.remove(key);
            debug!(key, shard = %id, "deleted");
            Ok(())
        })
        .await
    }

    // ---- cluster ----

    /// Add a remote shard and persist the new membership.
    pub async fn connect(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        address: &str,
    ) -> CoreResult<ShardId> {
        self.require(claims, Level::Secret)?;
        self.admitted(ctx, async {
            let added = self.pool.add_shard(ctx, address, false).await?;
            self.cluster_store.save(&added.config)?;
            Ok(added.id)
        })
        .await
    }

    /// Remove a shard, forget its cached keys, and persist the membership.
    pub async fn disconnect(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        id: ShardId,
    ) -> CoreResult<()> {
        self.require(claims, Level::Secret)?;
        self.admitted(ctx, async {
            let config = self.pool.disconnect(id)?;
            self.cache.evict_shard(id);
            self.cluster_store.save(&config)?;
            Ok(())
        })
        .await
    }

    /// One line per shard: `s#<id> Available: <n> MB, Total: <n> MB`.
    pub fn servers(&self) -> Vec<String> {
        self.pool.servers()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("pool", &self.pool)
            .field("cached_keys", &self.cache.len())
            .field("logged", &self.log.is_some())
            .finish()
    }
}
