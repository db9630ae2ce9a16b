use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_pool::{
    ConfigStore, Connector, Context, FileConfigStore, HealthMonitor, LocalShard, PoolConfig,
    ShardPool,
};
use tessera_store::Store;
use tessera_types::{Level, User};
use tessera_wal::{TransactionLog, WalConfig};
use tracing::{info, warn};

use crate::auth::SessionAuth;
use crate::error::{CoreError, CoreResult};
use crate::router::{Router, RouterParts};
use crate::security::SecurityConfig;

/// Node-level configuration, usually read from a TOML file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Holds the cluster membership files.
    pub data_dir: PathBuf,
    pub wal: WalConfig,
    pub pool: PoolConfig,
    pub security: SecurityConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            wal: WalConfig::in_dir(data_dir.join("transaction-log")),
            data_dir,
            pool: PoolConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Everything under one directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let data_dir = dir.into();
        Self {
            wal: WalConfig::in_dir(data_dir.join("transaction-log")),
            data_dir,
            ..Self::default()
        }
    }

    pub fn from_toml(raw: &str) -> CoreResult<Self> {
        toml::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> CoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> CoreResult<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(CoreError::Config(format!("{}: {e}", path.display()))),
        }
    }
}

/// A running node: store, log, shard pool, health loop and router.
pub struct Node {
    config: NodeConfig,
    router: Arc<Router>,
    log: Option<Arc<TransactionLog>>,
    monitor: Option<HealthMonitor>,
}

impl Node {
    /// Bring a node up.
    ///
    /// Replays the log into a fresh store, creates the default administrator
    /// on a node without users, registers the local shard, re-adds every
    /// remembered remote shard under its old id, and starts the health loop.
    /// Remote shards that cannot be reached are kept offline for the health
    /// loop to retry.
    pub async fn start(config: NodeConfig, connector: Arc<dyn Connector>) -> CoreResult<Self> {
        let log = if config.wal.enabled {
            Some(Arc::new(TransactionLog::open(&config.wal)?))
        } else {
            warn!("transaction log disabled; state will not survive a restart");
            None
        };
        Self::start_with_log(config, connector, log).await
    }

    /// The rest of [`Node::start`] once the log is open. A failure stops the
    /// log before returning.
    async fn start_with_log(
        config: NodeConfig,
        connector: Arc<dyn Connector>,
        log: Option<Arc<TransactionLog>>,
    ) -> CoreResult<Self> {
        match Self::assemble(config, connector, log.clone()).await {
            Ok(node) => Ok(node),
            Err(e) => {
                if let Some(log) = &log {
                    if let Err(stop) = log.stop().await {
                        warn!(error = %stop, "transaction log did not stop cleanly");
                    }
                }
                Err(e)
            }
        }
    }

    async fn assemble(
        config: NodeConfig,
        connector: Arc<dyn Connector>,
        log: Option<Arc<TransactionLog>>,
    ) -> CoreResult<Self> {
        let store = Arc::new(Store::new());

        if let Some(log) = &log {
            let stats = log.restore(store.as_ref())?;
            info!(
                segments = stats.segments,
                events = stats.events,
                rejected = stats.rejected,
                "transaction log replayed"
            );
        }

        if !store.has_users() {
            let admin = &config.security.default_admin;
            let id = store.create_user(User::new(&admin.login, &admin.password, Level::Secret))?;
            if let Some(log) = &log {
                log.write_user(&store.user_by_id(id)?).await;
            }
            info!(login = %admin.login, "default administrator created");
        }

        let cluster_store: Arc<dyn ConfigStore> =
            Arc::new(FileConfigStore::new(&config.data_dir));
        let cluster = cluster_store.load()?;

        let pool = Arc::new(ShardPool::new(config.pool.clone(), cluster.clone(), connector));
        pool.insert(Arc::new(LocalShard::new(Arc::clone(&store), log.clone())));

        let ctx = Context::with_timeout(config.pool.connect_timeout());
        for known in &cluster.addresses {
            pool.restore_shard(&ctx, known.id, &known.address).await;
        }

        let monitor = HealthMonitor::start(Arc::clone(&pool));
        let router = Arc::new(Router::new(RouterParts {
            pool,
            store: Arc::clone(&store),
            log: log.clone(),
            security: config.security.clone(),
            auth: Arc::new(SessionAuth::new(store)),
            cluster_store,
        }));
        info!(shards = router.pool().len(), "node started");

        Ok(Self {
            config,
            router,
            log,
            monitor: Some(monitor),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Stop the health loop and flush the log.
    pub async fn shutdown(mut self) -> CoreResult<()> {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
        if let Some(log) = &self.log {
            log.stop().await?;
        }
        info!("node stopped");
        Ok(())
    }
}
