use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_types::ShardId;
use tracing::debug;

use crate::error::{PoolError, PoolResult};
use crate::gate::AdmissionGate;

/// Tunables for the shard pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Interval of the health loop (reconnect, RAM refresh).
    pub health_interval_ms: u64,
    /// Consecutive transport failures before a shard is marked offline.
    /// A shard whose count climbs past this is removed by the health loop.
    pub max_tries: u32,
    /// Timeout for connecting to a shard and for health probes.
    pub connect_timeout_ms: u64,
    /// Capacity of the admission gate.
    pub admission_capacity: usize,
    /// Concurrent shard calls per deep search or broadcast.
    pub fanout_limit: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            health_interval_ms: 5_000,
            max_tries: 3,
            connect_timeout_ms: 5_000,
            admission_capacity: AdmissionGate::default_capacity(),
            fanout_limit: 64,
        }
    }
}

impl PoolConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

/// A remote shard remembered across restarts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAddress {
    pub id: ShardId,
    pub address: String,
}

/// Durable cluster membership: the next free shard id and every known shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub next_id: ShardId,
    #[serde(default)]
    pub addresses: Vec<ShardAddress>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            next_id: ShardId::FIRST_REMOTE,
            addresses: Vec::new(),
        }
    }
}

impl ClusterConfig {
    pub fn contains_address(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a.address == address)
    }

    /// Reserve the next id for `address` and return it.
    pub fn register(&mut self, address: &str) -> ShardId {
        let id = self.next_id;
        self.next_id = id.next();
        self.addresses.push(ShardAddress {
            id,
            address: address.to_string(),
        });
        id
    }

    /// Forget the shard with `id`. The id is never reused.
    pub fn forget(&mut self, id: ShardId) -> bool {
        let before = self.addresses.len();
        self.addresses.retain(|a| a.id != id);
        self.addresses.len() != before
    }
}

/// Storage for [`ClusterConfig`].
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> PoolResult<ClusterConfig>;
    fn save(&self, config: &ClusterConfig) -> PoolResult<()>;
}

/// Counter file holding the next free shard id as a single integer.
pub const COUNTER_FILE: &str = "shard-id";
/// Known shard addresses.
pub const SHARDS_FILE: &str = "shards.toml";

/// File-backed [`ConfigStore`].
///
/// The counter lives alone in [`COUNTER_FILE`] so it stays readable by
/// operators; [`SHARDS_FILE`] holds the address list.
#[derive(Clone, Debug)]
pub struct FileConfigStore {
    dir: PathBuf,
}

#[derive(Default, Serialize, Deserialize)]
struct ShardsFile {
    #[serde(default)]
    shards: Vec<ShardAddress>,
}

impl FileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn read_optional(path: &Path) -> PoolResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replace `path` atomically through a sibling temp file.
fn write_replace(path: &Path, contents: &str) -> PoolResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> PoolResult<ClusterConfig> {
        let mut config = ClusterConfig::default();

        if let Some(raw) = read_optional(&self.dir.join(COUNTER_FILE))? {
            let raw = raw.trim();
            let next = raw
                .parse::<i32>()
                .map_err(|e| PoolError::Config(format!("bad shard counter {raw:?}: {e}")))?;
            config.next_id = ShardId::new(next.max(ShardId::FIRST_REMOTE.get()));
        }

        if let Some(raw) = read_optional(&self.dir.join(SHARDS_FILE))? {
            let file: ShardsFile =
                toml::from_str(&raw).map_err(|e| PoolError::Config(e.to_string()))?;
            config.addresses = file.shards;
        }

        // A counter behind the recorded ids would hand out duplicates.
        if let Some(max) = config.addresses.iter().map(|a| a.id).max() {
            if max >= config.next_id {
                config.next_id = max.next();
            }
        }

        debug!(dir = %self.dir.display(), shards = config.addresses.len(), "cluster config loaded");
        Ok(config)
    }

    fn save(&self, config: &ClusterConfig) -> PoolResult<()> {
        fs::create_dir_all(&self.dir)?;
        write_replace(
            &self.dir.join(COUNTER_FILE),
            &config.next_id.get().to_string(),
        )?;
        let body = toml::to_string_pretty(&ShardsFile {
            shards: config.addresses.clone(),
        })
        .map_err(|e| PoolError::Config(e.to_string()))?;
        write_replace(&self.dir.join(SHARDS_FILE), &body)
    }
}

/// In-memory [`ConfigStore`] for tests and nodes without a data directory.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    inner: Mutex<ClusterConfig>,
}

impl MemoryConfigStore {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }

    pub fn snapshot(&self) -> ClusterConfig {
        self.inner.lock().expect("config lock poisoned").clone()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> PoolResult<ClusterConfig> {
        Ok(self.snapshot())
    }

    fn save(&self, config: &ClusterConfig) -> PoolResult<()> {
        *self.inner.lock().expect("config lock poisoned") = config.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_config() {
        let c = PoolConfig::default();
        assert_eq!(c.health_interval(), Duration::from_secs(5));
        assert_eq!(c.max_tries, 3);
        assert_eq!(c.connect_timeout(), Duration::from_secs(5));
        assert!(c.admission_capacity >= 100);
    }

    #[test]
    fn register_hands_out_increasing_ids() {
        let mut c = ClusterConfig::default();
        assert_eq!(c.register("a:1"), ShardId::new(1));
        assert_eq!(c.register("b:1"), ShardId::new(2));
        assert!(c.forget(ShardId::new(1)));
        assert_eq!(c.register("c:1"), ShardId::new(3));
        assert!(c.contains_address("b:1"));
        assert!(!c.contains_address("a:1"));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());
        assert_eq!(store.load().unwrap(), ClusterConfig::default());

        let mut c = ClusterConfig::default();
        c.register("10.0.0.1:8080");
        c.register("10.0.0.2:8080");
        store.save(&c).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join(COUNTER_FILE)).unwrap(),
            "3"
        );
        assert_eq!(store.load().unwrap(), c);
    }

    #[test]
    fn stale_counter_is_raised_past_known_ids() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(COUNTER_FILE), "1\n").unwrap();
        fs::write(
            dir.path().join(SHARDS_FILE),
            "[[shards]]\nid = 4\naddress = \"x:1\"\n",
        )
        .unwrap();
        let c = FileConfigStore::new(dir.path()).load().unwrap();
        assert_eq!(c.next_id, ShardId::new(5));
    }

    #[test]
    fn garbage_counter_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(COUNTER_FILE), "many").unwrap();
        let err = FileConfigStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn memory_store_keeps_last_save() {
        let store = MemoryConfigStore::default();
        let mut c = ClusterConfig::default();
        c.register("a:1");
        store.save(&c).unwrap();
        assert_eq!(store.load().unwrap(), c);
    }
}
