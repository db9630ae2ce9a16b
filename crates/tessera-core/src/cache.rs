use std::collections::HashMap;
use std::sync::RwLock;

use tessera_types::ShardId;

/// Best-effort key to shard map.
///
/// Entries are written after a successful resolution and dropped on delete.
/// Nothing here is durable; a restarted node rebuilds it through deep search.
#[derive(Debug, Default)]
pub struct PlacementCache {
    keys: RwLock<HashMap<String, ShardId>>,
}

impl PlacementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ShardId> {
        self.keys
            .read()
            .expect("placement cache poisoned")
            .get(key)
            .copied()
    }

    pub fn put(&self, key: &str, shard: ShardId) {
        self.keys
            .write()
            .expect("placement cache poisoned")
            .insert(key.to_string(), shard);
    }

    pub fn remove(&self, key: &str) -> Option<ShardId> {
        self.keys
            .write()
            .expect("placement cache poisoned")
            .remove(key)
    }

    /// Drop every entry pointing at `shard`. Returns how many were dropped.
    pub fn evict_shard(&self, shard: ShardId) -> usize {
        let mut keys = self.keys.write().expect("placement cache poisoned");
        let before = keys.len();
        keys.retain(|_, s| *s != shard);
        before - keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.read().expect("placement cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let cache = PlacementCache::new();
        cache.put("a", ShardId::new(2));
        assert_eq!(cache.get("a"), Some(ShardId::new(2)));
        assert_eq!(cache.remove("a"), Some(ShardId::new(2)));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn evict_shard_drops_only_its_keys() {
        let cache = PlacementCache::new();
        cache.put("a", ShardId::new(1));
        cache.put("b", ShardId::new(2));
        cache.put("c", ShardId::new(1));
        assert_eq!(cache.evict_shard(ShardId::new(1)), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(ShardId::new(2)));
    }
}
