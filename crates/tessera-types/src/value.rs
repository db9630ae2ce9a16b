use serde::{Deserialize, Serialize};

use crate::level::Level;
use crate::shard::ShardId;

/// A stored scalar.
///
/// Values are opaque strings; the store never interprets `data`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub data: String,
    pub read_only: bool,
    pub level: Level,
}

impl Value {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            read_only: false,
            level: Level::Default,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Placement record for a top-level object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Shard that owns the object.
    pub shard: ShardId,
    /// Minimum claim level required to touch the object.
    pub level: Level,
}

impl ObjectInfo {
    pub fn new(shard: ShardId, level: Level) -> Self {
        Self { shard, level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_flags() {
        let v = Value::new("data").with_level(Level::Secret).read_only(true);
        assert_eq!(v.data, "data");
        assert_eq!(v.level, Level::Secret);
        assert!(v.read_only);
    }

    #[test]
    fn serde_roundtrip() {
        let info = ObjectInfo::new(ShardId::new(3), Level::Restricted);
        let json = serde_json::to_string(&info).unwrap();
        let parsed: ObjectInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, parsed);
    }
}
