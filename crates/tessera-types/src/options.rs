use serde::{Deserialize, Serialize};

use crate::level::Level;
use crate::shard::ShardTarget;

/// Options for `Set`. The store ignores `target`; the router consumes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOptions {
    pub target: ShardTarget,
    pub read_only: bool,
    /// Fail with `AlreadyExists` instead of overwriting.
    pub unique: bool,
    pub level: Level,
}

/// Options for operations that only need a routing target (`Get`, `Delete`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOptions {
    pub target: ShardTarget,
}

pub type GetOptions = TargetOptions;

/// Options for `CreateObject`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectOptions {
    pub target: ShardTarget,
    pub level: Level,
}

/// Options for `SetToObject`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetToObjectOptions {
    pub target: ShardTarget,
    pub read_only: bool,
}

/// Options for the remaining object operations.
pub type ObjectOpOptions = TargetOptions;

impl SetOptions {
    pub fn on(target: ShardTarget) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

impl TargetOptions {
    pub fn on(target: ShardTarget) -> Self {
        Self { target }
    }
}

impl ObjectOptions {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }
}
