use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a shard in the pool.
///
/// `0` is reserved for the local shard; remote shards are numbered from `1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(i32);

impl ShardId {
    /// The local shard.
    pub const LOCAL: ShardId = ShardId(0);

    /// First id handed out to a remote shard.
    pub const FIRST_REMOTE: ShardId = ShardId(1);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i32 {
        self.0
    }

    pub fn is_local(self) -> bool {
        self == Self::LOCAL
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s#{}", self.0)
    }
}

/// Where a routed operation should run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShardTarget {
    /// Resolve through the placement cache, then search or pick.
    #[default]
    Auto,
    /// Broadcast to every registered shard; unreachable ones are reported as failed.
    All,
    /// A specific shard.
    Shard(ShardId),
}

impl ShardTarget {
    /// Sentinel for "every shard" used by wire records.
    pub const RAW_ALL: i32 = -1;
    /// Sentinel for "pick automatically" used by wire records.
    pub const RAW_AUTO: i32 = 0;

    /// Decode the wire form. Any negative value means "all".
    ///
    /// The local shard cannot be addressed through the raw form because `0`
    /// is the auto sentinel; local placement is reached through `Auto`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            Self::RAW_AUTO => Self::Auto,
            r if r < 0 => Self::All,
            r => Self::Shard(ShardId(r)),
        }
    }

    pub fn shard(id: ShardId) -> Self {
        Self::Shard(id)
    }
}

/// Memory capacity reported by a shard, in megabytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ram {
    pub total: u64,
    pub available: u64,
}

impl Ram {
    pub fn new(total: u64, available: u64) -> Self {
        Self { total, available }
    }

    /// Compare the `available / total` ratios of two samples.
    ///
    /// A sample with zero total capacity ranks as an empty ratio.
    pub fn cmp_ratio(&self, other: &Ram) -> Ordering {
        match (self.total, other.total) {
            (0, 0) => Ordering::Equal,
            (0, _) => {
                if other.available == 0 {
                    Ordering::Equal
                } else {
                    Ordering::Less
                }
            }
            (_, 0) => {
                if self.available == 0 {
                    Ordering::Equal
                } else {
                    Ordering::Greater
                }
            }
            (a_total, b_total) => {
                let lhs = self.available as u128 * b_total as u128;
                let rhs = other.available as u128 * a_total as u128;
                lhs.cmp(&rhs)
            }
        }
    }
}

impl fmt::Display for Ram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Available: {} MB, Total: {} MB", self.available, self.total)
    }
}
