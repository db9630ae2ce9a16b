//! Foundation types for Tessera.
//!
//! Tessera is a distributed in-memory key/object store. This crate holds the
//! plain data types shared by every layer: the storage engine, the
//! transaction log, the shard pool and the placement router. Nothing here
//! performs I/O.
//!
//! # Key Types
//!
//! - [`Level`] -- ordered access-control tag attached to values, objects and claims
//! - [`Value`] -- a stored scalar with its read-only flag and level
//! - [`ObjectInfo`] -- owning shard and minimum level of a top-level object
//! - [`ShardId`] / [`ShardTarget`] -- shard addressing for routed operations
//! - [`Ram`] -- capacity figures used for placement
//! - [`User`] / [`UserClaims`] -- user records and resolved session claims
//! - [`ErrorKind`] -- transport-neutral classification of every failure

pub mod error;
pub mod level;
pub mod options;
pub mod path;
pub mod shard;
pub mod user;
pub mod value;

pub use error::{ErrorKind, TypeError};
pub use level::Level;
pub use options::{GetOptions, ObjectOpOptions, ObjectOptions, SetOptions, SetToObjectOptions, TargetOptions};
pub use path::{join_path, root_of, split_last, split_path, PATH_SEPARATOR};
pub use shard::{Ram, ShardId, ShardTarget};
pub use user::{User, UserClaims};
pub use value::{ObjectInfo, Value};
