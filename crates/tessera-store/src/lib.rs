//! In-memory storage engine for Tessera.
//!
//! A [`Store`] is the authoritative state of one shard. It knows nothing of
//! the network or of other shards; the shard pool wraps it, and the
//! transaction log replays into it on startup.
//!
//! # Contents
//!
//! - a flat key space of [`Value`](tessera_types::Value)s
//! - a forest of named objects addressed by dot-separated paths, where an
//!   object can be attached (aliased) under another without copying
//! - the ObjectInfo index recording which shard owns each top-level object
//! - the user table with soft deletion and a change counter
//!
//! # Design Rules
//!
//! 1. Each of the four areas has its own lock; no operation takes two.
//! 2. Lookups on missing data return a typed not-found error, never a default.
//! 3. Object nodes are shared by handle; attaching never copies a subtree.
//! 4. An attachment that would make an object reachable from itself is refused.

pub mod arena;
pub mod error;
pub mod json;
pub mod store;
pub mod users;

pub use arena::{Entry, NodeId, ObjectArena};
pub use error::{StoreError, StoreResult};
pub use store::Store;
pub use users::UserTable;
