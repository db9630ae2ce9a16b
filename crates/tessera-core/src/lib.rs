//! # tessera-core
//!
//! Placement router and node bootstrap for Tessera.
//!
//! The [`Router`] is the surface a transport talks to. For every operation
//! it checks the caller's clearance, picks a shard (explicit id, cached
//! placement, deep search or best-fit), and runs the call under the pool's
//! admission gate. Object placement is tracked per top-level object in the
//! node's object index and survives restarts through the transaction log.
//!
//! [`Node`] wires a store, a transaction log, a shard pool with its health
//! loop, and a router together from a [`NodeConfig`].

pub mod admin;
pub mod auth;
pub mod cache;
pub mod error;
pub mod node;
pub mod objects;
pub mod router;
pub mod security;

pub use auth::{AuthProvider, SessionAuth};
pub use cache::PlacementCache;
pub use error::{CoreError, CoreResult};
pub use node::{Node, NodeConfig};
pub use router::{Router, RouterParts};
pub use security::{DefaultAdmin, SecurityConfig};
