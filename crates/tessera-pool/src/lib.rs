//! # tessera-pool
//!
//! Shard pool coordinator for Tessera.
//!
//! The pool owns every shard a node can place data on: the local shard
//! (id `0`, backed by this node's store) and any number of remote shards.
//! Both sit behind the [`Shard`] trait so the coordinator never branches on
//! which kind it holds.
//!
//! ## Responsibilities
//!
//! - Membership: [`ShardPool::add_shard`], [`ShardPool::disconnect`], with
//!   durable membership kept in a [`ClusterConfig`] persisted through a
//!   [`ConfigStore`].
//! - Placement: [`ShardPool::pick_best`] picks the online shard with the
//!   highest free-memory ratio.
//! - Fan-out: [`ShardPool::deep_search`] returns the first shard holding a
//!   key and cancels the rest; [`ShardPool::broadcast`] applies a mutation
//!   everywhere and reports which shards failed.
//! - Health: [`HealthMonitor`] reconnects offline shards, refreshes memory
//!   figures, and drops shards that exhaust their retry budget.
//! - Admission: an [`AdmissionGate`] bounds in-flight routed operations.
//!
//! Every operation takes a [`Context`] carrying cancellation and an
//! optional deadline.

pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod health;
pub mod local;
pub mod pool;
pub mod remote;
pub mod rpc;
pub mod shard;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{ClusterConfig, ConfigStore, FileConfigStore, MemoryConfigStore, PoolConfig, ShardAddress};
pub use context::Context;
pub use error::{PoolError, PoolResult};
pub use gate::AdmissionGate;
pub use health::HealthMonitor;
pub use local::{FixedRam, LocalShard, RamProbe, SystemRam};
pub use pool::{AddedShard, BroadcastOp, BroadcastReport, HealthReport, ShardPool};
pub use remote::RemoteShard;
pub use rpc::{Connector, InProcessClient, InProcessConnector, ShardClient, ShardRequest, ShardResponse};
pub use shard::Shard;
