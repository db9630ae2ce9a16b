//! Scriptable shards for coordinator and router tests.
//!
//! A [`ScriptedShard`] is a real [`LocalShard`] behind a [`ShardClient`]
//! that counts calls per request kind and can be told to fail every call or
//! to hold `Get` calls until the caller's context ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tessera_store::Store;
use tessera_types::{Ram, SetOptions, ShardId, Value};

use crate::context::Context;
use crate::error::{PoolError, PoolResult};
use crate::local::{LocalShard, RamProbe};
use crate::rpc::{self, Connector, ShardClient, ShardRequest, ShardResponse};

/// Capacity figures that tests can change.
#[derive(Clone, Debug, Default)]
pub struct SharedRam(Arc<Mutex<Ram>>);

impl SharedRam {
    pub fn new(ram: Ram) -> Self {
        Self(Arc::new(Mutex::new(ram)))
    }

    pub fn set(&self, ram: Ram) {
        *self.0.lock().expect("ram lock poisoned") = ram;
    }
}

impl RamProbe for SharedRam {
    fn sample(&self) -> Ram {
        *self.0.lock().expect("ram lock poisoned")
    }
}

pub struct ScriptedShard {
    inner: LocalShard,
    ram: SharedRam,
    failing: AtomicBool,
    blocking: AtomicBool,
    calls: Mutex<HashMap<&'static str, usize>>,
    get_contexts: Mutex<Vec<Context>>,
}

impl ScriptedShard {
    pub fn new(ram: Ram) -> Self {
        let probe = SharedRam::new(ram);
        Self {
            inner: LocalShard::with_probe(Arc::new(Store::new()), None, Box::new(probe.clone())),
            ram: probe,
            failing: AtomicBool::new(false),
            blocking: AtomicBool::new(false),
            calls: Mutex::new(HashMap::new()),
            get_contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        self.inner.store()
    }

    /// Fail every call as a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold `Get` calls until the caller's context is done.
    pub fn set_blocking(&self, blocking: bool) {
        self.blocking.store(blocking, Ordering::SeqCst);
    }

    pub fn set_ram(&self, ram: Ram) {
        self.ram.set(ram);
    }

    pub fn put(&self, key: &str, value: Value) {
        let opts = SetOptions {
            read_only: value.read_only,
            level: value.level,
            ..SetOptions::default()
        };
        self.store()
            .set(key, &value.data, &opts)
            .expect("scripted put rejected");
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.store().get(key).ok()
    }

    /// Number of calls of the given request kind, e.g. `"Get"`.
    pub fn calls(&self, kind: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls lock poisoned").values().sum()
    }

    /// Contexts handed to every `Get` call so far.
    pub fn get_contexts(&self) -> Vec<Context> {
        self.get_contexts.lock().expect("contexts lock poisoned").clone()
    }
}

#[async_trait]
impl ShardClient for ScriptedShard {
    async fn call(&self, ctx: &Context, request: ShardRequest) -> PoolResult<ShardResponse> {
        *self
            .calls
            .lock()
            .expect("calls lock poisoned")
            .entry(request.name())
            .or_default() += 1;

        if self.failing.load(Ordering::SeqCst) {
            return Err(PoolError::Unavailable {
                shard: ShardId::LOCAL,
                reason: "scripted failure".into(),
            });
        }

        if let ShardRequest::Get { .. } = request {
            self.get_contexts
                .lock()
                .expect("contexts lock poisoned")
                .push(ctx.clone());
            if self.blocking.load(Ordering::SeqCst) {
                ctx.done().await;
                return Err(PoolError::Cancelled);
            }
        }

        rpc::serve(&self.inner, ctx, request).await
    }
}

/// Address book of [`ScriptedShard`]s.
#[derive(Default)]
pub struct ScriptedConnector {
    peers: Mutex<HashMap<String, Arc<ScriptedShard>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, address: &str, ram: Ram) -> Arc<ScriptedShard> {
        let shard = Arc::new(ScriptedShard::new(ram));
        self.peers
            .lock()
            .expect("peers lock poisoned")
            .insert(address.to_string(), Arc::clone(&shard));
        shard
    }

    pub fn get(&self, address: &str) -> Option<Arc<ScriptedShard>> {
        self.peers
            .lock()
            .expect("peers lock poisoned")
            .get(address)
            .cloned()
    }

    /// Make `address` refuse new connections. Existing clients keep working.
    pub fn remove(&self, address: &str) -> Option<Arc<ScriptedShard>> {
        self.peers.lock().expect("peers lock poisoned").remove(address)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _ctx: &Context, address: &str) -> PoolResult<Arc<dyn ShardClient>> {
        match self.get(address) {
            Some(shard) => Ok(shard as Arc<dyn ShardClient>),
            None => Err(PoolError::Connect {
                address: address.to_string(),
                reason: "no scripted peer".into(),
            }),
        }
    }
}
