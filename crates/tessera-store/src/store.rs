use std::collections::HashMap;
use std::sync::RwLock;

use tessera_types::{
    split_path, Level, ObjectInfo, SetOptions, SetToObjectOptions, User, Value,
};
use tracing::debug;

use crate::arena::ObjectArena;
use crate::error::{StoreError, StoreResult};
use crate::json;
use crate::users::UserTable;

/// Authoritative in-memory state of one shard.
///
/// The flat key space, the object forest, the placement index and the user
/// table each sit behind their own lock, so traffic on one never waits on
/// another. Every operation is synchronous and completes under a single
/// lock acquisition.
pub struct Store {
    values: RwLock<HashMap<String, Value>>,
    objects: RwLock<ObjectArena>,
    info: RwLock<HashMap<String, ObjectInfo>>,
    users: RwLock<UserTable>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            objects: RwLock::new(ObjectArena::new()),
            info: RwLock::new(HashMap::new()),
            users: RwLock::new(UserTable::new()),
        }
    }

    // ---- flat key space ----

    pub fn set(&self, key: &str, data: &str, opts: &SetOptions) -> StoreResult<()> {
        if key.is_empty() {
            return Err(tessera_types::TypeError::EmptyName.into());
        }
        let mut values = self.values.write().expect("values lock poisoned");
        if let Some(existing) = values.get(key) {
            if opts.unique || existing.read_only {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
        }
        values.insert(
            key.to_string(),
            Value::new(data).read_only(opts.read_only).with_level(opts.level),
        );
        debug!(key, "value set");
        Ok(())
    }

    pub fn get(&self, key: &str) -> StoreResult<Value> {
        self.values
            .read()
            .expect("values lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub fn delete(&self, key: &str) -> StoreResult<()> {
        self.values
            .write()
            .expect("values lock poisoned")
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub fn key_count(&self) -> usize {
        self.values.read().expect("values lock poisoned").len()
    }

    // ---- objects ----

    pub fn create_object(&self, path: &str, level: Level) -> StoreResult<()> {
        let mut objects = self.objects.write().expect("objects lock poisoned");
        objects.create(path, level)?;
        debug!(path, %level, "object created");
        Ok(())
    }

    pub fn set_to_object(
        &self,
        path: &str,
        key: &str,
        data: &str,
        opts: &SetToObjectOptions,
    ) -> StoreResult<()> {
        let mut objects = self.objects.write().expect("objects lock poisoned");
        objects.set_value(path, key, Value::new(data).read_only(opts.read_only))
    }

    pub fn get_from_object(&self, path: &str, key: &str) -> StoreResult<String> {
        let objects = self.objects.read().expect("objects lock poisoned");
        objects.get_value(path, key).map(|v| v.data.clone())
    }

    pub fn attach_to_object(&self, dst: &str, src: &str) -> StoreResult<()> {
        let mut objects = self.objects.write().expect("objects lock poisoned");
        objects.attach(dst, src)?;
        debug!(dst, src, "object attached");
        Ok(())
    }

    pub fn delete_object(&self, path: &str) -> StoreResult<()> {
        let mut objects = self.objects.write().expect("objects lock poisoned");
        objects.delete(path)?;
        debug!(path, "object deleted");
        Ok(())
    }

    pub fn delete_attr(&self, path: &str, key: &str) -> StoreResult<()> {
        let mut objects = self.objects.write().expect("objects lock poisoned");
        objects.delete_value(path, key)
    }

    pub fn object_to_json(&self, path: &str) -> StoreResult<String> {
        let objects = self.objects.read().expect("objects lock poisoned");
        json::render(&objects, path)
    }

    /// Number of immediate children of the object at `path`.
    pub fn object_size(&self, path: &str) -> StoreResult<u64> {
        self.objects.read().expect("objects lock poisoned").size(path)
    }

    /// Whether `path` resolves to an object in the tree, nested paths included.
    pub fn is_object(&self, path: &str) -> bool {
        if split_path(path).is_err() {
            return false;
        }
        self.objects
            .read()
            .expect("objects lock poisoned")
            .resolve(path)
            .is_ok()
    }

    /// Level of the object at `path`.
    pub fn object_level(&self, path: &str) -> StoreResult<Level> {
        let objects = self.objects.read().expect("objects lock poisoned");
        let id = objects.resolve(path)?;
        objects
            .node(id)
            .map(|node| node.level)
            .ok_or_else(|| StoreError::ObjectNotFound(path.to_string()))
    }

    pub fn object_names(&self) -> Vec<String> {
        self.objects
            .read()
            .expect("objects lock poisoned")
            .root_names()
            .map(str::to_string)
            .collect()
    }

    // ---- placement index ----

    pub fn add_object_info(&self, name: &str, info: ObjectInfo) {
        self.info
            .write()
            .expect("info lock poisoned")
            .insert(name.to_string(), info);
    }

    pub fn object_info(&self, name: &str) -> StoreResult<ObjectInfo> {
        self.info
            .read()
            .expect("info lock poisoned")
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::ObjectNotFound(name.to_string()))
    }

    /// Returns `true` if an entry was removed.
    pub fn delete_object_info(&self, name: &str) -> bool {
        self.info
            .write()
            .expect("info lock poisoned")
            .remove(name)
            .is_some()
    }

    // ---- users ----

    pub fn create_user(&self, user: User) -> StoreResult<u64> {
        self.users.write().expect("users lock poisoned").create(user)
    }

    /// Insert or replace a user record verbatim (replay and sync).
    pub fn put_user(&self, user: User) -> u64 {
        self.users.write().expect("users lock poisoned").upsert(user)
    }

    pub fn user_by_id(&self, id: u64) -> StoreResult<User> {
        self.users.read().expect("users lock poisoned").by_id(id)
    }

    pub fn user_by_name(&self, login: &str) -> StoreResult<User> {
        self.users.read().expect("users lock poisoned").by_name(login)
    }

    /// Soft-delete a user, returning the now inactive record.
    pub fn delete_user(&self, login: &str) -> StoreResult<User> {
        self.users.write().expect("users lock poisoned").delete(login)
    }

    pub fn save_user(&self, user: User) -> StoreResult<()> {
        self.users.write().expect("users lock poisoned").save(user)
    }

    pub fn users(&self) -> Vec<User> {
        self.users.read().expect("users lock poisoned").active()
    }

    pub fn has_users(&self) -> bool {
        !self.users.read().expect("users lock poisoned").is_empty()
    }

    pub fn last_user_change(&self) -> u64 {
        self.users.read().expect("users lock poisoned").change_seq()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self.key_count();
        let objects = self.objects.read().expect("objects lock poisoned").node_count();
        f.debug_struct("Store")
            .field("keys", &keys)
            .field("objects", &objects)
            .finish()
    }
}
