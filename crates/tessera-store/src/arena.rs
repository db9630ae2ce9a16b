//! Arena-backed object forest.
//!
//! Objects live in a single map keyed by [`NodeId`]. A parent stores the
//! handle of each child object rather than owning it, so attaching an object
//! under a second parent shares the node: writes through either path are
//! visible through both. Nodes no longer reachable from a root are swept
//! after every structural delete.

use std::collections::{BTreeMap, HashMap, HashSet};

use tessera_types::{split_last, split_path, Level, Value};

use crate::error::{StoreError, StoreResult};

/// Stable handle of an object node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// A child slot inside an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    Value(Value),
    Object(NodeId),
}

impl Entry {
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

#[derive(Clone, Debug)]
pub struct ObjectNode {
    pub name: String,
    pub level: Level,
    pub children: BTreeMap<String, Entry>,
}

impl ObjectNode {
    fn new(name: &str, level: Level) -> Self {
        Self {
            name: name.to_string(),
            level,
            children: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ObjectArena {
    nodes: HashMap<NodeId, ObjectNode>,
    roots: BTreeMap<String, NodeId>,
    next_id: u64,
}

impl ObjectArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes, aliased nodes counted once.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_names(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    pub fn node(&self, id: NodeId) -> Option<&ObjectNode> {
        self.nodes.get(&id)
    }

    fn node_mut(&mut self, id: NodeId, path: &str) -> StoreResult<&mut ObjectNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::ObjectNotFound(path.to_string()))
    }

    fn alloc(&mut self, name: &str, level: Level) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, ObjectNode::new(name, level));
        id
    }

    /// Resolve a path to the handle of the object it names.
    pub fn resolve(&self, path: &str) -> StoreResult<NodeId> {
        let segments = split_path(path)?;
        let not_found = || StoreError::ObjectNotFound(path.to_string());

        let mut current = *self.roots.get(segments[0]).ok_or_else(not_found)?;
        for segment in &segments[1..] {
            let node = self.nodes.get(&current).ok_or_else(not_found)?;
            match node.children.get(*segment) {
                Some(Entry::Object(child)) => current = *child,
                _ => return Err(not_found()),
            }
        }
        Ok(current)
    }

    /// Create every missing object along `path` and set the level of the last one.
    pub fn create(&mut self, path: &str, level: Level) -> StoreResult<NodeId> {
        let segments = split_path(path)?;

        let root_name = segments[0];
        let mut current = match self.roots.get(root_name) {
            Some(id) => *id,
            None => {
                let id = self.alloc(root_name, Level::Default);
                self.roots.insert(root_name.to_string(), id);
                id
            }
        };

        for segment in &segments[1..] {
            let existing = self
                .nodes
                .get(&current)
                .and_then(|node| node.children.get(*segment).cloned());
            current = match existing {
                Some(Entry::Object(child)) => child,
                Some(Entry::Value(_)) => {
                    return Err(StoreError::PathConflict {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    })
                }
                None => {
                    let child = self.alloc(segment, Level::Default);
                    self.node_mut(current, path)?
                        .children
                        .insert(segment.to_string(), Entry::Object(child));
                    child
                }
            };
        }

        self.node_mut(current, path)?.level = level;
        Ok(current)
    }

    pub fn set_value(
        &mut self,
        path: &str,
        key: &str,
        value: Value,
    ) -> StoreResult<()> {
        if key.is_empty() {
            return Err(tessera_types::TypeError::EmptyName.into());
        }
        let id = self.resolve(path)?;
        let node = self.node_mut(id, path)?;
        match node.children.get(key) {
            Some(Entry::Value(existing)) if existing.read_only => {
                return Err(StoreError::AlreadyExists(format!("{path}.{key}")))
            }
            Some(Entry::Object(_)) => {
                return Err(StoreError::PathConflict {
                    path: path.to_string(),
                    segment: key.to_string(),
                })
            }
            _ => {}
        }
        node.children.insert(key.to_string(), Entry::Value(value));
        Ok(())
    }

    pub fn get_value(&self, path: &str, key: &str) -> StoreResult<&Value> {
        let id = self.resolve(path)?;
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| StoreError::ObjectNotFound(path.to_string()))?;
        match node.children.get(key) {
            Some(Entry::Value(value)) => Ok(value),
            _ => Err(StoreError::NotFound(key.to_string())),
        }
    }

    pub fn delete_value(&mut self, path: &str, key: &str) -> StoreResult<()> {
        let id = self.resolve(path)?;
        let node = self.node_mut(id, path)?;
        if !matches!(node.children.get(key), Some(Entry::Value(_))) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        node.children.remove(key);
        Ok(())
    }

    /// Number of immediate children of the object at `path`.
    pub fn size(&self, path: &str) -> StoreResult<u64> {
        let id = self.resolve(path)?;
        self.nodes
            .get(&id)
            .map(|node| node.children.len() as u64)
            .ok_or_else(|| StoreError::ObjectNotFound(path.to_string()))
    }

    /// Alias `src` as a child of `dst` under `src`'s own name.
    ///
    /// Rejected when `dst` is `src` itself or is already reachable from
    /// `src`, since the new edge would close a cycle. An existing child
    /// object of `dst` with the same name is replaced; a value with that
    /// name is never overwritten.
    pub fn attach(&mut self, dst_path: &str, src_path: &str) -> StoreResult<()> {
        let dst = self.resolve(dst_path)?;
        let src = self.resolve(src_path)?;

        if self.reachable(src, dst) {
            return Err(StoreError::CircularAttachment {
                dst: dst_path.to_string(),
                src: src_path.to_string(),
            });
        }

        let name = self
            .nodes
            .get(&src)
            .map(|node| node.name.clone())
            .ok_or_else(|| StoreError::ObjectNotFound(src_path.to_string()))?;
        let node = self.node_mut(dst, dst_path)?;
        match node.children.get(&name) {
            Some(Entry::Value(existing)) if existing.read_only => {
                return Err(StoreError::AlreadyExists(format!("{dst_path}.{name}")))
            }
            Some(Entry::Value(_)) => {
                return Err(StoreError::PathConflict {
                    path: dst_path.to_string(),
                    segment: name,
                })
            }
            _ => {}
        }
        let replaced = node.children.insert(name, Entry::Object(src));

        if matches!(replaced, Some(Entry::Object(_))) {
            self.sweep();
        }
        Ok(())
    }

    /// Remove the object named by the last segment of `path` from its parent.
    pub fn delete(&mut self, path: &str) -> StoreResult<()> {
        split_path(path)?;
        match split_last(path) {
            (None, name) => {
                if self.roots.remove(name).is_none() {
                    return Err(StoreError::ObjectNotFound(path.to_string()));
                }
            }
            (Some(parent), name) => {
                let parent_id = self.resolve(parent)?;
                let node = self.node_mut(parent_id, parent)?;
                if !matches!(node.children.get(name), Some(Entry::Object(_))) {
                    return Err(StoreError::ObjectNotFound(path.to_string()));
                }
                node.children.remove(name);
            }
        }
        self.sweep();
        Ok(())
    }

    /// Whether `target` can be reached from `from` by following child edges.
    /// A node is reachable from itself.
    pub fn reachable(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.values().filter_map(|entry| match entry {
                    Entry::Object(child) => Some(*child),
                    Entry::Value(_) => None,
                }));
            }
        }
        false
    }

    /// Drop every node that is no longer reachable from a root.
    fn sweep(&mut self) {
        let mut live = HashSet::new();
        let mut stack: Vec<NodeId> = self.roots.values().copied().collect();
        while let Some(id) = stack.pop() {
            if !live.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                for entry in node.children.values() {
                    if let Entry::Object(child) = entry {
                        stack.push(*child);
                    }
                }
            }
        }
        let before = self.nodes.len();
        self.nodes.retain(|id, _| live.contains(id));
        let swept = before - self.nodes.len();
        if swept > 0 {
            tracing::debug!(swept, "object arena sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_builds_missing_ancestors() {
        let mut arena = ObjectArena::new();
        arena.create("a.b.c", Level::Restricted).unwrap();
        assert_eq!(arena.node_count(), 3);

        let c = arena.resolve("a.b.c").unwrap();
        assert_eq!(arena.node(c).unwrap().level, Level::Restricted);
        let a = arena.resolve("a").unwrap();
        assert_eq!(arena.node(a).unwrap().level, Level::Default);
    }

    #[test]
    fn create_reuses_nodes_and_updates_level() {
        let mut arena = ObjectArena::new();
        let first = arena.create("a.b", Level::Default).unwrap();
        let second = arena.create("a.b", Level::Secret).unwrap();
        assert_eq!(first, second);
        assert_eq!(arena.node(first).unwrap().level, Level::Secret);
        assert_eq!(arena.node_count(), 2);
    }

    #[test]
    fn create_through_value_conflicts() {
        let mut arena = ObjectArena::new();
        arena.create("a", Level::Default).unwrap();
        arena.set_value("a", "leaf", Value::new("v")).unwrap();
        let err = arena.create("a.leaf.deeper", Level::Default).unwrap_err();
        assert!(matches!(err, StoreError::PathConflict { .. }));
    }

    #[test]
    fn delete_sweeps_unreachable_subtree() {
        let mut arena = ObjectArena::new();
        arena.create("a.b.c", Level::Default).unwrap();
        arena.delete("a.b").unwrap();
        assert_eq!(arena.node_count(), 1);
        assert!(arena.resolve("a.b").is_err());
    }

    #[test]
    fn aliased_node_survives_owner_delete() {
        let mut arena = ObjectArena::new();
        arena.create("x", Level::Default).unwrap();
        arena.create("y", Level::Default).unwrap();
        arena.attach("x", "y").unwrap();
        arena.delete("y").unwrap();

        // Still reachable through the alias.
        arena.set_value("x.y", "k", Value::new("v")).unwrap();
        assert_eq!(arena.get_value("x.y", "k").unwrap().data, "v");
        assert_eq!(arena.node_count(), 2);
    }

    #[test]
    fn self_attach_is_circular() {
        let mut arena = ObjectArena::new();
        arena.create("x", Level::Default).unwrap();
        assert!(matches!(
            arena.attach("x", "x"),
            Err(StoreError::CircularAttachment { .. })
        ));
    }

    #[test]
    fn deep_cycle_is_detected() {
        let mut arena = ObjectArena::new();
        arena.create("a", Level::Default).unwrap();
        arena.create("b", Level::Default).unwrap();
        arena.create("c", Level::Default).unwrap();
        arena.attach("a", "b").unwrap();
        arena.attach("b", "c").unwrap();
        // c -> a would close a -> b -> c -> a.
        assert!(matches!(
            arena.attach("c", "a"),
            Err(StoreError::CircularAttachment { .. })
        ));
    }

    #[test]
    fn attaching_ancestor_under_descendant_is_circular() {
        let mut arena = ObjectArena::new();
        arena.create("object1.inner1", Level::Default).unwrap();
        assert!(matches!(
            arena.attach("object1.inner1", "object1"),
            Err(StoreError::CircularAttachment { .. })
        ));
    }

    #[test]
    fn attach_never_overwrites_a_value() {
        let mut arena = ObjectArena::new();
        arena.create("x", Level::Default).unwrap();
        arena.create("y", Level::Default).unwrap();
        arena.create("z", Level::Default).unwrap();
        arena.set_value("x", "y", Value::new("keep").read_only(true)).unwrap();
        arena.set_value("x", "z", Value::new("plain")).unwrap();

        assert!(matches!(
            arena.attach("x", "y"),
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            arena.attach("x", "z"),
            Err(StoreError::PathConflict { .. })
        ));
        assert_eq!(arena.get_value("x", "y").unwrap().data, "keep");
        assert_eq!(arena.get_value("x", "z").unwrap().data, "plain");
    }
}
