//! Tab-indented JSON rendering of object trees, for inspection.

use serde::Serialize;

use crate::arena::{Entry, NodeId, ObjectArena};
use crate::error::{StoreError, StoreResult};

#[derive(Serialize)]
struct JsonNode<'a> {
    #[serde(rename = "isObject")]
    is_object: bool,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<Vec<JsonNode<'a>>>,
}

fn build<'a>(arena: &'a ObjectArena, name: &'a str, id: NodeId) -> JsonNode<'a> {
    let values = arena
        .node(id)
        .map(|node| {
            node.children
                .iter()
                .map(|(child_name, entry)| match entry {
                    Entry::Value(value) => JsonNode {
                        is_object: false,
                        name: child_name.as_str(),
                        value: Some(value.data.as_str()),
                        values: None,
                    },
                    Entry::Object(child) => build(arena, child_name, *child),
                })
                .collect()
        })
        .unwrap_or_default();

    JsonNode {
        is_object: true,
        name,
        value: None,
        values: Some(values),
    }
}

/// Render the object at `path`. Children appear in name order.
pub fn render(arena: &ObjectArena, path: &str) -> StoreResult<String> {
    let id = arena.resolve(path)?;
    let name = arena
        .node(id)
        .map(|node| node.name.as_str())
        .ok_or_else(|| StoreError::ObjectNotFound(path.to_string()))?;

    let tree = build(arena, name, id);
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    tree.serialize(&mut ser)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    String::from_utf8(out).map_err(|e| StoreError::Serialization(e.to_string()))
}
