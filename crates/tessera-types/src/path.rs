//! Dot-separated object paths.

use crate::error::TypeError;

pub const PATH_SEPARATOR: char = '.';

/// Split a path into its segments, rejecting empty paths and empty segments.
pub fn split_path(path: &str) -> Result<Vec<&str>, TypeError> {
    if path.is_empty() {
        return Err(TypeError::EmptyName);
    }
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(TypeError::EmptySegment(path.to_string()));
    }
    Ok(segments)
}

/// Split off the last segment: `"a.b.c"` becomes `(Some("a.b"), "c")`.
pub fn split_last(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once(PATH_SEPARATOR) {
        Some((parent, name)) => (Some(parent), name),
        None => (None, path),
    }
}

pub fn join_path(parent: &str, name: &str) -> String {
    format!("{parent}{PATH_SEPARATOR}{name}")
}

/// Name of the top-level object a path lives under.
pub fn root_of(path: &str) -> &str {
    path.split(PATH_SEPARATOR).next().unwrap_or(path)
}
