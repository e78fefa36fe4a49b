//! Element paths into nested records
//!
//! Target assignment in a map writes into a location inside an evolving
//! output record. [`write_value`] performs that write: it walks an
//! [`ElementPath`], builds missing intermediate records, appends or
//! overwrites at the final key and reports the concrete location written so
//! callers can keep a handle to it.

use crate::{Error, Result};
use serde_json::{Map, Value};
use std::fmt;

/// Keys that may never be assigned through a map
pub const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// One step of an element path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object property
    Key(String),
    /// Array position
    Index(usize),
}

/// A path from a record root to a nested location
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ElementPath {
    segments: Vec<PathSegment>,
}

impl ElementPath {
    /// The empty path, addressing the record itself
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted element path such as `name.given`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for empty segments and
    /// [`Error::InvalidKey`] for reserved keys.
    pub fn parse(dotted: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for part in dotted.split('.') {
            if part.is_empty() {
                return Err(Error::invalid_path(dotted, "empty path segment"));
            }
            validate_key(part)?;
            segments.push(PathSegment::Key(part.to_string()));
        }
        Ok(Self { segments })
    }

    /// Borrow the segments
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// True for the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a segment
    pub fn push(&mut self, segment: PathSegment) {
        self.segments.push(segment);
    }

    /// Concatenate two paths
    #[must_use]
    pub fn join(&self, other: &ElementPath) -> ElementPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        ElementPath { segments }
    }

    /// The last property key on the path, skipping trailing indexes
    #[must_use]
    pub fn last_key(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|segment| match segment {
            PathSegment::Key(key) => Some(key.as_str()),
            PathSegment::Index(_) => None,
        })
    }
}

impl fmt::Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "<root>");
        }
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if index == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// Reject keys that may not be assigned
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] when `key` is reserved.
pub fn validate_key(key: &str) -> Result<()> {
    if RESERVED_KEYS.contains(&key) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Resolve a path inside a record
#[must_use]
pub fn resolve<'v>(root: &'v Value, path: &ElementPath) -> Option<&'v Value> {
    path.segments
        .iter()
        .try_fold(root, |current, segment| match segment {
            PathSegment::Key(key) => current.as_object()?.get(key),
            PathSegment::Index(index) => current.as_array()?.get(*index),
        })
}

/// Resolve a path inside a record for mutation
pub fn resolve_mut<'v>(root: &'v mut Value, path: &ElementPath) -> Option<&'v mut Value> {
    let mut current = root;
    for segment in &path.segments {
        current = match segment {
            PathSegment::Key(key) => current.as_object_mut()?.get_mut(key)?,
            PathSegment::Index(index) => current.as_array_mut()?.get_mut(*index)?,
        };
    }
    Some(current)
}

/// Write `value` at `element` below the location `base` of `root`
///
/// Missing intermediate records are created; when an intermediate property
/// is an array the write descends into its last item. With `append` the
/// final property is treated as repeating and the value is pushed onto it,
/// otherwise the property is overwritten. Returns the full path of the
/// written value, including the array index when appending.
///
/// # Errors
///
/// Fails when `base` does not exist, when a location that must be a record
/// is a scalar, or when a reserved key is used.
pub fn write_value(
    root: &mut Value,
    base: &ElementPath,
    element: &ElementPath,
    value: Value,
    append: bool,
) -> Result<ElementPath> {
    let Some((last, intermediate)) = element.segments.split_last() else {
        return Err(Error::invalid_path(element.to_string(), "empty element path"));
    };

    let mut written = base.clone();
    let mut current = resolve_mut(root, base).ok_or_else(|| Error::path_not_found(base))?;

    for segment in intermediate {
        current = descend(current, segment, &mut written)?;
    }

    match last {
        PathSegment::Key(key) => {
            validate_key(key)?;
            let found = json_kind(current);
            let Some(object) = current.as_object_mut() else {
                return Err(Error::type_mismatch(&written, "object", found));
            };
            written.push(PathSegment::Key(key.clone()));

            if append {
                let index = match object.get_mut(key) {
                    Some(Value::Array(items)) => {
                        items.push(value);
                        items.len() - 1
                    }
                    Some(existing) if !existing.is_null() => {
                        let previous = existing.take();
                        *existing = Value::Array(vec![previous, value]);
                        1
                    }
                    _ => {
                        object.insert(key.clone(), Value::Array(vec![value]));
                        0
                    }
                };
                written.push(PathSegment::Index(index));
            } else {
                object.insert(key.clone(), value);
            }
        }
        PathSegment::Index(index) => {
            let found = json_kind(current);
            let Some(items) = current.as_array_mut() else {
                return Err(Error::type_mismatch(&written, "array", found));
            };
            if let Some(slot) = items.get_mut(*index) {
                *slot = value;
            } else if *index == items.len() {
                items.push(value);
            } else {
                return Err(Error::path_not_found(format!("{written}[{index}]")));
            }
            written.push(PathSegment::Index(*index));
        }
    }

    Ok(written)
}

fn descend<'v>(
    current: &'v mut Value,
    segment: &PathSegment,
    written: &mut ElementPath,
) -> Result<&'v mut Value> {
    match segment {
        PathSegment::Key(key) => {
            validate_key(key)?;
            let found = json_kind(current);
            let object = current
                .as_object_mut()
                .ok_or_else(|| Error::type_mismatch(&*written, "object", found))?;
            written.push(PathSegment::Key(key.clone()));

            let child = object
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }

            match child {
                Value::Array(items) => {
                    if items.is_empty() {
                        items.push(Value::Object(Map::new()));
                    }
                    let index = items.len() - 1;
                    written.push(PathSegment::Index(index));
                    Ok(&mut items[index])
                }
                other => Ok(other),
            }
        }
        PathSegment::Index(index) => {
            let found = json_kind(current);
            let path = written.to_string();
            let items = current
                .as_array_mut()
                .ok_or_else(|| Error::type_mismatch(path.clone(), "array", found))?;
            written.push(PathSegment::Index(*index));
            items
                .get_mut(*index)
                .ok_or_else(|| Error::path_not_found(format!("{path}[{index}]")))
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
