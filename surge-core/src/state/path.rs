//! Dotted paths into proxy state.
//!
//! `"user.tags.0"` addresses key `user`, then key `tags`, then index 0.
//! Numeric segments index arrays; on objects they are ordinary keys.

use std::fmt;

use serde_json::Value;
use smallvec::SmallVec;

use crate::error::StateError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(SmallVec<[String; 4]>);

impl Path {
    /// The empty path, addressing the whole state.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path. The empty string is the root.
    pub fn parse(dotted: &str) -> Result<Self, StateError> {
        if dotted.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = SmallVec::new();
        for segment in dotted.split('.') {
            if segment.is_empty() {
                return Err(StateError::InvalidPath(dotted.to_string()));
            }
            segments.push(segment.to_string());
        }
        Ok(Self(segments))
    }

    /// A single-segment path.
    pub fn key(key: &str) -> Self {
        let mut segments = SmallVec::new();
        segments.push(key.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// First segment: the top-level key this path lives under.
    pub fn top(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Last segment.
    pub fn bare_key(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn dotted(&self) -> String {
        self.0.join(".")
    }

    pub fn join(&self, other: &Path) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// Segments after the first.
    pub(crate) fn rest(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

fn index_of(segment: &str) -> Option<usize> {
    segment.parse().ok()
}

/// Follow `segments` from `root`.
pub(crate) fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => index_of(segment).and_then(|i| items.get(i)),
        _ => None,
    })
}

fn container_mut<'a>(root: &'a mut Value, path: &Path) -> Result<&'a mut Value, StateError> {
    let parents = &path.segments()[..path.len().saturating_sub(1)];
    let mut current = root;
    for segment in parents {
        current = match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => index_of(segment).and_then(|i| items.get_mut(i)),
            _ => None,
        }
        .ok_or_else(|| StateError::PathNotFound(path.dotted()))?;
    }
    Ok(current)
}

/// Write `value` at `path`, returning the previous value if there was one.
///
/// Parents must already exist. On arrays the index may be one past the end,
/// which appends.
pub(crate) fn assign(
    root: &mut Value,
    path: &Path,
    value: Value,
) -> Result<Option<Value>, StateError> {
    let Some(last) = path.bare_key() else {
        return Err(StateError::InvalidPath(String::new()));
    };
    match container_mut(root, path)? {
        Value::Object(map) => Ok(map.insert(last.to_string(), value)),
        Value::Array(items) => match index_of(last) {
            Some(i) if i < items.len() => Ok(Some(std::mem::replace(&mut items[i], value))),
            Some(i) if i == items.len() => {
                items.push(value);
                Ok(None)
            }
            _ => Err(StateError::PathNotFound(path.dotted())),
        },
        _ => Err(StateError::PathNotFound(path.dotted())),
    }
}

/// Remove the value at `path`.
///
/// Object keys are removed. Array elements are replaced with `null` so the
/// indices of their siblings stay stable.
pub(crate) fn remove(root: &mut Value, path: &Path) -> Result<Option<Value>, StateError> {
    let Some(last) = path.bare_key() else {
        return Err(StateError::InvalidPath(String::new()));
    };
    match container_mut(root, path)? {
        Value::Object(map) => Ok(map.remove(last)),
        Value::Array(items) => Ok(index_of(last)
            .and_then(|i| items.get_mut(i))
            .map(|slot| std::mem::replace(slot, Value::Null))),
        _ => Err(StateError::PathNotFound(path.dotted())),
    }
}

/// Top-level keys of an object value.
pub(crate) fn top_keys(value: &Value) -> Vec<String> {
    value
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}
