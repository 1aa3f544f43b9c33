//! Identities, record keys and record paths.
//!
//! A record is a JSON document held by the real-time backend. Fields are
//! addressed with dotted paths such as `attr.position`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifies a connected client as assigned by the backend at login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey(String);

impl RecordKey {
    pub const USER_PREFIX: &'static str = "user/";

    pub fn new(key: impl Into<String>) -> Self {
        RecordKey(key.into())
    }

    /// Key of a client's pose record: `user/<id>`.
    pub fn user(id: &ClientId) -> Self {
        RecordKey(format!("{}{}", Self::USER_PREFIX, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Well-known paths inside a pose record.
pub mod paths {
    pub const TYPE: &str = "type";
    pub const ATTR: &str = "attr";
    pub const POSITION: &str = "attr.position";
    pub const POSITION_X: &str = "attr.position.x";
    pub const ROTATION: &str = "attr.rotation";
}

/// Reads the value at a dotted path.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |v, segment| v.get(segment))
}

/// Writes `new` at a dotted path, creating intermediate objects and replacing
/// non-object values that sit in the way.
pub fn set_path(value: &mut Value, path: &str, new: Value) {
    if path.is_empty() {
        *value = new;
        return;
    }
    let mut cursor = value;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Value::Object(map) = cursor else {
            unreachable!("cursor was just made an object");
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), new);
            return;
        }
        cursor = map.entry(segment.to_string()).or_insert(Value::Null);
    }
}

/// Whether a write at `written` can change the value observed at `watched`.
///
/// True when either path is a prefix of the other on segment boundaries.
pub fn paths_overlap(watched: &str, written: &str) -> bool {
    fn covers(outer: &str, inner: &str) -> bool {
        outer.is_empty()
            || inner == outer
            || (inner.starts_with(outer) && inner.as_bytes().get(outer.len()) == Some(&b'.'))
    }
    covers(watched, written) || covers(written, watched)
}
