//! Change log entries and decoded change events
//!
//! The source hands out raw [`LogEntry`] values in log order. Each entry is
//! decoded exactly once, at the boundary, into a [`ChangeEvent`] whose
//! operation is a closed [`OpKind`]. Unknown operation codes are rejected
//! with a decode error instead of falling through.

use crate::common::{CdcError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Logical position in the source change log.
///
/// The high 32 bits carry seconds since the epoch, the low 32 bits an
/// increment ordering entries within the same second. Ordering of the
/// packed value is the log order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The position before any entry.
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(seconds: u32, increment: u32) -> Self {
        Self(((seconds as u64) << 32) | increment as u64)
    }

    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Seconds half.
    pub fn seconds(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Increment half.
    pub fn increment(&self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.seconds(), self.increment())
    }
}

/// Operation kind of a change log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Insert,
    Update,
    Delete,
    /// Log-internal marker, never dispatched
    Noop,
}

impl OpKind {
    /// Decode a change log operation code (`i`, `u`, `d`, `n`).
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "i" => Ok(Self::Insert),
            "u" => Ok(Self::Update),
            "d" => Ok(Self::Delete),
            "n" => Ok(Self::Noop),
            other => Err(CdcError::decode(format!("unknown operation kind '{}'", other))),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Insert => "i",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Noop => "n",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Noop => write!(f, "noop"),
        }
    }
}

/// Raw change log entry as the source stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Qualified namespace (`database.dataset`)
    #[serde(rename = "ns")]
    pub namespace: String,
    /// Operation code
    pub op: String,
    /// Log position
    pub ts: Timestamp,
    /// Inserted document, update specification or delete selector
    #[serde(default)]
    pub o: Value,
    /// Update selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o2: Option<Value>,
}

impl LogEntry {
    pub fn insert(namespace: impl Into<String>, ts: Timestamp, document: Value) -> Self {
        Self {
            namespace: namespace.into(),
            op: OpKind::Insert.code().to_string(),
            ts,
            o: document,
            o2: None,
        }
    }

    pub fn update(namespace: impl Into<String>, ts: Timestamp, selector: Value, spec: Value) -> Self {
        Self {
            namespace: namespace.into(),
            op: OpKind::Update.code().to_string(),
            ts,
            o: spec,
            o2: Some(selector),
        }
    }

    pub fn delete(namespace: impl Into<String>, ts: Timestamp, selector: Value) -> Self {
        Self {
            namespace: namespace.into(),
            op: OpKind::Delete.code().to_string(),
            ts,
            o: selector,
            o2: None,
        }
    }

    pub fn noop(ts: Timestamp) -> Self {
        Self {
            namespace: String::new(),
            op: OpKind::Noop.code().to_string(),
            ts,
            o: Value::Null,
            o2: None,
        }
    }

    /// Whether this is a log-internal no-op, without full decoding.
    pub fn is_noop(&self) -> bool {
        self.op == OpKind::Noop.code()
    }
}

/// A decoded change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub namespace: String,
    pub op: OpKind,
    pub timestamp: Timestamp,
    /// Full document (insert), update specification (update) or
    /// delete selector (delete)
    pub document: Value,
    /// `$set` fragment, or the whole replacement document
    pub set: Option<Value>,
    /// `$unset` fragment
    pub unset: Option<Value>,
    /// Selector identifying the updated record
    pub prior_identifier: Option<Value>,
}

impl ChangeEvent {
    /// Identifier value of the affected record.
    ///
    /// Updates are addressed through their selector, inserts and deletes
    /// through their own document.
    pub fn identifier(&self, id_field: &str) -> Option<&Value> {
        match self.op {
            OpKind::Update => self.prior_identifier.as_ref()?.get(id_field),
            OpKind::Insert | OpKind::Delete => self.document.get(id_field),
            OpKind::Noop => None,
        }
    }
}

impl TryFrom<LogEntry> for ChangeEvent {
    type Error = CdcError;

    fn try_from(entry: LogEntry) -> Result<Self> {
        let op = OpKind::from_code(&entry.op)?;

        let (set, unset) = match op {
            OpKind::Update => split_update(&entry.o),
            _ => (None, None),
        };

        Ok(Self {
            namespace: entry.namespace,
            op,
            timestamp: entry.ts,
            document: entry.o,
            set,
            unset,
            prior_identifier: entry.o2,
        })
    }
}

/// Split an update specification into its set and unset fragments.
///
/// A specification without any `$` operator is a full replacement and is
/// returned as the set fragment.
fn split_update(spec: &Value) -> (Option<Value>, Option<Value>) {
    let Some(map) = spec.as_object() else {
        return (None, None);
    };

    if !map.keys().any(|k| k.starts_with('$')) {
        return (Some(spec.clone()), None);
    }

    (map.get("$set").cloned(), map.get("$unset").cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_halves() {
        let ts = Timestamp::new(1_700_000_000, 7);
        assert_eq!(ts.seconds(), 1_700_000_000);
        assert_eq!(ts.increment(), 7);
        assert_eq!(ts.to_string(), "1700000000:7");
        assert!(Timestamp::new(1, 0) > Timestamp::new(0, u32::MAX));
        assert!(Timestamp::ZERO.is_zero());
    }

    #[test]
    fn test_timestamp_serde_transparent() {
        let ts = Timestamp::from_u64(42);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "42");
        let back: Timestamp = serde_json::from_str("42").unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_op_kind_codes() {
        assert_eq!(OpKind::from_code("i").unwrap(), OpKind::Insert);
        assert_eq!(OpKind::from_code("u").unwrap(), OpKind::Update);
        assert_eq!(OpKind::from_code("d").unwrap(), OpKind::Delete);
        assert_eq!(OpKind::from_code("n").unwrap(), OpKind::Noop);

        let err = OpKind::from_code("c").unwrap_err();
        assert!(matches!(err, CdcError::Decode(_)));
    }

    #[test]
    fn test_decode_update_fragments() {
        let entry = LogEntry::update(
            "app.users",
            Timestamp::new(10, 1),
            json!({"_id": 2}),
            json!({"$set": {"age": 31}, "$unset": {"nick": ""}}),
        );
        let event = ChangeEvent::try_from(entry).unwrap();

        assert_eq!(event.op, OpKind::Update);
        assert_eq!(event.set, Some(json!({"age": 31})));
        assert_eq!(event.unset, Some(json!({"nick": ""})));
        assert_eq!(event.identifier("_id"), Some(&json!(2)));
    }

    #[test]
    fn test_decode_replacement_update() {
        let entry = LogEntry::update(
            "app.users",
            Timestamp::new(10, 2),
            json!({"_id": 2}),
            json!({"_id": 2, "name": "bo", "age": 5}),
        );
        let event = ChangeEvent::try_from(entry).unwrap();
        assert_eq!(event.set, Some(json!({"_id": 2, "name": "bo", "age": 5})));
        assert_eq!(event.unset, None);
    }

    #[test]
    fn test_decode_insert_and_delete_identifier() {
        let insert = ChangeEvent::try_from(LogEntry::insert(
            "app.users",
            Timestamp::new(1, 0),
            json!({"_id": 4, "name": "dee"}),
        ))
        .unwrap();
        assert_eq!(insert.identifier("_id"), Some(&json!(4)));
        assert!(insert.set.is_none());

        let delete = ChangeEvent::try_from(LogEntry::delete(
            "app.users",
            Timestamp::new(1, 1),
            json!({"_id": 4}),
        ))
        .unwrap();
        assert_eq!(delete.identifier("_id"), Some(&json!(4)));
    }

    #[test]
    fn test_log_entry_deserialize() {
        let entry: LogEntry =
            serde_json::from_str(r#"{"ns":"app.users","op":"i","ts":5,"o":{"_id":1}}"#).unwrap();
        assert_eq!(entry.namespace, "app.users");
        assert_eq!(entry.ts, Timestamp::from_u64(5));
        assert!(entry.o2.is_none());
        assert!(!entry.is_noop());
        assert!(LogEntry::noop(Timestamp::ZERO).is_noop());
    }
}
