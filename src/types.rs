//! Core types shared by the adapter, the local view and the remote store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Field map of a record, as stored remotely and shown locally.
pub type Fields = Map<String, Value>;

/// Key of a record, assigned by the remote store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

/// Identity of a bound local view.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewId(pub u64);

static NEXT_VIEW_ID: AtomicU64 = AtomicU64::new(1);

impl ViewId {
    /// Allocate a process-unique view id.
    pub fn next() -> Self {
        ViewId(NEXT_VIEW_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewId({})", self.0)
    }
}

/// A record as delivered to the local view.
///
/// The id lives beside the fields, never inside them: it is injected when the
/// record is rendered for the view and is not part of what gets written back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub fields: Fields,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a record from a raw remote value.
    ///
    /// Objects become the field map directly; any other value is wrapped as a
    /// single field named `value_field` so every record has the same shape.
    pub fn from_value(id: impl Into<RecordId>, value: Value, value_field: &str) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(value_field.to_string(), other);
                map
            }
        };
        Self::new(id, fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Render as a JSON object with the id injected under `id_field`.
    pub fn to_json(&self, id_field: &str) -> Value {
        let mut map = self.fields.clone();
        map.insert(id_field.to_string(), Value::String(self.id.0.clone()));
        Value::Object(map)
    }
}

/// Kind of a remote change notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One remote change: a record was added, modified or removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub id: RecordId,
    /// Current value for added/modified changes.
    pub value: Option<Value>,
}

impl Change {
    pub fn added(id: impl Into<RecordId>, value: Value) -> Self {
        Self {
            kind: ChangeKind::Added,
            id: id.into(),
            value: Some(value),
        }
    }

    pub fn modified(id: impl Into<RecordId>, value: Value) -> Self {
        Self {
            kind: ChangeKind::Modified,
            id: id.into(),
            value: Some(value),
        }
    }

    pub fn removed(id: impl Into<RecordId>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            id: id.into(),
            value: None,
        }
    }

    /// True when this change leaves no value behind: a removal, or a
    /// modification that wrote a null tombstone.
    pub fn is_removal(&self) -> bool {
        match self.kind {
            ChangeKind::Removed => true,
            ChangeKind::Added | ChangeKind::Modified => {
                matches!(self.value, None | Some(Value::Null))
            }
        }
    }
}

/// One batched notification: every change since the previous one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub changes: Vec<Change>,
    /// Set when the snapshot reflects writes not yet committed remotely.
    pub has_pending_writes: bool,
}

impl Snapshot {
    pub fn committed(changes: Vec<Change>) -> Self {
        Self {
            changes,
            has_pending_writes: false,
        }
    }

    pub fn pending(changes: Vec<Change>) -> Self {
        Self {
            changes,
            has_pending_writes: true,
        }
    }
}

/// Operation tag of a mutation intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// A local edit that has to be pushed to the remote store.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationIntent {
    Insert { data: Fields },
    Update { id: RecordId, data: Fields },
    Delete { id: RecordId },
}

impl MutationIntent {
    pub fn operation(&self) -> Operation {
        match self {
            MutationIntent::Insert { .. } => Operation::Insert,
            MutationIntent::Update { .. } => Operation::Update,
            MutationIntent::Delete { .. } => Operation::Delete,
        }
    }

    /// Target record, absent for inserts.
    pub fn id(&self) -> Option<&RecordId> {
        match self {
            MutationIntent::Insert { .. } => None,
            MutationIntent::Update { id, .. } | MutationIntent::Delete { id } => Some(id),
        }
    }
}

/// Successful outcome of a write.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// Id assigned by the remote store to an inserted record.
    #[serde(rename = "newid", default, skip_serializing_if = "Option::is_none")]
    pub new_id: Option<RecordId>,
}

impl WriteOutcome {
    pub fn inserted(id: RecordId) -> Self {
        Self { new_id: Some(id) }
    }
}

/// How a backend delivers its change feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One notification per added/modified/removed record.
    Discrete,
    /// One snapshot notification per round-trip, carrying a change list.
    Batched,
}

/// What a remote collection can do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub delivery: DeliveryMode,
    /// False when deletion has to be written as a null tombstone.
    pub native_delete: bool,
}

impl Capabilities {
    pub fn discrete() -> Self {
        Self {
            delivery: DeliveryMode::Discrete,
            native_delete: false,
        }
    }

    pub fn batched() -> Self {
        Self {
            delivery: DeliveryMode::Batched,
            native_delete: true,
        }
    }
}

/// What a load delivered to the view.
#[derive(Clone, Debug, PartialEq)]
pub enum Loaded {
    /// Ordered records for a collection view.
    Records(Vec<Record>),
    /// Field values for a single-record view.
    Value(Fields),
}

impl Loaded {
    pub fn records(&self) -> &[Record] {
        match self {
            Loaded::Records(records) => records,
            Loaded::Value(_) => &[],
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Loaded::Records(records) => records,
            Loaded::Value(_) => Vec::new(),
        }
    }
}
