//! In-memory views: an ordered collection and a single-record form.

use super::{LocalView, Notify};
use crate::types::{Fields, MutationIntent, Record, RecordId, ViewId, WriteOutcome};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A user edit waiting to be persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingChange {
    /// Record the edit applies to. Provisional for inserts.
    pub id: RecordId,
    pub intent: MutationIntent,
}

#[derive(Default)]
struct ViewInner {
    order: Vec<RecordId>,
    items: HashMap<RecordId, Record>,
    pending: Vec<PendingChange>,
    next_provisional: u64,
    /// Count of applied mutations, quiet or not.
    mutations: u64,
}

impl ViewInner {
    fn put(&mut self, record: Record) {
        if !self.items.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.items.insert(record.id.clone(), record);
    }
}

/// Ordered in-memory collection view with a pending-changes queue.
///
/// Non-quiet mutations append to the queue the way a data processor would;
/// quiet ones leave it untouched.
pub struct MemoryView {
    id: ViewId,
    inner: RwLock<ViewInner>,
}

impl MemoryView {
    pub fn new() -> Self {
        Self {
            id: ViewId::next(),
            inner: RwLock::new(ViewInner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.inner.read().items.get(id).cloned()
    }

    /// Record ids in view order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.inner.read().order.clone()
    }

    /// Records in view order.
    pub fn records(&self) -> Vec<Record> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.items.get(id).cloned())
            .collect()
    }

    /// Number of mutations applied so far, bulk loads excluded.
    pub fn mutation_count(&self) -> u64 {
        self.inner.read().mutations
    }

    /// User-side insert under a provisional id.
    pub fn insert_local(&self, fields: Fields) -> RecordId {
        let id = {
            let mut inner = self.inner.write();
            inner.next_provisional += 1;
            RecordId(format!("$tmp{}", inner.next_provisional))
        };
        self.add(Record::new(id.clone(), fields), Notify::Emit);
        id
    }

    /// Drain the pending-changes queue.
    pub fn take_pending(&self) -> Vec<PendingChange> {
        std::mem::take(&mut self.inner.write().pending)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.read().pending.len()
    }

    /// Re-key a record, keeping its position. Used once an insert is assigned
    /// its permanent id.
    pub fn change_id(&self, old: &RecordId, new: RecordId) -> bool {
        let mut inner = self.inner.write();
        let Some(mut record) = inner.items.remove(old) else {
            return false;
        };
        if inner.items.contains_key(&new) {
            // The permanent record already arrived; drop the provisional copy.
            inner.order.retain(|id| id != old);
            return true;
        }
        if let Some(slot) = inner.order.iter_mut().find(|id| *id == old) {
            *slot = new.clone();
        }
        record.id = new.clone();
        inner.items.insert(new, record);
        true
    }

    /// Fold a write outcome back into the view. Only inserts carry anything.
    pub fn apply_outcome(&self, pending: &PendingChange, outcome: &WriteOutcome) -> bool {
        match (&pending.intent, &outcome.new_id) {
            (MutationIntent::Insert { .. }, Some(new_id)) if *new_id != pending.id => {
                self.change_id(&pending.id, new_id.clone())
            }
            _ => false,
        }
    }
}

impl Default for MemoryView {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalView for MemoryView {
    fn view_id(&self) -> ViewId {
        self.id
    }

    fn exists(&self, id: &RecordId) -> bool {
        self.inner.read().items.contains_key(id)
    }

    fn add(&self, record: Record, notify: Notify) {
        let mut inner = self.inner.write();
        inner.mutations += 1;
        if notify == Notify::Emit {
            inner.pending.push(PendingChange {
                id: record.id.clone(),
                intent: MutationIntent::Insert {
                    data: record.fields.clone(),
                },
            });
        }
        inner.put(record);
    }

    fn update_item(&self, id: &RecordId, record: Record, notify: Notify) {
        let mut inner = self.inner.write();
        let Some(item) = inner.items.get_mut(id) else {
            return;
        };
        item.fields = record.fields;
        let data = item.fields.clone();
        inner.mutations += 1;
        if notify == Notify::Emit {
            inner.pending.push(PendingChange {
                id: id.clone(),
                intent: MutationIntent::Update {
                    id: id.clone(),
                    data,
                },
            });
        }
    }

    fn remove(&self, id: &RecordId, notify: Notify) {
        let mut inner = self.inner.write();
        if inner.items.remove(id).is_none() {
            return;
        }
        inner.order.retain(|existing| existing != id);
        inner.mutations += 1;
        if notify == Notify::Emit {
            inner.pending.push(PendingChange {
                id: id.clone(),
                intent: MutationIntent::Delete { id: id.clone() },
            });
        }
    }

    fn clear_all(&self) {
        let mut inner = self.inner.write();
        inner.order.clear();
        inner.items.clear();
    }

    fn parse(&self, records: Vec<Record>) {
        let mut inner = self.inner.write();
        for record in records {
            inner.put(record);
        }
    }
}

/// Single-record target holding a flat field map.
pub struct MemoryForm {
    id: ViewId,
    values: RwLock<Fields>,
    /// Field maps of non-quiet edits, in order.
    emitted: RwLock<Vec<Fields>>,
}

impl MemoryForm {
    pub fn new() -> Self {
        Self {
            id: ViewId::next(),
            values: RwLock::new(Fields::new()),
            emitted: RwLock::new(Vec::new()),
        }
    }

    pub fn values(&self) -> Fields {
        self.values.read().clone()
    }

    pub fn emitted_len(&self) -> usize {
        self.emitted.read().len()
    }
}

impl Default for MemoryForm {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalView for MemoryForm {
    fn view_id(&self) -> ViewId {
        self.id
    }

    fn exists(&self, _id: &RecordId) -> bool {
        false
    }

    fn add(&self, _record: Record, _notify: Notify) {}

    fn update_item(&self, _id: &RecordId, _record: Record, _notify: Notify) {}

    fn remove(&self, _id: &RecordId, _notify: Notify) {}

    fn clear_all(&self) {
        self.values.write().clear();
    }

    fn parse(&self, _records: Vec<Record>) {}

    fn is_collection(&self) -> bool {
        false
    }

    fn set_values(&self, values: Fields, notify: Notify) {
        if notify == Notify::Emit {
            self.emitted.write().push(values.clone());
        }
        self.values.write().extend(values);
    }
}
