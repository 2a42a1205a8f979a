//! Translation of remote change notifications into view mutations.
//!
//! Discrete feeds deliver one [`Change`] at a time; batched feeds deliver a
//! [`Snapshot`]. Either way the view is only touched through [`Quiet`], and
//! changes for ids with a local write in flight are dropped as echoes.
//! Notifications are applied one at a time under `apply_lock`, in the order
//! the backend reported them.

use crate::config::{AdapterConfig, DuplicateAddPolicy};
use crate::guard::{EchoGuard, Quiet};
use crate::types::{Change, ChangeKind, Fields, Record, RecordId, Snapshot};
use crate::view::LocalView;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// What happened to one change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The view was mutated.
    Applied,
    /// Dropped: a local write for the same id is in flight.
    Echo,
    /// Dropped: an `added` for an id the view already holds.
    Duplicate,
    /// Nothing to do: the id is unknown to the view.
    Unknown,
    /// Collected into the pending `added` batch.
    Batched,
}

/// Applies remote changes to one bound view.
pub struct ChangeTranslator {
    view: Arc<dyn LocalView>,
    guard: Arc<EchoGuard>,
    config: Arc<AdapterConfig>,
    apply_lock: Mutex<()>,
}

impl ChangeTranslator {
    pub fn new(
        view: Arc<dyn LocalView>,
        guard: Arc<EchoGuard>,
        config: Arc<AdapterConfig>,
    ) -> Self {
        Self {
            view,
            guard,
            config,
            apply_lock: Mutex::new(()),
        }
    }

    pub fn view(&self) -> &Arc<dyn LocalView> {
        &self.view
    }

    /// Turn a raw remote value into a view record.
    pub fn to_record(&self, id: RecordId, value: Value) -> Record {
        let mut record = Record::from_value(id, value, &self.config.value_field);
        record.fields.remove(&self.config.id_field);
        record
    }

    /// Bulk-deliver records to the view, in order.
    pub fn deliver_batch(&self, records: Vec<Record>) {
        let _lock = self.apply_lock.lock();
        Quiet::new(&*self.view).parse(records);
    }

    /// Deliver a field map to a single-record view.
    pub fn deliver_values(&self, values: Fields) {
        let _lock = self.apply_lock.lock();
        Quiet::new(&*self.view).set_values(values);
    }

    /// Apply one discrete change.
    pub fn apply_change(&self, change: Change) -> ChangeOutcome {
        let _lock = self.apply_lock.lock();
        let quiet = Quiet::new(&*self.view);
        if self.is_echo(&change) {
            return ChangeOutcome::Echo;
        }
        self.apply_one(&quiet, change, None)
    }

    /// Apply one batched snapshot.
    ///
    /// Returns `None` when the snapshot only reflects pending local writes.
    /// Otherwise returns the records newly added by it, which have already been
    /// delivered to the view as a single batch.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> Option<Vec<Record>> {
        if snapshot.has_pending_writes {
            debug!(changes = snapshot.changes.len(), "dropped pending-write snapshot");
            return None;
        }

        let _lock = self.apply_lock.lock();
        let quiet = Quiet::new(&*self.view);
        let mut batch = Vec::new();
        for change in snapshot.changes {
            if self.is_echo(&change) {
                continue;
            }
            self.apply_one(&quiet, change, Some(&mut batch));
        }

        if !batch.is_empty() {
            debug!(records = batch.len(), "delivering added batch");
            quiet.parse(batch.clone());
        }
        Some(batch)
    }

    fn is_echo(&self, change: &Change) -> bool {
        let echo = self.guard.is_in_flight(&change.id);
        if echo {
            debug!(id = %change.id, kind = ?change.kind, "dropped echo of local write");
        }
        echo
    }

    /// Apply a change. With a batch, new records are collected instead of added.
    fn apply_one(
        &self,
        quiet: &Quiet<'_>,
        change: Change,
        mut batch: Option<&mut Vec<Record>>,
    ) -> ChangeOutcome {
        trace!(id = %change.id, kind = ?change.kind, "applying change");

        if !quiet.is_collection() {
            return self.apply_field(quiet, change);
        }

        if let Some(batch) = batch.as_deref_mut() {
            if let Some(pos) = batch.iter().position(|r| r.id == change.id) {
                return self.apply_batched(batch, pos, change);
            }
        }

        if change.is_removal() {
            if !quiet.exists(&change.id) {
                return ChangeOutcome::Unknown;
            }
            quiet.remove(&change.id);
            return ChangeOutcome::Applied;
        }

        let Change { kind, id, value } = change;
        let record = self.to_record(id.clone(), value.unwrap_or(Value::Null));
        match kind {
            ChangeKind::Added if quiet.exists(&id) => match self.config.duplicate_adds {
                DuplicateAddPolicy::Drop => {
                    debug!(id = %id, "dropped duplicate add");
                    ChangeOutcome::Duplicate
                }
                DuplicateAddPolicy::Update => {
                    quiet.update_item(&id, record);
                    ChangeOutcome::Applied
                }
            },
            ChangeKind::Added => match batch {
                Some(batch) => {
                    if batch.iter().any(|r| r.id == record.id) {
                        return ChangeOutcome::Duplicate;
                    }
                    batch.push(record);
                    ChangeOutcome::Batched
                }
                None => {
                    quiet.add(record);
                    ChangeOutcome::Applied
                }
            },
            ChangeKind::Modified | ChangeKind::Removed => {
                if !quiet.exists(&id) {
                    return ChangeOutcome::Unknown;
                }
                quiet.update_item(&id, record);
                ChangeOutcome::Applied
            }
        }
    }

    /// A later change to a record added earlier in the same snapshot.
    fn apply_batched(
        &self,
        batch: &mut Vec<Record>,
        pos: usize,
        change: Change,
    ) -> ChangeOutcome {
        if change.is_removal() {
            batch.remove(pos);
            return ChangeOutcome::Batched;
        }
        if change.kind == ChangeKind::Added
            && self.config.duplicate_adds == DuplicateAddPolicy::Drop
        {
            debug!(id = %change.id, "dropped duplicate add");
            return ChangeOutcome::Duplicate;
        }
        let Change { id, value, .. } = change;
        batch[pos] = self.to_record(id, value.unwrap_or(Value::Null));
        ChangeOutcome::Batched
    }

    /// Single-record targets: the change id names a field of the record.
    fn apply_field(&self, quiet: &Quiet<'_>, change: Change) -> ChangeOutcome {
        let value = if change.is_removal() {
            Value::Null
        } else {
            change.value.unwrap_or(Value::Null)
        };
        let mut values = Fields::new();
        values.insert(change.id.0, value);
        quiet.set_values(values);
        ChangeOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{MemoryForm, MemoryView};
    use serde_json::json;

    fn translator_for(view: Arc<MemoryView>) -> (ChangeTranslator, Arc<EchoGuard>) {
        let guard = Arc::new(EchoGuard::new());
        let translator = ChangeTranslator::new(
            view,
            Arc::clone(&guard),
            Arc::new(AdapterConfig::default()),
        );
        (translator, guard)
    }

    fn loaded_view() -> Arc<MemoryView> {
        let view = Arc::new(MemoryView::new());
        view.parse(vec![
            Record::from_value("a", json!({"v": 1}), "value"),
            Record::from_value("b", json!({"v": 2}), "value"),
        ]);
        view
    }

    #[test]
    fn test_duplicate_add_dropped() {
        let view = loaded_view();
        let (translator, _) = translator_for(Arc::clone(&view));

        let outcome = translator.apply_change(Change::added("a", json!({"v": 1})));
        assert_eq!(outcome, ChangeOutcome::Duplicate);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_duplicate_add_as_update() {
        let view = loaded_view();
        let guard = Arc::new(EchoGuard::new());
        let config = AdapterConfig::default().with_duplicate_adds(DuplicateAddPolicy::Update);
        let translator = ChangeTranslator::new(view.clone(), guard, Arc::new(config));

        translator.apply_change(Change::added("a", json!({"v": 10})));
        assert_eq!(view.len(), 2);
        assert_eq!(view.get(&"a".into()).unwrap().get("v"), Some(&json!(10)));
    }

    #[test]
    fn test_discrete_add_modify_remove() {
        let view = loaded_view();
        let (translator, _) = translator_for(Arc::clone(&view));

        assert_eq!(
            translator.apply_change(Change::added("c", json!({"v": 3, "id": "spoofed"}))),
            ChangeOutcome::Applied
        );
        let c = view.get(&"c".into()).unwrap();
        assert_eq!(c.id, RecordId::from("c"));
        assert!(c.get("id").is_none());

        translator.apply_change(Change::modified("a", json!({"v": 5})));
        assert_eq!(view.get(&"a".into()).unwrap().get("v"), Some(&json!(5)));

        translator.apply_change(Change::removed("b"));
        assert!(!view.exists(&"b".into()));
        assert_eq!(view.pending_len(), 0);
    }

    #[test]
    fn test_tombstone_modification_removes() {
        let view = loaded_view();
        let (translator, _) = translator_for(Arc::clone(&view));

        assert_eq!(
            translator.apply_change(Change::modified("a", Value::Null)),
            ChangeOutcome::Applied
        );
        assert!(!view.exists(&"a".into()));
        assert_eq!(
            translator.apply_change(Change::removed("zz")),
            ChangeOutcome::Unknown
        );
    }

    #[test]
    fn test_echo_dropped_per_record() {
        let view = loaded_view();
        let (translator, guard) = translator_for(Arc::clone(&view));
        let _marker = guard.begin("a".into());

        assert_eq!(
            translator.apply_change(Change::modified("a", json!({"v": 9}))),
            ChangeOutcome::Echo
        );
        assert_eq!(view.get(&"a".into()).unwrap().get("v"), Some(&json!(1)));

        // Other records are unaffected by the in-flight write.
        translator.apply_change(Change::modified("b", json!({"v": 9})));
        assert_eq!(view.get(&"b".into()).unwrap().get("v"), Some(&json!(9)));
    }

    #[test]
    fn test_pending_snapshot_ignored() {
        let view = loaded_view();
        let (translator, _) = translator_for(Arc::clone(&view));

        let result = translator.apply_snapshot(Snapshot::pending(vec![
            Change::added("c", json!({"v": 3})),
            Change::removed("a"),
        ]));
        assert!(result.is_none());
        assert_eq!(view.len(), 2);
        assert_eq!(view.mutation_count(), 0);
    }

    #[test]
    fn test_snapshot_batches_additions() {
        let view = loaded_view();
        let (translator, _) = translator_for(Arc::clone(&view));

        let batch = translator
            .apply_snapshot(Snapshot::committed(vec![
                Change::added("a", json!({"v": 1})),
                Change::added("c", json!(3)),
                Change::modified("b", json!({"v": 20})),
                Change::added("d", json!({"v": 4})),
                Change::removed("a"),
            ]))
            .unwrap();

        let ids: Vec<_> = batch.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
        assert_eq!(batch[0].get("value"), Some(&json!(3)));
        assert_eq!(
            view.ids(),
            vec![RecordId::from("b"), RecordId::from("c"), RecordId::from("d")]
        );
        assert_eq!(view.get(&"b".into()).unwrap().get("v"), Some(&json!(20)));
    }

    #[test]
    fn test_snapshot_applies_changes_in_order() {
        let view = loaded_view();
        let (translator, _) = translator_for(Arc::clone(&view));

        let batch = translator
            .apply_snapshot(Snapshot::committed(vec![
                Change::added("c", json!({"v": 1})),
                Change::removed("c"),
                Change::added("d", json!({"v": 1})),
                Change::modified("d", json!({"v": 2})),
                Change::added("e", json!({"v": 1})),
                Change::modified("e", Value::Null),
            ]))
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(
            view.ids(),
            vec![RecordId::from("a"), RecordId::from("b"), RecordId::from("d")]
        );
        assert_eq!(view.get(&"d".into()).unwrap().get("v"), Some(&json!(2)));
    }

    #[test]
    fn test_snapshot_readds_removed_record() {
        let view = loaded_view();
        let (translator, _) = translator_for(Arc::clone(&view));

        translator.apply_snapshot(Snapshot::committed(vec![
            Change::removed("a"),
            Change::added("a", json!({"v": 7})),
        ]));

        assert_eq!(view.ids(), vec![RecordId::from("b"), RecordId::from("a")]);
        assert_eq!(view.get(&"a".into()).unwrap().get("v"), Some(&json!(7)));
    }

    #[test]
    fn test_form_partial_updates() {
        let form = Arc::new(MemoryForm::new());
        let translator = ChangeTranslator::new(
            form.clone(),
            Arc::new(EchoGuard::new()),
            Arc::new(AdapterConfig::default()),
        );

        translator.apply_change(Change::modified("title", json!("Dune")));
        translator.apply_change(Change::removed("year"));
        assert_eq!(form.values().get("title"), Some(&json!("Dune")));
        assert_eq!(form.values().get("year"), Some(&Value::Null));
        assert_eq!(form.emitted_len(), 0);
    }
}
