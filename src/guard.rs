//! Echo suppression.
//!
//! Two halves:
//! - [`EchoGuard`] tracks, per view, which record ids have a local write in
//!   flight. Feed notifications for those ids are echoes of our own write and
//!   are dropped. An id is marked before the write is issued and unmarked only
//!   when that write's result is known.
//! - [`Quiet`] wraps a view so that every mutation made on behalf of the
//!   remote store is quiet and cannot queue a write back.

use crate::types::{Fields, Record, RecordId};
use crate::view::{LocalView, Notify};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Per-view set of record ids with a local write in flight.
#[derive(Debug, Default)]
pub struct EchoGuard {
    /// Id -> number of overlapping writes.
    in_flight: Mutex<HashMap<RecordId, usize>>,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as being written until the returned marker is dropped.
    pub fn begin(self: &Arc<Self>, id: RecordId) -> InFlightWrite {
        *self.in_flight.lock().entry(id.clone()).or_insert(0) += 1;
        trace!(id = %id, "write in flight");
        InFlightWrite {
            guard: Arc::clone(self),
            id,
        }
    }

    pub fn is_in_flight(&self, id: &RecordId) -> bool {
        self.in_flight.lock().contains_key(id)
    }

    /// True when no write of this view is in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight.lock().is_empty()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn finish(&self, id: &RecordId) {
        let mut in_flight = self.in_flight.lock();
        if let Some(count) = in_flight.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(id);
            }
        }
    }
}

/// Marker for one in-flight write. Dropping it clears the mark.
#[derive(Debug)]
pub struct InFlightWrite {
    guard: Arc<EchoGuard>,
    id: RecordId,
}

impl InFlightWrite {
    pub fn id(&self) -> &RecordId {
        &self.id
    }
}

impl Drop for InFlightWrite {
    fn drop(&mut self) {
        self.guard.finish(&self.id);
        trace!(id = %self.id, "write settled");
    }
}

/// A view seen through quiet mutations only.
pub struct Quiet<'a> {
    view: &'a dyn LocalView,
}

impl<'a> Quiet<'a> {
    pub fn new(view: &'a dyn LocalView) -> Self {
        Self { view }
    }

    pub fn exists(&self, id: &RecordId) -> bool {
        self.view.exists(id)
    }

    pub fn is_collection(&self) -> bool {
        self.view.is_collection()
    }

    pub fn add(&self, record: Record) {
        self.view.add(record, Notify::Quiet);
    }

    pub fn update_item(&self, id: &RecordId, record: Record) {
        self.view.update_item(id, record, Notify::Quiet);
    }

    pub fn remove(&self, id: &RecordId) {
        self.view.remove(id, Notify::Quiet);
    }

    pub fn set_values(&self, values: Fields) {
        self.view.set_values(values, Notify::Quiet);
    }

    pub fn parse(&self, records: Vec<Record>) {
        self.view.parse(records);
    }
}
