//! Local view contract.
//!
//! A view is an ordered record container (a grid, a list, a data collection)
//! or a single-record target (a form). The adapter only ever calls into it;
//! rendering and storage stay on the view's side.
//!
//! Each mutation takes a [`Notify`] mode. `Emit` is a user edit: the view
//! raises its own "changed, please persist" notification. `Quiet` is a
//! mutation made on behalf of the remote store and must not raise it,
//! otherwise the change would be written straight back.

mod memory;

pub use memory::{MemoryForm, MemoryView, PendingChange};

use crate::types::{Fields, Record, RecordId, ViewId};

/// Whether a mutation raises the view's persistence notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notify {
    Emit,
    Quiet,
}

/// Operations the adapter needs from a local view.
pub trait LocalView: Send + Sync {
    fn view_id(&self) -> ViewId;

    fn exists(&self, id: &RecordId) -> bool;

    fn add(&self, record: Record, notify: Notify);

    fn update_item(&self, id: &RecordId, record: Record, notify: Notify);

    fn remove(&self, id: &RecordId, notify: Notify);

    fn clear_all(&self);

    /// Bulk-load records, appended in the given order. Never notifies.
    fn parse(&self, records: Vec<Record>);

    /// False for single-record targets.
    fn is_collection(&self) -> bool {
        true
    }

    /// Partial field update of a single-record target.
    ///
    /// Collection views have no meaningful implementation and ignore it.
    fn set_values(&self, values: Fields, notify: Notify) {
        let _ = (values, notify);
    }
}
