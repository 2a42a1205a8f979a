//! Remote store contract.
//!
//! The adapter talks to the realtime store only through these traits:
//! - [`RemoteStore`] turns a collection path into a live handle
//! - [`RemoteCollection`] offers a one-shot read, a change feed and keyed writes
//!
//! Every call is non-blocking. Results arrive through the supplied callbacks,
//! possibly synchronously from inside the call itself, so callers must not
//! hold locks the callbacks need.
//!
//! [`MemoryStore`] is a complete in-process implementation used by tests and
//! local development.

mod memory;

pub use memory::{MemoryCollection, MemoryStore, WriteKind, WriteLogEntry};

use crate::error::RemoteResult;
use crate::types::{Capabilities, Change, Fields, RecordId, Snapshot};
use serde_json::Value;
use std::sync::Arc;

/// Unique identifier of a feed listener on a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// One notification on a collection's change feed.
#[derive(Clone, Debug)]
pub enum FeedEvent {
    /// Discrete delivery: a single change.
    Change(Change),
    /// Batched delivery: all changes of one round-trip.
    Snapshot(Snapshot),
    /// The feed failed; no further events follow.
    Error(crate::error::RemoteError),
}

/// Listener installed on a change feed.
pub type FeedListener = Arc<dyn Fn(FeedEvent) + Send + Sync>;

/// Completion of a bulk read: `(id, value)` pairs in the store's natural order.
pub type ReadCallback = Box<dyn FnOnce(RemoteResult<Vec<(RecordId, Value)>>) + Send>;

/// Completion of a write.
pub type WriteCallback = Box<dyn FnOnce(RemoteResult<()>) + Send>;

/// Resolves collection paths to live handles.
pub trait RemoteStore: Send + Sync {
    /// Create a handle for the collection at `path`.
    fn collection(&self, path: &str) -> RemoteResult<Arc<dyn RemoteCollection>>;
}

/// A live handle to one remote collection.
pub trait RemoteCollection: Send + Sync {
    /// Path this handle points at.
    fn path(&self) -> &str;

    /// Delivery shape and deletion support of the backend.
    fn capabilities(&self) -> Capabilities;

    /// Read the whole collection once.
    fn read_all(&self, done: ReadCallback);

    /// Install a change-feed listener.
    ///
    /// Backends may replay existing content to the new listener, as `added`
    /// changes or as a first snapshot, before any live change.
    fn subscribe(&self, listener: FeedListener) -> ListenerId;

    /// Remove a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: ListenerId);

    /// Reserve a fresh key for a record about to be created.
    fn allocate_id(&self) -> RecordId;

    /// Create a record under a key obtained from [`allocate_id`](Self::allocate_id).
    fn create(&self, id: &RecordId, data: Fields, done: WriteCallback);

    /// Merge `data` into the record at `id`.
    fn update(&self, id: &RecordId, data: Fields, done: WriteCallback);

    /// Replace the value at `id`. A null value is a tombstone.
    fn set(&self, id: &RecordId, value: Value, done: WriteCallback);

    /// Delete the record at `id`. Only valid with native deletion support.
    fn delete(&self, id: &RecordId, done: WriteCallback);
}
