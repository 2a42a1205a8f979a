//! In-process remote store.
//!
//! Behaves like a realtime document store seen from several clients: every
//! handle returned by [`MemoryStore::collection`] is its own client, writes
//! are broadcast to the listeners of every client, and in batched mode the
//! writing client first sees its own write as a pending-write snapshot.

use super::{
    FeedEvent, FeedListener, ListenerId, ReadCallback, RemoteCollection, RemoteStore,
    WriteCallback,
};
use crate::error::{RemoteError, RemoteResult};
use crate::types::{Capabilities, Change, DeliveryMode, Fields, RecordId, Snapshot};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Characters a path segment may not contain.
const FORBIDDEN_PATH_CHARS: &[char] = &['.', '#', '$', '[', ']'];

/// Kind of a logged write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
    Set,
    Delete,
}

/// A write as it reached the store, failed or not.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteLogEntry {
    pub client: u64,
    pub path: String,
    pub id: RecordId,
    pub kind: WriteKind,
    /// Payload exactly as sent (None for deletes).
    pub payload: Option<Value>,
}

/// Internal listener state.
struct Listener {
    path: String,
    client: u64,
    callback: FeedListener,
}

struct Shared {
    capabilities: Capabilities,
    /// Records by collection path, in key order.
    collections: RwLock<HashMap<String, BTreeMap<RecordId, Value>>>,
    listeners: RwLock<HashMap<ListenerId, Listener>>,
    next_listener: AtomicU64,
    next_client: AtomicU64,
    next_key: AtomicU64,
    write_log: Mutex<Vec<WriteLogEntry>>,
    /// Acknowledgements withheld until `flush_acks` (None = deliver at once).
    held_acks: Mutex<Option<Vec<(WriteCallback, RemoteResult<()>)>>>,
    /// Bulk reads withheld until `flush_reads`.
    held_reads: Mutex<Option<Vec<(ReadCallback, RemoteResult<Vec<(RecordId, Value)>>)>>>,
    write_failures: Mutex<VecDeque<RemoteError>>,
    read_failures: Mutex<VecDeque<RemoteError>>,
}

impl Shared {
    fn complete(&self, done: WriteCallback, result: RemoteResult<()>) {
        {
            let mut held = self.held_acks.lock();
            if let Some(queue) = held.as_mut() {
                queue.push((done, result));
                return;
            }
        }
        done(result);
    }

    /// Snapshot the callbacks of `path` under the lock, call them after.
    fn broadcast(&self, path: &str, writer: Option<u64>, change: Change) {
        let targets: Vec<(u64, FeedListener)> = {
            let listeners = self.listeners.read();
            listeners
                .values()
                .filter(|l| l.path == path)
                .map(|l| (l.client, Arc::clone(&l.callback)))
                .collect()
        };

        for (client, callback) in targets {
            let event = match self.capabilities.delivery {
                DeliveryMode::Discrete => FeedEvent::Change(change.clone()),
                DeliveryMode::Batched if Some(client) == writer => {
                    FeedEvent::Snapshot(Snapshot::pending(vec![change.clone()]))
                }
                DeliveryMode::Batched => {
                    FeedEvent::Snapshot(Snapshot::committed(vec![change.clone()]))
                }
            };
            callback(event);
        }
    }
}

/// In-memory realtime store.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            shared: Arc::new(Shared {
                capabilities,
                collections: RwLock::new(HashMap::new()),
                listeners: RwLock::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                next_client: AtomicU64::new(1),
                next_key: AtomicU64::new(1),
                write_log: Mutex::new(Vec::new()),
                held_acks: Mutex::new(None),
                held_reads: Mutex::new(None),
                write_failures: Mutex::new(VecDeque::new()),
                read_failures: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Store with per-record change events and tombstone deletion.
    pub fn discrete() -> Self {
        Self::new(Capabilities::discrete())
    }

    /// Store with snapshot-diff events and native deletion.
    pub fn batched() -> Self {
        Self::new(Capabilities::batched())
    }

    /// Put a value in place without notifying anyone.
    pub fn seed(&self, path: &str, id: impl Into<RecordId>, value: Value) {
        self.shared
            .collections
            .write()
            .entry(normalize_path(path).unwrap_or_default())
            .or_default()
            .insert(id.into(), value);
    }

    /// Current raw value at `path/id`, tombstones included.
    pub fn value(&self, path: &str, id: &RecordId) -> Option<Value> {
        let path = normalize_path(path).ok()?;
        self.shared
            .collections
            .read()
            .get(&path)
            .and_then(|records| records.get(id).cloned())
    }

    /// Number of live (non-tombstone) records at `path`.
    pub fn len(&self, path: &str) -> usize {
        let Ok(path) = normalize_path(path) else {
            return 0;
        };
        self.shared
            .collections
            .read()
            .get(&path)
            .map(|records| records.values().filter(|v| !v.is_null()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, path: &str) -> bool {
        self.len(path) == 0
    }

    /// Every write received so far.
    pub fn write_log(&self) -> Vec<WriteLogEntry> {
        self.shared.write_log.lock().clone()
    }

    /// Number of listeners installed on `path`.
    pub fn listener_count(&self, path: &str) -> usize {
        let Ok(path) = normalize_path(path) else {
            return 0;
        };
        self.shared
            .listeners
            .read()
            .values()
            .filter(|l| l.path == path)
            .count()
    }

    /// Withhold write acknowledgements until [`flush_acks`](Self::flush_acks).
    pub fn hold_acks(&self) {
        let mut held = self.shared.held_acks.lock();
        if held.is_none() {
            *held = Some(Vec::new());
        }
    }

    /// Deliver withheld acknowledgements and stop holding. Returns how many.
    pub fn flush_acks(&self) -> usize {
        let queue = self.shared.held_acks.lock().take().unwrap_or_default();
        let count = queue.len();
        for (done, result) in queue {
            done(result);
        }
        count
    }

    /// Withhold bulk read results until [`flush_reads`](Self::flush_reads).
    pub fn hold_reads(&self) {
        let mut held = self.shared.held_reads.lock();
        if held.is_none() {
            *held = Some(Vec::new());
        }
    }

    /// Deliver withheld read results and stop holding. Returns how many.
    pub fn flush_reads(&self) -> usize {
        let queue = self.shared.held_reads.lock().take().unwrap_or_default();
        let count = queue.len();
        for (done, result) in queue {
            done(result);
        }
        count
    }

    /// Make the next write fail with `error` without touching any data.
    pub fn fail_next_write(&self, error: RemoteError) {
        self.shared.write_failures.lock().push_back(error);
    }

    /// Make the next bulk read fail with `error`.
    pub fn fail_next_read(&self, error: RemoteError) {
        self.shared.read_failures.lock().push_back(error);
    }

    /// Terminate every feed on `path` with `error`.
    pub fn fail_feeds(&self, path: &str, error: RemoteError) {
        let Ok(path) = normalize_path(path) else {
            return;
        };
        let dropped: Vec<FeedListener> = {
            let mut listeners = self.shared.listeners.write();
            let ids: Vec<ListenerId> = listeners
                .iter()
                .filter(|(_, l)| l.path == path)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| listeners.remove(&id))
                .map(|l| l.callback)
                .collect()
        };
        for callback in dropped {
            callback(FeedEvent::Error(error.clone()));
        }
    }
}

impl RemoteStore for MemoryStore {
    fn collection(&self, path: &str) -> RemoteResult<Arc<dyn RemoteCollection>> {
        let path = normalize_path(path)?;
        let client = self.shared.next_client.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryCollection {
            shared: Arc::clone(&self.shared),
            path,
            client,
        }))
    }
}

/// Handle to one collection of a [`MemoryStore`], acting as one client.
pub struct MemoryCollection {
    shared: Arc<Shared>,
    path: String,
    client: u64,
}

impl MemoryCollection {
    pub fn client(&self) -> u64 {
        self.client
    }

    fn write(&self, id: &RecordId, kind: WriteKind, payload: Option<Value>, done: WriteCallback) {
        self.shared.write_log.lock().push(WriteLogEntry {
            client: self.client,
            path: self.path.clone(),
            id: id.clone(),
            kind,
            payload: payload.clone(),
        });

        if let Some(error) = self.shared.write_failures.lock().pop_front() {
            self.shared.complete(done, Err(error));
            return;
        }

        let change = match self.apply(id, kind, payload) {
            Ok(change) => change,
            Err(error) => {
                self.shared.complete(done, Err(error));
                return;
            }
        };

        if let Some(change) = change {
            self.shared.broadcast(&self.path, Some(self.client), change);
        }
        self.shared.complete(done, Ok(()));
    }

    /// Apply a write to the data. Returns the change to broadcast, if any.
    fn apply(
        &self,
        id: &RecordId,
        kind: WriteKind,
        payload: Option<Value>,
    ) -> RemoteResult<Option<Change>> {
        let native_delete = self.shared.capabilities.native_delete;
        let mut collections = self.shared.collections.write();
        let records = collections.entry(self.path.clone()).or_default();
        let existed = records.get(id).is_some_and(|v| !v.is_null());

        let change = match (kind, payload) {
            (WriteKind::Delete, _) => {
                if !native_delete {
                    return Err(RemoteError::new(
                        "unimplemented",
                        "deletion is written as a null value on this store",
                    ));
                }
                records.remove(id);
                existed.then(|| Change::removed(id.clone()))
            }
            (WriteKind::Update, Some(Value::Object(patch))) => {
                let merged = match records.get(id) {
                    Some(Value::Object(current)) => {
                        let mut merged = current.clone();
                        merged.extend(patch);
                        merged
                    }
                    _ => patch,
                };
                let value = Value::Object(merged);
                records.insert(id.clone(), value.clone());
                Some(changed(id, existed, value))
            }
            (WriteKind::Update, _) => {
                return Err(RemoteError::new("invalid-argument", "update needs an object"));
            }
            (_, Some(Value::Null)) | (_, None) => {
                if !existed {
                    return Ok(None);
                }
                if native_delete {
                    records.remove(id);
                    Some(Change::removed(id.clone()))
                } else {
                    records.insert(id.clone(), Value::Null);
                    Some(Change::modified(id.clone(), Value::Null))
                }
            }
            (_, Some(value)) => {
                records.insert(id.clone(), value.clone());
                Some(changed(id, existed, value))
            }
        };
        Ok(change)
    }

    fn live_records(&self) -> Vec<(RecordId, Value)> {
        self.shared
            .collections
            .read()
            .get(&self.path)
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(id, v)| (id.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn changed(id: &RecordId, existed: bool, value: Value) -> Change {
    if existed {
        Change::modified(id.clone(), value)
    } else {
        Change::added(id.clone(), value)
    }
}

impl RemoteCollection for MemoryCollection {
    fn path(&self) -> &str {
        &self.path
    }

    fn capabilities(&self) -> Capabilities {
        self.shared.capabilities
    }

    fn read_all(&self, done: ReadCallback) {
        let failure = self.shared.read_failures.lock().pop_front();
        let result = match failure {
            Some(error) => Err(error),
            // Tombstones are part of the raw read; consumers skip them.
            None => Ok(self
                .shared
                .collections
                .read()
                .get(&self.path)
                .map(|records| records.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()),
        };

        {
            let mut held = self.shared.held_reads.lock();
            if let Some(queue) = held.as_mut() {
                queue.push((done, result));
                return;
            }
        }
        done(result);
    }

    fn subscribe(&self, listener: FeedListener) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::SeqCst));
        self.shared.listeners.write().insert(
            id,
            Listener {
                path: self.path.clone(),
                client: self.client,
                callback: Arc::clone(&listener),
            },
        );

        // Replay current content to the new listener.
        let existing = self.live_records();
        match self.shared.capabilities.delivery {
            DeliveryMode::Discrete => {
                for (key, value) in existing {
                    listener(FeedEvent::Change(Change::added(key, value)));
                }
            }
            DeliveryMode::Batched => {
                let changes = existing
                    .into_iter()
                    .map(|(key, value)| Change::added(key, value))
                    .collect();
                listener(FeedEvent::Snapshot(Snapshot::committed(changes)));
            }
        }
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.shared.listeners.write().remove(&id);
    }

    fn allocate_id(&self) -> RecordId {
        let n = self.shared.next_key.fetch_add(1, Ordering::SeqCst);
        RecordId(format!("k{:012}", n))
    }

    fn create(&self, id: &RecordId, data: Fields, done: WriteCallback) {
        self.write(id, WriteKind::Create, Some(Value::Object(data)), done);
    }

    fn update(&self, id: &RecordId, data: Fields, done: WriteCallback) {
        self.write(id, WriteKind::Update, Some(Value::Object(data)), done);
    }

    fn set(&self, id: &RecordId, value: Value, done: WriteCallback) {
        self.write(id, WriteKind::Set, Some(value), done);
    }

    fn delete(&self, id: &RecordId, done: WriteCallback) {
        self.write(id, WriteKind::Delete, None, done);
    }
}

/// Trim surrounding slashes and validate every segment.
fn normalize_path(path: &str) -> RemoteResult<String> {
    let trimmed = path.trim_matches('/');
    let valid = !trimmed.is_empty()
        && trimmed
            .split('/')
            .all(|segment| !segment.is_empty() && !segment.contains(FORBIDDEN_PATH_CHARS));
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(RemoteError::new(
            "invalid-argument",
            format!("invalid collection path {:?}", path),
        ))
    }
}
