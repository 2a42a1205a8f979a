//! Load/subscribe state machine.

use crate::deferred::{deferred, Deferred, Resolver};
use crate::error::SyncError;
use crate::remote::{FeedEvent, FeedListener, ListenerId, RemoteCollection};
use crate::translator::ChangeTranslator;
use crate::types::{Capabilities, DeliveryMode, Fields, Loaded, RecordId, Snapshot};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::types::{LoadState, SubscriptionToken};

/// Resolver of a load that completes on the first committed snapshot.
type FirstSnapshot = Arc<Mutex<Option<Resolver<Loaded>>>>;

/// The feed currently installed on the remote collection.
struct ActiveFeed {
    collection: Arc<dyn RemoteCollection>,
    listener: ListenerId,
}

/// Internal subscriber state.
struct Inner {
    state: LoadState,
    /// Token of the current load, if any.
    token: Option<SubscriptionToken>,
    active: Option<ActiveFeed>,
    /// Batched loads waiting for their first snapshot.
    first: Option<FirstSnapshot>,
}

impl Inner {
    fn is_current(&self, token: &SubscriptionToken) -> bool {
        token.is_live() && self.token.as_ref().is_some_and(|t| t.same_load(token))
    }
}

/// Owns one adapter's load and change-feed subscription.
pub struct Subscriber {
    inner: Arc<Mutex<Inner>>,
}

impl Subscriber {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: LoadState::Idle,
                token: None,
                active: None,
                first: None,
            })),
        }
    }

    pub fn state(&self) -> LoadState {
        self.inner.lock().state
    }

    /// Load the collection into the translator's view and subscribe to it.
    ///
    /// Any previous subscription is released first. The returned result
    /// settles once the initial content has been delivered to the view.
    pub fn load(
        &self,
        collection: Arc<dyn RemoteCollection>,
        translator: Arc<ChangeTranslator>,
        capabilities: Capabilities,
    ) -> Deferred<Loaded> {
        self.release();

        let token = SubscriptionToken::new();
        {
            let mut inner = self.inner.lock();
            inner.state = LoadState::Loading;
            inner.token = Some(token.clone());
        }
        debug!(path = %collection.path(), mode = ?capabilities.delivery, "loading");

        let (resolver, result) = deferred();
        match capabilities.delivery {
            DeliveryMode::Discrete => {
                self.load_discrete(collection, translator, token, resolver);
            }
            DeliveryMode::Batched => {
                self.load_batched(collection, translator, token, resolver);
            }
        }
        result
    }

    /// Tear down the current subscription. Releasing twice is a no-op.
    pub fn release(&self) {
        let (token, active, first) = {
            let mut inner = self.inner.lock();
            if inner.state.is_active() {
                inner.state = LoadState::Released;
            }
            (inner.token.take(), inner.active.take(), inner.first.take())
        };

        if let Some(token) = token {
            token.cancel();
        }
        if let Some(feed) = active {
            feed.collection.unsubscribe(feed.listener);
            debug!(path = %feed.collection.path(), "released subscription");
        }
        if let Some(resolver) = first.and_then(|first| first.lock().take()) {
            resolver.reject(SyncError::Cancelled);
        }
    }

    /// One bulk read, delivered to the view in full, then the live feed.
    fn load_discrete(
        &self,
        collection: Arc<dyn RemoteCollection>,
        translator: Arc<ChangeTranslator>,
        token: SubscriptionToken,
        resolver: Resolver<Loaded>,
    ) {
        let inner = Arc::downgrade(&self.inner);
        let handle = Arc::clone(&collection);

        collection.read_all(Box::new(move |result| {
            if !token.is_live() {
                resolver.reject(SyncError::Cancelled);
                return;
            }
            let entries = match result {
                Ok(entries) => entries,
                Err(error) => {
                    debug!(path = %handle.path(), %error, "bulk read failed");
                    set_state(&inner, &token, LoadState::Idle);
                    resolver.reject(error);
                    return;
                }
            };

            let loaded = deliver_initial(&translator, entries);

            let listener = feed_listener(
                Weak::clone(&inner),
                Arc::clone(&translator),
                token.clone(),
                None,
            );
            let listener_id = handle.subscribe(listener);
            if !install_feed(&inner, &token, &handle, listener_id, LoadState::Subscribed) {
                resolver.reject(SyncError::Cancelled);
                return;
            }
            debug!(path = %handle.path(), records = loaded.records().len(), "loaded");
            resolver.resolve(loaded);
        }));
    }

    /// Subscribe right away; the first committed snapshot is the initial load.
    fn load_batched(
        &self,
        collection: Arc<dyn RemoteCollection>,
        translator: Arc<ChangeTranslator>,
        token: SubscriptionToken,
        resolver: Resolver<Loaded>,
    ) {
        let first: FirstSnapshot = Arc::new(Mutex::new(Some(resolver)));
        self.inner.lock().first = Some(Arc::clone(&first));

        let inner = Arc::downgrade(&self.inner);
        let listener = feed_listener(
            Weak::clone(&inner),
            translator,
            token.clone(),
            Some(Arc::clone(&first)),
        );
        let listener_id = collection.subscribe(listener);

        // The first snapshot may already have settled the load during subscribe.
        let state = if first.lock().is_some() {
            LoadState::Loading
        } else {
            LoadState::Subscribed
        };
        install_feed(&inner, &token, &collection, listener_id, state);
    }
}

impl Default for Subscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.release();
    }
}

/// Deliver bulk-read entries to the view. Null values are tombstones.
fn deliver_initial(translator: &ChangeTranslator, entries: Vec<(RecordId, Value)>) -> Loaded {
    let live = entries.into_iter().filter(|(_, value)| !value.is_null());
    if translator.view().is_collection() {
        let records: Vec<_> = live
            .map(|(id, value)| translator.to_record(id, value))
            .collect();
        translator.deliver_batch(records.clone());
        Loaded::Records(records)
    } else {
        let values: Fields = live.map(|(id, value)| (id.0, value)).collect();
        translator.deliver_values(values.clone());
        Loaded::Value(values)
    }
}

/// Everything a first snapshot carries, whether or not the view already
/// holds it. Same shape as a discrete bulk load.
fn snapshot_content(translator: &ChangeTranslator, snapshot: &Snapshot) -> Loaded {
    let live = snapshot
        .changes
        .iter()
        .filter(|change| !change.is_removal())
        .filter_map(|change| Some((change.id.clone(), change.value.clone()?)));
    if translator.view().is_collection() {
        Loaded::Records(live.map(|(id, value)| translator.to_record(id, value)).collect())
    } else {
        Loaded::Value(live.map(|(id, value)| (id.0, value)).collect())
    }
}

fn set_state(inner: &Weak<Mutex<Inner>>, token: &SubscriptionToken, state: LoadState) {
    if let Some(inner) = inner.upgrade() {
        let mut inner = inner.lock();
        if inner.is_current(token) {
            inner.state = state;
        }
    }
}

/// Record the installed feed, or undo it if the load was released meanwhile.
fn install_feed(
    inner: &Weak<Mutex<Inner>>,
    token: &SubscriptionToken,
    collection: &Arc<dyn RemoteCollection>,
    listener: ListenerId,
    state: LoadState,
) -> bool {
    if let Some(inner) = inner.upgrade() {
        let mut inner = inner.lock();
        if inner.is_current(token) {
            inner.active = Some(ActiveFeed {
                collection: Arc::clone(collection),
                listener,
            });
            inner.state = state;
            return true;
        }
    }
    collection.unsubscribe(listener);
    false
}

/// Build the listener that feeds one load's translator.
fn feed_listener(
    inner: Weak<Mutex<Inner>>,
    translator: Arc<ChangeTranslator>,
    token: SubscriptionToken,
    first: Option<FirstSnapshot>,
) -> FeedListener {
    Arc::new(move |event| {
        if !token.is_live() {
            return;
        }
        match event {
            FeedEvent::Change(change) => {
                translator.apply_change(change);
            }
            FeedEvent::Snapshot(snapshot) => {
                let waiting = first.as_ref().is_some_and(|first| first.lock().is_some());
                let initial = (waiting && !snapshot.has_pending_writes)
                    .then(|| snapshot_content(&translator, &snapshot));

                if translator.apply_snapshot(snapshot).is_none() {
                    return;
                }
                let resolver = first.as_ref().and_then(|first| first.lock().take());
                if let (Some(resolver), Some(loaded)) = (resolver, initial) {
                    set_state(&inner, &token, LoadState::Subscribed);
                    debug!(records = loaded.records().len(), "loaded from first snapshot");
                    resolver.resolve(loaded);
                }
            }
            FeedEvent::Error(error) => {
                let resolver = first.as_ref().and_then(|first| first.lock().take());
                match resolver {
                    Some(resolver) => {
                        set_state(&inner, &token, LoadState::Idle);
                        resolver.reject(error);
                    }
                    None => warn!(%error, "change feed failed"),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::error::RemoteError;
    use crate::guard::EchoGuard;
    use crate::remote::{MemoryStore, ReadCallback, RemoteStore, WriteCallback};
    use crate::types::{Change, RecordId};
    use crate::view::{LocalView, MemoryView};
    use serde_json::json;

    /// A collection that never emits on its own. Tests drive its listeners.
    #[derive(Default)]
    struct Silent {
        listeners: Mutex<Vec<(ListenerId, FeedListener)>>,
        next: Mutex<u64>,
        on_subscribe: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl Silent {
        fn listeners(&self) -> Vec<FeedListener> {
            self.listeners
                .lock()
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        }
    }

    impl RemoteCollection for Silent {
        fn path(&self) -> &str {
            "silent"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::batched()
        }

        fn read_all(&self, done: ReadCallback) {
            done(Ok(Vec::new()));
        }

        fn subscribe(&self, listener: FeedListener) -> ListenerId {
            let id = {
                let mut next = self.next.lock();
                *next += 1;
                ListenerId(*next)
            };
            self.listeners.lock().push((id, listener));
            let hook = self.on_subscribe.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            id
        }

        fn unsubscribe(&self, id: ListenerId) {
            self.listeners.lock().retain(|(listener, _)| *listener != id);
        }

        fn allocate_id(&self) -> RecordId {
            RecordId::from("silent")
        }

        fn create(&self, _id: &RecordId, _data: Fields, done: WriteCallback) {
            done(Ok(()));
        }

        fn update(&self, _id: &RecordId, _data: Fields, done: WriteCallback) {
            done(Ok(()));
        }

        fn set(&self, _id: &RecordId, _value: Value, done: WriteCallback) {
            done(Ok(()));
        }

        fn delete(&self, _id: &RecordId, done: WriteCallback) {
            done(Ok(()));
        }
    }

    fn translator(view: &Arc<MemoryView>) -> Arc<ChangeTranslator> {
        Arc::new(ChangeTranslator::new(
            Arc::clone(view) as Arc<dyn LocalView>,
            Arc::new(EchoGuard::new()),
            Arc::new(AdapterConfig::default()),
        ))
    }

    #[test]
    fn test_discrete_load_then_subscribe() {
        let store = MemoryStore::discrete();
        store.seed("books", "a", json!({"v": 1}));
        store.seed("books", "b", json!(2));
        store.seed("books", "gone", serde_json::Value::Null);
        let collection = store.collection("books").unwrap();
        let view = Arc::new(MemoryView::new());

        let subscriber = Subscriber::new();
        let loaded = subscriber
            .load(collection, translator(&view), Capabilities::discrete())
            .wait()
            .unwrap();

        assert_eq!(loaded.records().len(), 2);
        assert_eq!(view.ids(), vec![RecordId::from("a"), RecordId::from("b")]);
        assert_eq!(view.get(&"b".into()).unwrap().get("value"), Some(&json!(2)));
        assert_eq!(subscriber.state(), LoadState::Subscribed);
        assert_eq!(store.listener_count("books"), 1);
        // Replayed adds were duplicates of the bulk load.
        assert_eq!(view.mutation_count(), 0);
    }

    #[test]
    fn test_failed_read_leaves_view_untouched() {
        let store = MemoryStore::discrete();
        store.seed("books", "a", json!({"v": 1}));
        store.fail_next_read(RemoteError::unavailable("offline"));
        let view = Arc::new(MemoryView::new());

        let subscriber = Subscriber::new();
        let result = subscriber
            .load(
                store.collection("books").unwrap(),
                translator(&view),
                Capabilities::discrete(),
            )
            .wait();

        assert!(matches!(result, Err(SyncError::Remote(_))));
        assert!(view.is_empty());
        assert_eq!(subscriber.state(), LoadState::Idle);
        assert_eq!(store.listener_count("books"), 0);
    }

    #[test]
    fn test_reload_releases_previous_feed() {
        let store = MemoryStore::batched();
        let collection = store.collection("books").unwrap();
        let view = Arc::new(MemoryView::new());
        let subscriber = Subscriber::new();

        subscriber
            .load(Arc::clone(&collection), translator(&view), Capabilities::batched())
            .wait()
            .unwrap();
        subscriber
            .load(Arc::clone(&collection), translator(&view), Capabilities::batched())
            .wait()
            .unwrap();

        assert_eq!(store.listener_count("books"), 1);
        assert_eq!(subscriber.state(), LoadState::Subscribed);
    }

    #[test]
    fn test_release_is_idempotent() {
        let store = MemoryStore::batched();
        let view = Arc::new(MemoryView::new());
        let subscriber = Subscriber::new();
        subscriber
            .load(
                store.collection("books").unwrap(),
                translator(&view),
                Capabilities::batched(),
            )
            .wait()
            .unwrap();

        subscriber.release();
        subscriber.release();
        assert_eq!(subscriber.state(), LoadState::Released);
        assert_eq!(store.listener_count("books"), 0);
    }

    #[test]
    fn test_feed_error_after_load_keeps_view() {
        let store = MemoryStore::batched();
        store.seed("books", "a", json!({"v": 1}));
        let view = Arc::new(MemoryView::new());
        let subscriber = Subscriber::new();

        subscriber
            .load(
                store.collection("books").unwrap(),
                translator(&view),
                Capabilities::batched(),
            )
            .wait()
            .unwrap();
        store.fail_feeds("books", RemoteError::permission_denied("revoked"));

        assert_eq!(subscriber.state(), LoadState::Subscribed);
        assert_eq!(view.len(), 1);
        subscriber.release();
        assert_eq!(subscriber.state(), LoadState::Released);
    }

    #[test]
    fn test_first_snapshot_waits_for_commit() {
        let view = Arc::new(MemoryView::new());
        let (resolver, result) = deferred();
        let first: FirstSnapshot = Arc::new(Mutex::new(Some(resolver)));
        let listener = feed_listener(
            Weak::new(),
            translator(&view),
            SubscriptionToken::new(),
            Some(first),
        );

        listener(FeedEvent::Snapshot(Snapshot::pending(vec![
            crate::types::Change::added("a", json!({"v": 1})),
        ])));
        assert!(result.poll().is_none());
        assert!(view.is_empty());

        listener(FeedEvent::Error(RemoteError::permission_denied("denied")));
        assert!(matches!(result.wait(), Err(SyncError::Remote(_))));
    }

    #[test]
    fn test_cancelled_token_ignores_events() {
        let view = Arc::new(MemoryView::new());
        let token = SubscriptionToken::new();
        let listener = feed_listener(Weak::new(), translator(&view), token.clone(), None);

        token.cancel();
        listener(FeedEvent::Change(crate::types::Change::added("a", json!({"v": 1}))));
        assert!(view.is_empty());
    }

    #[test]
    fn test_release_during_bulk_read_cancels_load() {
        let store = MemoryStore::discrete();
        store.seed("books", "a", json!({"v": 1}));
        store.hold_reads();
        let view = Arc::new(MemoryView::new());
        let subscriber = Subscriber::new();

        let loading = subscriber.load(
            store.collection("books").unwrap(),
            translator(&view),
            Capabilities::discrete(),
        );
        assert!(loading.poll().is_none());
        assert_eq!(subscriber.state(), LoadState::Loading);

        subscriber.release();
        assert_eq!(store.flush_reads(), 1);
        assert!(matches!(loading.wait(), Err(SyncError::Cancelled)));
        assert!(view.is_empty());
        assert_eq!(store.listener_count("books"), 0);
        assert_eq!(subscriber.state(), LoadState::Released);
    }

    #[test]
    fn test_reload_cancels_pending_bulk_read() {
        let store = MemoryStore::discrete();
        store.seed("books", "a", json!({"v": 1}));
        store.hold_reads();
        let collection = store.collection("books").unwrap();
        let stale = Arc::new(MemoryView::new());
        let fresh = Arc::new(MemoryView::new());
        let subscriber = Subscriber::new();

        let first = subscriber.load(
            Arc::clone(&collection),
            translator(&stale),
            Capabilities::discrete(),
        );
        let second = subscriber.load(collection, translator(&fresh), Capabilities::discrete());
        assert_eq!(store.flush_reads(), 2);

        assert!(matches!(first.wait(), Err(SyncError::Cancelled)));
        assert_eq!(second.wait().unwrap().records().len(), 1);
        assert!(stale.is_empty());
        assert_eq!(fresh.len(), 1);
        assert_eq!(store.listener_count("books"), 1);
        assert_eq!(subscriber.state(), LoadState::Subscribed);
    }

    #[test]
    fn test_release_before_first_snapshot_cancels_load() {
        let collection = Arc::new(Silent::default());
        let view = Arc::new(MemoryView::new());
        let subscriber = Subscriber::new();

        let loading = subscriber.load(
            Arc::clone(&collection) as Arc<dyn RemoteCollection>,
            translator(&view),
            Capabilities::batched(),
        );
        assert!(loading.poll().is_none());
        assert_eq!(subscriber.state(), LoadState::Loading);
        let late = collection.listeners();
        assert_eq!(late.len(), 1);

        subscriber.release();
        assert!(matches!(loading.wait(), Err(SyncError::Cancelled)));
        assert!(collection.listeners().is_empty());
        assert_eq!(subscriber.state(), LoadState::Released);

        // A backend that still delivers after unsubscribe changes nothing.
        for listener in late {
            listener(FeedEvent::Snapshot(Snapshot::committed(vec![Change::added(
                "a",
                json!({"v": 1}),
            )])));
        }
        assert!(view.is_empty());
    }

    #[test]
    fn test_release_during_subscribe_cancels_load() {
        let collection = Arc::new(Silent::default());
        let view = Arc::new(MemoryView::new());
        let subscriber = Arc::new(Subscriber::new());
        let releaser = Arc::clone(&subscriber);
        *collection.on_subscribe.lock() = Some(Box::new(move || releaser.release()));

        let loading = subscriber.load(
            Arc::clone(&collection) as Arc<dyn RemoteCollection>,
            translator(&view),
            Capabilities::discrete(),
        );

        assert!(matches!(loading.wait(), Err(SyncError::Cancelled)));
        assert!(collection.listeners().is_empty());
        assert_eq!(subscriber.state(), LoadState::Released);
    }

    #[test]
    fn test_batched_reload_reports_existing_records() {
        let store = MemoryStore::batched();
        store.seed("books", "a", json!({"v": 1}));
        store.seed("books", "b", json!({"v": 2}));
        let collection = store.collection("books").unwrap();
        let view = Arc::new(MemoryView::new());
        let subscriber = Subscriber::new();

        for _ in 0..2 {
            let loaded = subscriber
                .load(Arc::clone(&collection), translator(&view), Capabilities::batched())
                .wait()
                .unwrap();
            let ids: Vec<_> = loaded.records().iter().map(|r| r.id.clone()).collect();
            assert_eq!(ids, vec![RecordId::from("a"), RecordId::from("b")]);
        }
        assert_eq!(view.len(), 2);
        assert_eq!(view.mutation_count(), 0);
        assert_eq!(store.listener_count("books"), 1);
    }
}
