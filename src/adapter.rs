//! The sync adapter tying binder, subscriber, translator and dispatcher together.

use crate::binder::{CollectionBinder, Source};
use crate::config::AdapterConfig;
use crate::deferred::Deferred;
use crate::dispatcher::WriteDispatcher;
use crate::error::Result;
use crate::guard::EchoGuard;
use crate::remote::RemoteCollection;
use crate::subscriptions::{LoadState, Subscriber};
use crate::translator::ChangeTranslator;
use crate::types::{Loaded, MutationIntent, ViewId, WriteOutcome};
use crate::view::LocalView;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Keeps local views in sync with one remote collection.
///
/// Provides:
/// - `load`: bulk load into a view, then keep it current from the change feed
/// - `save`: push a view's local edit to the remote store
/// - `release`: tear the change feed down
///
/// Each view gets its own [`EchoGuard`], shared by its loads and saves.
/// Guards of views with no write in flight and no live load are dropped.
pub struct SyncAdapter {
    config: Arc<AdapterConfig>,
    binder: CollectionBinder,
    subscriber: Subscriber,
    dispatcher: WriteDispatcher,
    guards: RwLock<HashMap<ViewId, Arc<EchoGuard>>>,
}

impl SyncAdapter {
    pub fn new(source: Source) -> Self {
        Self::with_config(source, AdapterConfig::default())
    }

    pub fn with_config(source: Source, config: AdapterConfig) -> Self {
        let config = Arc::new(config);
        Self {
            binder: CollectionBinder::new(source),
            subscriber: Subscriber::new(),
            dispatcher: WriteDispatcher::new(Arc::clone(&config)),
            guards: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn source(&self) -> &Source {
        self.binder.source()
    }

    /// The bound remote collection, resolved on first use.
    pub fn collection(&self) -> Result<Arc<dyn RemoteCollection>> {
        self.binder.resolve()
    }

    pub fn state(&self) -> LoadState {
        self.subscriber.state()
    }

    /// Echo guard of a view.
    pub fn echo_guard(&self, view: ViewId) -> Arc<EchoGuard> {
        if let Some(guard) = self.guards.read().get(&view) {
            return Arc::clone(guard);
        }
        let mut guards = self.guards.write();
        prune_guards(&mut guards);
        Arc::clone(guards.entry(view).or_default())
    }

    /// Load the collection into `view` and keep it current.
    ///
    /// Releases any previous subscription of this adapter first. The result
    /// carries the full initial content in either delivery mode, including
    /// records the view already held.
    pub fn load(&self, view: Arc<dyn LocalView>) -> Deferred<Loaded> {
        let collection = match self.binder.resolve() {
            Ok(collection) => collection,
            Err(error) => return Deferred::rejected(error),
        };
        let guard = self.echo_guard(view.view_id());
        let translator = Arc::new(ChangeTranslator::new(view, guard, Arc::clone(&self.config)));
        let capabilities = self.config.effective_capabilities(collection.capabilities());
        self.subscriber.load(collection, translator, capabilities)
    }

    /// Push a local edit of `view` to the remote store.
    ///
    /// The view is not touched; it already holds the edit.
    pub fn save(&self, view: &dyn LocalView, intent: MutationIntent) -> Deferred<WriteOutcome> {
        let collection = match self.binder.resolve() {
            Ok(collection) => collection,
            Err(error) => return Deferred::rejected(error),
        };
        let guard = self.echo_guard(view.view_id());
        self.dispatcher.dispatch(&collection, &guard, intent)
    }

    /// Tear down the change feed. Idempotent.
    pub fn release(&self) {
        self.subscriber.release();
        prune_guards(&mut self.guards.write());
    }
}

/// Drop guards with nothing in flight that no load or caller still holds.
fn prune_guards(guards: &mut HashMap<ViewId, Arc<EchoGuard>>) {
    guards.retain(|_, guard| Arc::strong_count(guard) > 1 || !guard.is_idle());
}
