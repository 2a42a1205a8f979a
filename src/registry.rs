//! Registration of remote backends and the generic sync helper.
//!
//! Backends are registered under a kind tag (`"firebase"`, `"firestore"`,
//! ...). Sources name their kind explicitly; the registry never inspects the
//! source to guess it. Proxy urls of the form `"<kind>-><path>"` are
//! accepted wherever a source can be given.

use crate::adapter::SyncAdapter;
use crate::binder::Source;
use crate::config::AdapterConfig;
use crate::deferred::Deferred;
use crate::error::{Result, SyncError};
use crate::remote::RemoteStore;
use crate::types::Loaded;
use crate::view::LocalView;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Separator between kind and path in a proxy url.
const PROXY_SEPARATOR: &str = "->";

/// A source tagged with the kind of backend it belongs to.
#[derive(Clone, Debug)]
pub struct SyncSource {
    pub kind: String,
    pub source: Source,
}

impl SyncSource {
    pub fn new(kind: impl Into<String>, source: Source) -> Self {
        Self {
            kind: kind.into(),
            source,
        }
    }
}

/// A view bound to a remote source by [`SyncRegistry::sync`].
pub struct Binding {
    /// Adapter serving both loads and saves of the view.
    pub adapter: Arc<SyncAdapter>,
    /// Settles once the initial content is in the view.
    pub loaded: Deferred<Loaded>,
}

struct Backend {
    store: Arc<dyn RemoteStore>,
    config: AdapterConfig,
}

/// Known backends by kind.
#[derive(Default)]
pub struct SyncRegistry {
    backends: RwLock<HashMap<String, Backend>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the backend for `kind`.
    pub fn register(
        &self,
        kind: impl Into<String>,
        store: Arc<dyn RemoteStore>,
        config: AdapterConfig,
    ) {
        let kind = kind.into();
        debug!(kind = %kind, "registered sync backend");
        self.backends.write().insert(kind, Backend { store, config });
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.backends.read().contains_key(kind)
    }

    /// Build an adapter for a tagged source.
    pub fn adapter(&self, source: SyncSource) -> Result<SyncAdapter> {
        let backends = self.backends.read();
        let backend = backends
            .get(&source.kind)
            .ok_or_else(|| SyncError::UnknownSourceKind(source.kind.clone()))?;
        Ok(SyncAdapter::with_config(source.source, backend.config.clone()))
    }

    /// Build an adapter from a `"<kind>-><path>"` proxy url.
    pub fn proxy(&self, url: &str) -> Result<SyncAdapter> {
        let (kind, path) = parse_proxy_url(url)?;
        let store = {
            let backends = self.backends.read();
            let backend = backends
                .get(kind)
                .ok_or_else(|| SyncError::UnknownSourceKind(kind.to_string()))?;
            Arc::clone(&backend.store)
        };
        self.adapter(SyncSource::new(kind, Source::path(store, path)))
    }

    /// Bind `target` to `source` if its kind is registered.
    ///
    /// Clears the target, starts loading it and returns the binding. Returns
    /// `None` for unknown kinds so other helpers can claim the source.
    pub fn sync(&self, target: Arc<dyn LocalView>, source: SyncSource) -> Option<Binding> {
        let kind = source.kind.clone();
        let adapter = Arc::new(self.adapter(source).ok()?);
        debug!(kind = %kind, view = ?target.view_id(), "binding view");

        target.clear_all();
        let loaded = adapter.load(target);
        Some(Binding { adapter, loaded })
    }
}

/// Split a proxy url into kind and path.
pub fn parse_proxy_url(url: &str) -> Result<(&str, &str)> {
    let (kind, path) = url
        .split_once(PROXY_SEPARATOR)
        .ok_or_else(|| SyncError::InvalidProxyUrl(url.to_string()))?;
    let (kind, path) = (kind.trim(), path.trim());
    if kind.is_empty() || path.is_empty() {
        return Err(SyncError::InvalidProxyUrl(url.to_string()));
    }
    Ok((kind, path))
}
