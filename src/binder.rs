//! Collection binding: from a source reference to one cached remote handle.

use crate::error::Result;
use crate::remote::{RemoteCollection, RemoteStore};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What an adapter is bound to.
#[derive(Clone)]
pub enum Source {
    /// An already live handle, used as is.
    Handle(Arc<dyn RemoteCollection>),
    /// A collection path, resolved through `store` on first use.
    Path {
        store: Arc<dyn RemoteStore>,
        path: String,
    },
}

impl Source {
    pub fn path(store: Arc<dyn RemoteStore>, path: impl Into<String>) -> Self {
        Source::Path {
            store,
            path: path.into(),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Handle(handle) => write!(f, "Handle({})", handle.path()),
            Source::Path { path, .. } => write!(f, "Path({})", path),
        }
    }
}

/// Resolves a [`Source`] at most once per binding.
pub struct CollectionBinder {
    source: Source,
    cached: Mutex<Option<Arc<dyn RemoteCollection>>>,
}

impl CollectionBinder {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Return the bound handle, constructing it on the first call.
    ///
    /// Construction failures are returned as is and nothing is cached, so a
    /// later call tries again.
    pub fn resolve(&self) -> Result<Arc<dyn RemoteCollection>> {
        match &self.source {
            Source::Handle(handle) => Ok(Arc::clone(handle)),
            Source::Path { store, path } => {
                let mut cached = self.cached.lock();
                if let Some(handle) = cached.as_ref() {
                    return Ok(Arc::clone(handle));
                }
                let handle = store.collection(path)?;
                debug!(path = %handle.path(), "bound remote collection");
                *cached = Some(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }
}
