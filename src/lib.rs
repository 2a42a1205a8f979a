//! # Live Sync
//!
//! Keeps a local, ordered data view consistent with a realtime remote
//! document store, in both directions.
//!
//! ## Core Concepts
//!
//! - **Load**: one bulk read fills the view, then a change feed keeps it current
//! - **Translation**: remote changes become quiet view mutations, so they are
//!   never written back
//! - **Echo suppression**: notifications for records with a local write in
//!   flight are dropped
//! - **Save**: local edits become remote creates, updates and deletes
//!
//! ## Example
//!
//! ```ignore
//! use livesync::{MemoryStore, MemoryView, Source, SyncAdapter};
//!
//! let store = MemoryStore::discrete();
//! let adapter = SyncAdapter::new(Source::path(Arc::new(store), "books"));
//! let view = Arc::new(MemoryView::new());
//!
//! // Fill the view and follow the change feed
//! adapter.load(view.clone()).wait()?;
//!
//! // Push local edits
//! view.insert_local(fields);
//! for pending in view.take_pending() {
//!     let outcome = adapter.save(&*view, pending.intent.clone()).wait()?;
//!     view.apply_outcome(&pending, &outcome);
//! }
//!
//! adapter.release();
//! ```

pub mod adapter;
pub mod binder;
pub mod config;
pub mod deferred;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod registry;
pub mod remote;
pub mod subscriptions;
pub mod translator;
pub mod types;
pub mod view;

// Re-exports
pub use adapter::SyncAdapter;
pub use binder::{CollectionBinder, Source};
pub use config::{AdapterConfig, DuplicateAddPolicy};
pub use deferred::{deferred, Deferred, Resolver};
pub use dispatcher::WriteDispatcher;
pub use error::{RemoteError, RemoteResult, Result, SyncError};
pub use guard::{EchoGuard, InFlightWrite, Quiet};
pub use registry::{parse_proxy_url, Binding, SyncRegistry, SyncSource};
pub use remote::{
    FeedEvent, FeedListener, ListenerId, MemoryCollection, MemoryStore, ReadCallback,
    RemoteCollection, RemoteStore, WriteCallback, WriteKind, WriteLogEntry,
};
pub use subscriptions::{LoadState, Subscriber, SubscriptionToken};
pub use translator::{ChangeOutcome, ChangeTranslator};
pub use types::*;
pub use view::{LocalView, MemoryForm, MemoryView, Notify, PendingChange};
