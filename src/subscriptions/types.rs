//! Subscription lifecycle types.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle of an adapter's load and change-feed subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing loaded yet, or the last load failed.
    Idle,
    /// Bulk load in progress.
    Loading,
    /// Loaded; the change feed is live.
    Subscribed,
    /// Torn down by `release`.
    Released,
}

impl LoadState {
    /// Returns true while a feed may still deliver into the view.
    pub fn is_active(&self) -> bool {
        matches!(self, LoadState::Loading | LoadState::Subscribed)
    }
}

/// Liveness token shared by everything one load installs.
///
/// Callbacks check it before touching the view, so events that arrive after
/// a release are no-ops even if the backend still delivers them.
#[derive(Clone, Debug)]
pub struct SubscriptionToken {
    live: Arc<AtomicBool>,
}

impl SubscriptionToken {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    /// True if both tokens belong to the same load.
    pub fn same_load(&self, other: &SubscriptionToken) -> bool {
        Arc::ptr_eq(&self.live, &other.live)
    }
}

impl Default for SubscriptionToken {
    fn default() -> Self {
        Self::new()
    }
}
