//! Bulk load and change-feed subscription.
//!
//! A [`Subscriber`] owns the lifecycle of one adapter's subscription:
//! - `Idle -> Loading`: one bulk read (discrete backends) or the first
//!   committed snapshot (batched backends) fills the view
//! - `Loading -> Subscribed`: the change feed is installed and live
//! - `-> Released`: the feed is torn down; late events become no-ops
//!
//! Reloading releases the previous subscription first, so at most one feed
//! per adapter is ever live.
//!
//! # Example
//!
//! ```ignore
//! let subscriber = Subscriber::new();
//! let loaded = subscriber.load(collection, translator, Capabilities::discrete());
//! let records = loaded.wait()?.into_records();
//! assert_eq!(subscriber.state(), LoadState::Subscribed);
//!
//! subscriber.release();
//! ```

mod manager;
mod types;

pub use manager::Subscriber;
pub use types::{LoadState, SubscriptionToken};
