//! Change feed.
//!
//! The remote store pushes INSERT/UPDATE/DELETE events as JSON messages over
//! bounded channels:
//! - [`FeedBroadcaster`] fans events out on the server side
//! - [`FeedSubscriber`] holds one subscription per scope on the client side
//!   and folds events into the record store
//!
//! Events only land if they carry a newer version than the store holds, so
//! duplicates and out-of-order delivery are harmless. Messages that fail to
//! decode are logged and dropped; the subscription stays open.
//!
//! # Example
//!
//! ```ignore
//! let feed = FeedSubscriber::new(gateway, store.clone(), 1000);
//! feed.subscribe(FeedScope::All).await?;
//!
//! // Later, from the client's event loop
//! let stats = feed.drain_all();
//! if stats.malformed > 0 {
//!     tracing::warn!(stats.malformed, "feed sent undecodable events");
//! }
//!
//! feed.release(&FeedScope::All);
//! ```

mod broadcast;
mod subscriber;
mod types;

pub use broadcast::FeedBroadcaster;
pub use subscriber::{FeedStats, FeedSubscriber};
pub use types::{ChangeEvent, FeedChannel, FeedScope, SubscriptionId};
