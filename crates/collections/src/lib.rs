//! Reactive collections for Rillet
//!
//! A collection is a keyed store with three logical tiers:
//! - **synced**: last-known authoritative state, written by the sync
//!   driver in atomic begin/write/commit batches
//! - **optimistic overlay**: per-transaction pending mutations, stacked
//!   per key in transaction order
//! - **derived**: synced with the overlay applied, which is what reads and
//!   subscribers observe
//!
//! Live query collections are collections whose sync driver is a compiled
//! dataflow graph fed by other collections' change streams.

pub mod collection;
pub mod live;
pub mod state;
pub mod status;
pub mod subscribers;
pub mod sync;

pub use collection::{Collection, CollectionConfig, PersistHandler};
pub use live::{create_live_query_collection, LiveQueryConfig};
pub use status::CollectionStatus;
pub use subscribers::{SubscribeOptions, Subscription};
pub use sync::{CleanupHandle, SyncContext, SyncDriver};
