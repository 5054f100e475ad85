//! Durable offline cache and sync queue.
//!
//! `SQLite`-backed, restart-safe client storage with two responsibilities:
//!
//! - **Snapshot mirror**: the last-known server state of each lot's ITP
//!   instance, so the checklist stays usable with no connectivity. The
//!   snapshot timestamp is kept alongside and shown to the user whenever
//!   cached data is displayed.
//! - **Pending queue**: mutations made while disconnected, keyed by
//!   (lot, checklist item). A second offline edit to the same item replaces
//!   the pending entry rather than stacking: last local intent wins locally.
//!
//! The queue is only drained by an explicit replay
//! ([`LotSession::replay_pending`](crate::session::LotSession::replay_pending));
//! nothing here writes to the server.

mod store;


pub use store::{
    CacheError, CachedSnapshot, DesiredState, OfflineCache, OfflineQueueEntry, QueuedIntent,
};
