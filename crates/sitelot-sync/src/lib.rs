//! Client runtime for ITP checklist tracking: offline-first synchronization
//! of completion records against the server.
//!
//! This crate wraps the pure domain core (`sitelot-core`) with everything a
//! disconnected-capable client needs:
//!
//! - a [`remote::RemoteApi`] seam over the server collaborators,
//! - a durable [`cache::OfflineCache`] (SQLite) holding the last-known
//!   server snapshot per lot plus the queue of mutations made offline,
//! - a per-lot [`session::LotSession`] exposing the mutation operations,
//!   conformance evaluation, and the caller-invoked replay,
//! - a cancellable [`poller::LivePoller`] refreshing the view while it is
//!   visible.
//!
//! # Write path
//!
//! ```text
//! mutation --> completion state machine (pure validation, may refuse)
//!          --> server write
//!                ok ----------> reconcile view + snapshot with server record
//!                connectivity -> enqueue intent (overwrite per item)
//!                               + optimistic local apply, tagged "(Offline)"
//! ```
//!
//! The server is the source of truth once online: replaying the queue sends
//! each pending intent one at a time and each server response becomes the
//! authoritative state for that item. No three-way merge is attempted, and
//! two devices editing the same item before either syncs will silently let
//! the later server write win; each device converges on its next read.

pub mod cache;
pub mod poller;
pub mod remote;
pub mod session;
