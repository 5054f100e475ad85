//! Session-specific error types.

use sitelot_core::completion::CompletionError;
use thiserror::Error;

use crate::cache::CacheError;
use crate::remote::RemoteError;

/// Hard faults from a lot session.
///
/// Validation refusals and connectivity fallbacks are not here: refusals
/// come back inside [`Mutation::Refused`](super::Mutation::Refused) and
/// connectivity failures are absorbed by the offline queue.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The server rejected the operation.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The local cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The state machine rejected the mutation outright.
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// The failed-completion transition was accepted but the NCR could not
    /// be created. The completion stays failed; the caller must surface
    /// this rather than treat the operation as clean.
    #[error("completion recorded as failed but NCR creation failed: {source}")]
    NcrCreationFailed {
        /// The underlying rejection.
        source: RemoteError,
    },

    /// A mutation was attempted before any ITP instance was loaded or
    /// assigned for the lot.
    #[error("lot {lot_id} has no ITP instance loaded")]
    NoInstance {
        /// The lot being mutated.
        lot_id: String,
    },

    /// The checklist item is not part of the instance's template.
    #[error("checklist item {checklist_item_id} is not in the assigned template")]
    UnknownItem {
        /// The unknown item id.
        checklist_item_id: String,
    },
}
