//! The server collaborator seam.
//!
//! Everything the client core needs from the server side is abstracted
//! behind [`RemoteApi`]; the transport is out of scope here. The error type
//! distinguishes connectivity failures (recovered locally by the offline
//! cache) from server rejections (surfaced to the caller).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitelot_core::completion::{Attachment, Completion, CompletionAction, GpsCoordinates};
use sitelot_core::conformance::TestResult;
use sitelot_core::instance::ItpInstance;
use sitelot_core::ncr::{Ncr, NcrDraft};
use thiserror::Error;

/// Errors from the server collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteError {
    /// The server could not be reached. The offline cache takes over;
    /// never surfaced to the end user as a hard failure.
    #[error("server unreachable: {message}")]
    Connectivity {
        /// Transport-level detail, for logs only.
        message: String,
    },

    /// The server refused the operation.
    #[error("server rejected the operation: {reason}")]
    Rejected {
        /// Human-readable rejection reason.
        reason: String,
    },

    /// The requested record does not exist (e.g. no ITP instance assigned
    /// to the lot yet).
    #[error("not found")]
    NotFound,
}

impl RemoteError {
    /// Returns `true` for failures the offline cache recovers from.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

/// A mutation write sent to the completion upsert endpoint.
///
/// Upserts are keyed by (ITP instance, checklist item): the server creates
/// the completion record lazily on first write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionWrite {
    /// The requested mutation, carrying the desired resulting state.
    pub action: CompletionAction,
    /// Audit label for the acting user ("Current User" or
    /// "Current User (Offline)" for replayed queue entries).
    pub author: String,
}

/// An evidence upload request.
///
/// The binary lives with the blob-hosting collaborator; this carries the
/// reference plus capture metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentUpload {
    /// Reference to the uploaded file.
    pub file_ref: String,
    /// Optional caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Optional capture location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsCoordinates>,
}

/// The server collaborators consumed by the sync core.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetches the lot's ITP instance (template plus all completions).
    ///
    /// Returns [`RemoteError::NotFound`] when no template is assigned; the
    /// caller's template-suggestion flow handles that signal.
    async fn fetch_instance(&self, lot_id: &str) -> Result<ItpInstance, RemoteError>;

    /// Creates or updates the completion for (instance, item). The returned
    /// record is the server's merged result and becomes authoritative.
    async fn upsert_completion(
        &self,
        lot_id: &str,
        checklist_item_id: &str,
        write: CompletionWrite,
    ) -> Result<Completion, RemoteError>;

    /// Registers an evidence attachment against a completion.
    async fn add_attachment(
        &self,
        lot_id: &str,
        checklist_item_id: &str,
        upload: AttachmentUpload,
    ) -> Result<Attachment, RemoteError>;

    /// Assigns a checklist template to a lot, creating its ITP instance.
    ///
    /// Rejected when the lot already has an active instance.
    async fn assign_template(
        &self,
        lot_id: &str,
        template_id: &str,
    ) -> Result<ItpInstance, RemoteError>;

    /// Read-only signal into the conformance gate.
    async fn fetch_test_results(&self, lot_id: &str) -> Result<Vec<TestResult>, RemoteError>;

    /// Read-only signal into the conformance gate.
    async fn fetch_open_ncrs(&self, lot_id: &str) -> Result<Vec<Ncr>, RemoteError>;

    /// Creates a non-conformance record; invoked by the NCR auto-raiser.
    async fn create_ncr(&self, draft: NcrDraft) -> Result<Ncr, RemoteError>;
}
