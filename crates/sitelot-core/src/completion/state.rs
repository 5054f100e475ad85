//! Completion record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ncr::Severity;

/// The four observable states of a completion.
///
/// Stored on the record as three mutually-exclusive flags (the server's
/// wire shape); all flags false means `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    /// No outcome recorded yet.
    Pending,
    /// Inspected and signed off.
    Completed,
    /// Marked not applicable, with a reason.
    NotApplicable,
    /// Inspection failed; an NCR is raised.
    Failed,
}

/// Witness attendance recorded when completing a witness-point item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessRecord {
    /// Whether the witness attended.
    pub present: bool,
    /// Witness name, only meaningful when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Witness company, only meaningful when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl WitnessRecord {
    /// Drops name/company when the witness was absent, so an absence record
    /// never carries attendance details.
    #[must_use]
    pub fn normalized(self) -> Self {
        if self.present {
            self
        } else {
            Self {
                present: false,
                name: None,
                company: None,
            }
        }
    }
}

/// GPS coordinates captured with a photo attachment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

/// A reference to an uploaded piece of evidence.
///
/// The binary itself lives with the blob-hosting collaborator; the core only
/// tracks the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Stable attachment identifier.
    pub id: String,
    /// Reference into the blob store.
    pub file_ref: String,
    /// Optional caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Optional capture location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsCoordinates>,
    /// When the attachment was added.
    pub added_at: DateTime<Utc>,
}

/// The failure payload required to mark an item as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// What failed. Must be non-empty.
    pub description: String,
    /// Failure category.
    pub category: String,
    /// Severity of the failure.
    pub severity: Severity,
}

/// The inspection outcome record for one checklist item on one ITP instance.
///
/// Unique on (`itp_instance_id`, `checklist_item_id`). Created lazily on the
/// first mutation and never deleted, only moved forward through the state
/// machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// The owning ITP instance.
    pub itp_instance_id: String,
    /// The checklist item this record answers.
    pub checklist_item_id: String,
    /// Signed off.
    pub is_completed: bool,
    /// Marked not applicable.
    pub is_not_applicable: bool,
    /// Failed inspection.
    pub is_failed: bool,
    /// Free-text notes; doubles as the NA reason / failure context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Set on transition into completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Who completed the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    /// Hold-point verification flag, set by a separate action once completed.
    pub is_verified: bool,
    /// When the hold point was verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    /// Who verified the hold point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,
    /// Witness attendance, only on witness-point items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<WitnessRecord>,
    /// Evidence references, in upload order.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// The NCR auto-raised by this completion's failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_ncr: Option<String>,
}

impl Completion {
    /// Creates a fresh pending record for the given (instance, item) pair.
    #[must_use]
    pub fn pending(itp_instance_id: impl Into<String>, checklist_item_id: impl Into<String>) -> Self {
        Self {
            itp_instance_id: itp_instance_id.into(),
            checklist_item_id: checklist_item_id.into(),
            is_completed: false,
            is_not_applicable: false,
            is_failed: false,
            notes: None,
            completed_at: None,
            completed_by: None,
            is_verified: false,
            verified_at: None,
            verified_by: None,
            witness: None,
            attachments: Vec::new(),
            linked_ncr: None,
        }
    }

    /// The derived state of the three mutually-exclusive flags.
    #[must_use]
    pub fn state(&self) -> CompletionState {
        if self.is_completed {
            CompletionState::Completed
        } else if self.is_not_applicable {
            CompletionState::NotApplicable
        } else if self.is_failed {
            CompletionState::Failed
        } else {
            CompletionState::Pending
        }
    }

    /// Checks the mutual-exclusion invariant over the state flags.
    #[must_use]
    pub fn flags_consistent(&self) -> bool {
        u8::from(self.is_completed) + u8::from(self.is_not_applicable) + u8::from(self.is_failed) <= 1
    }

    /// Returns `true` when the item counts towards checklist progress
    /// (completed or not applicable).
    #[must_use]
    pub fn counts_as_done(&self) -> bool {
        self.is_completed || self.is_not_applicable
    }
}
