//! Non-conformance report (NCR) types.
//!
//! An NCR records a quality failure against a lot. NCRs enter this core two
//! ways: auto-raised from a failed checklist completion (the state machine
//! emits an [`NcrDraft`] effect), and read back as a conformance-gate signal
//! (a lot cannot conform while any linked NCR is open).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Errors for NCR value parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NcrError {
    /// Invalid NCR status string.
    #[error("invalid NCR status: {value}")]
    InvalidStatus {
        /// The invalid value provided.
        value: String,
    },

    /// Invalid severity string.
    #[error("invalid NCR severity: {value}")]
    InvalidSeverity {
        /// The invalid value provided.
        value: String,
    },
}

/// Lifecycle status of an NCR.
///
/// Anything other than [`NcrStatus::Closed`] / [`NcrStatus::ClosedConcession`]
/// counts as open for conformance gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NcrStatus {
    /// Newly raised, not yet triaged.
    Open,
    /// Under investigation.
    Investigating,
    /// Corrective action identified and pending.
    ActionRequired,
    /// Resolved and closed.
    Closed,
    /// Closed by concession (accepted as-is).
    ClosedConcession,
}

impl NcrStatus {
    /// Returns `true` while the NCR blocks lot conformance.
    #[must_use]
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Closed | Self::ClosedConcession)
    }
}

impl fmt::Display for NcrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Investigating => "investigating",
            Self::ActionRequired => "action_required",
            Self::Closed => "closed",
            Self::ClosedConcession => "closed_concession",
        };
        f.write_str(s)
    }
}

impl FromStr for NcrStatus {
    type Err = NcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "investigating" => Ok(Self::Investigating),
            "action_required" => Ok(Self::ActionRequired),
            "closed" => Ok(Self::Closed),
            "closed_concession" => Ok(Self::ClosedConcession),
            other => Err(NcrError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }
}

/// Severity of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Minor non-conformance.
    Minor,
    /// Major non-conformance.
    Major,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minor => f.write_str("minor"),
            Self::Major => f.write_str("major"),
        }
    }
}

impl FromStr for Severity {
    type Err = NcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minor" => Ok(Self::Minor),
            "major" => Ok(Self::Major),
            other => Err(NcrError::InvalidSeverity {
                value: other.to_string(),
            }),
        }
    }
}

/// The payload for an NCR to be created, emitted by the completion state
/// machine when an item transitions into `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NcrDraft {
    /// What failed.
    pub description: String,
    /// Failure category.
    pub category: String,
    /// Severity of the failure.
    pub severity: Severity,
    /// The lot the failure belongs to.
    pub lot_id: String,
    /// The checklist item whose completion failed.
    pub checklist_item_id: String,
}

/// A non-conformance record as returned by the NCR collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ncr {
    /// Stable identifier.
    pub id: String,
    /// Human-facing NCR number (e.g. "NCR-0042").
    pub number: String,
    /// Current lifecycle status.
    pub status: NcrStatus,
    /// What failed.
    pub description: String,
    /// Failure category.
    pub category: String,
    /// Severity of the failure.
    pub severity: Severity,
    /// The lot the NCR belongs to.
    pub lot_id: String,
    /// The originating checklist item, when auto-raised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist_item_id: Option<String>,
    /// When the NCR was raised.
    pub raised_at: DateTime<Utc>,
}
