//! Checklist template definitions.
//!
//! A [`ChecklistTemplate`] is an immutable, ordered list of
//! [`ChecklistItem`]s. Once a template has been assigned to a lot the
//! instance keeps its own copy, so later template edits never retroactively
//! alter work already in progress.

use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// The party responsible for signing off a checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsibleParty {
    /// The head contractor.
    Contractor,
    /// A subcontractor engaged for the work.
    Subcontractor,
    /// The superintendent / client representative.
    Superintendent,
    /// No specific party.
    General,
}

/// Inspection point type of a checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointType {
    /// Ordinary item: complete and move on.
    Standard,
    /// Witness point: attendance (or notified absence) of a witness must be
    /// recorded as part of completion.
    Witness,
    /// Hold point: work may not proceed past this item until a separate
    /// verification action is recorded after completion.
    HoldPoint,
}

/// Evidence that must be attached before an item may be completed without an
/// explicit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceRequired {
    /// No evidence required.
    None,
    /// At least one photo.
    Photo,
    /// A test record.
    Test,
    /// A document (certificate, delivery docket, ...).
    Document,
}

impl EvidenceRequired {
    /// Returns `true` when completing the item expects an attachment.
    #[must_use]
    pub fn is_required(self) -> bool {
        self != Self::None
    }
}

/// One line of an ITP template.
///
/// Immutable once an instance references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    /// Stable item identifier.
    pub id: String,
    /// Display and enforcement order within the template.
    pub order: u32,
    /// What is being inspected.
    pub description: String,
    /// Grouping category (e.g. "Earthworks", "Concrete").
    pub category: String,
    /// Who signs this item off.
    pub responsible_party: ResponsibleParty,
    /// Standard, witness or hold point.
    pub point_type: PointType,
    /// Evidence expected before completion.
    pub evidence_required: EvidenceRequired,
    /// Test type, when the item records a test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
    /// Acceptance criteria text, when specified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,
}

/// An ordered checklist template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistTemplate {
    /// Stable template identifier.
    pub id: String,
    /// Human-readable template name.
    pub name: String,
    /// Items, kept sorted by `order`.
    items: Vec<ChecklistItem>,
}

impl ChecklistTemplate {
    /// Creates a template, sorting the items by their `order` field.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, mut items: Vec<ChecklistItem>) -> Self {
        items.sort_by_key(|item| item.order);
        Self {
            id: id.into(),
            name: name.into(),
            items,
        }
    }

    /// Items in display/enforcement order.
    #[must_use]
    pub fn items(&self) -> &[ChecklistItem] {
        &self.items
    }

    /// Number of items in the template.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` for an empty template.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Looks up an item by id.
    #[must_use]
    pub fn item(&self, item_id: &str) -> Option<&ChecklistItem> {
        self.items.iter().find(|item| item.id == item_id)
    }
}
