//! ITP instances: one template bound to one lot.
//!
//! An [`ItpInstance`] owns the completion records for its (instance, item)
//! space. Completions are created lazily on first mutation; an item with no
//! record yet is observably `pending`. A lot has at most one active instance
//! at a time (the assignment collaborator enforces the guard; see
//! `sitelot-sync`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checklist::ChecklistTemplate;
use crate::completion::Completion;

#[cfg(test)]
mod tests;

/// Checklist progress over the full item set.
///
/// `not_applicable` counts as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Items completed or marked not applicable.
    pub done: usize,
    /// Total items in the template.
    pub total: usize,
}

impl Progress {
    /// Returns `true` when every item is signed off or not applicable.
    #[must_use]
    pub fn is_complete(self) -> bool {
        self.done == self.total
    }
}

/// One checklist template assigned to one lot, plus its completion records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItpInstance {
    /// Stable instance identifier.
    pub id: String,
    /// The lot this instance belongs to.
    pub lot_id: String,
    /// The instance's own copy of the template, frozen at assignment time.
    pub template: ChecklistTemplate,
    /// Completion records keyed by checklist item id.
    #[serde(default)]
    completions: BTreeMap<String, Completion>,
}

impl ItpInstance {
    /// Creates a fresh instance with no completion records.
    #[must_use]
    pub fn new(id: impl Into<String>, lot_id: impl Into<String>, template: ChecklistTemplate) -> Self {
        Self {
            id: id.into(),
            lot_id: lot_id.into(),
            template,
            completions: BTreeMap::new(),
        }
    }

    /// The recorded completion for an item, if one exists yet.
    #[must_use]
    pub fn completion(&self, item_id: &str) -> Option<&Completion> {
        self.completions.get(item_id)
    }

    /// The completion for an item, or a fresh pending record when none has
    /// been created yet (lazy creation: the record is not stored until a
    /// mutation is recorded).
    #[must_use]
    pub fn completion_or_pending(&self, item_id: &str) -> Completion {
        self.completions
            .get(item_id)
            .cloned()
            .unwrap_or_else(|| Completion::pending(self.id.clone(), item_id))
    }

    /// Stores (or replaces) a completion record, keyed by its item id.
    ///
    /// This is the reconciliation point: both optimistic local results and
    /// authoritative server responses land here.
    pub fn record(&mut self, completion: Completion) {
        self.completions
            .insert(completion.checklist_item_id.clone(), completion);
    }

    /// All recorded completions.
    pub fn completions(&self) -> impl Iterator<Item = &Completion> {
        self.completions.values()
    }

    /// Number of recorded completions (not template items).
    #[must_use]
    pub fn recorded_count(&self) -> usize {
        self.completions.len()
    }

    /// Progress over the full template item set.
    #[must_use]
    pub fn progress(&self) -> Progress {
        let done = self
            .template
            .items()
            .iter()
            .filter(|item| {
                self.completions
                    .get(&item.id)
                    .is_some_and(Completion::counts_as_done)
            })
            .count();
        Progress {
            done,
            total: self.template.len(),
        }
    }

    /// Poll comparison: whether a freshly fetched instance differs enough
    /// from this one to replace the in-memory view.
    ///
    /// Deliberately coarse so that an unrelated refresh does not clobber an
    /// in-flight local edit: only a different record count, or a change to
    /// some item's completed / verified / `completed_at`, counts.
    #[must_use]
    pub fn meaningfully_differs(&self, fresh: &Self) -> bool {
        if self.recorded_count() != fresh.recorded_count() {
            return true;
        }
        self.completions.iter().any(|(item_id, mine)| {
            match fresh.completion(item_id) {
                None => true,
                Some(theirs) => {
                    mine.is_completed != theirs.is_completed
                        || mine.is_verified != theirs.is_verified
                        || mine.completed_at != theirs.completed_at
                },
            }
        })
    }

    /// Timestamp of the most recent completion, for display.
    #[must_use]
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.completions
            .values()
            .filter_map(|c| c.completed_at.max(c.verified_at))
            .max()
    }
}
