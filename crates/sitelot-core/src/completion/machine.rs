//! The pure completion state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::CompletionError;
use super::state::{Attachment, Completion, CompletionState, FailureReport, WitnessRecord};
use crate::checklist::{ChecklistItem, PointType};
use crate::ncr::NcrDraft;

/// Ambient inputs for a transition: who is acting, on which lot, and when.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    /// The lot the ITP instance belongs to (carried into raised NCRs).
    pub lot_id: String,
    /// Audit label for the acting user.
    pub actor: String,
    /// Transition timestamp.
    pub now: DateTime<Utc>,
}

/// A mutation request against one completion record.
///
/// `SetCompleted` carries the desired resulting state rather than a flip, so
/// replaying the same action is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionAction {
    /// Complete the item, or toggle completion back off.
    SetCompleted {
        /// Desired value of the completed flag.
        completed: bool,
        /// Notes to record alongside the sign-off.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
        /// Witness attendance, required for witness-point items.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        witness: Option<WitnessRecord>,
        /// Caller has confirmed completing without the required evidence.
        #[serde(default)]
        allow_missing_evidence: bool,
    },
    /// Mark the item not applicable, with a reason.
    MarkNotApplicable {
        /// Why the item does not apply. Must be non-empty.
        reason: String,
    },
    /// Mark the item failed; auto-raises an NCR.
    MarkFailed {
        /// The failure payload.
        report: FailureReport,
    },
    /// Update notes without changing state.
    UpdateNotes {
        /// Replacement notes text.
        notes: String,
    },
    /// Record hold-point verification on a completed item.
    Verify,
    /// Link the auto-raised NCR back onto a failed completion.
    LinkNcr {
        /// Identifier of the created NCR.
        ncr_id: String,
    },
    /// Append an evidence reference.
    AddAttachment {
        /// The attachment record returned by the upload collaborator.
        attachment: Attachment,
    },
}

/// An expected validation outcome: the caller must collect the named input
/// and re-invoke. Never treated as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Refusal {
    /// The item requires evidence and none is attached; re-invoke with
    /// `allow_missing_evidence` after the user confirms.
    EvidenceMissing,
    /// The item is a witness point and no attendance data was supplied.
    WitnessDataRequired,
    /// Marking not-applicable requires a non-empty reason.
    ReasonRequired,
    /// Marking failed requires a non-empty description.
    DescriptionRequired,
}

/// A side effect the caller must execute after a successful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Create an NCR for this failure and link it back to the completion.
    RaiseNcr(NcrDraft),
}

/// A successfully applied action.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// The updated record.
    pub completion: Completion,
    /// Side effects to execute, in order. Empty on idempotent re-submission.
    pub effects: Vec<Effect>,
    /// `false` when the action was an idempotent re-submission that left the
    /// record observably unchanged.
    pub changed: bool,
}

/// Result of applying an action: either an updated record or a refusal.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The action was applied.
    Applied(Applied),
    /// The action was refused pending more input from the caller.
    Refused(Refusal),
}

impl Outcome {
    fn applied(completion: Completion, effects: Vec<Effect>, changed: bool) -> Self {
        Self::Applied(Applied {
            completion,
            effects,
            changed,
        })
    }

    fn unchanged(completion: Completion) -> Self {
        Self::applied(completion, Vec::new(), false)
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// Applies one action to a completion record, enforcing the guards for the
/// owning checklist item.
///
/// Pure: the inputs are never mutated and no IO happens here. Side effects
/// (NCR creation) are returned as [`Effect`]s for the caller to execute.
pub fn apply(
    item: &ChecklistItem,
    current: &Completion,
    action: CompletionAction,
    ctx: &TransitionContext,
) -> Result<Outcome, CompletionError> {
    if current.checklist_item_id != item.id {
        return Err(CompletionError::ItemMismatch {
            checklist_item_id: item.id.clone(),
            completion_item_id: current.checklist_item_id.clone(),
        });
    }
    if !current.flags_consistent() {
        return Err(CompletionError::InconsistentFlags {
            checklist_item_id: item.id.clone(),
        });
    }

    match action {
        CompletionAction::SetCompleted {
            completed,
            notes,
            witness,
            allow_missing_evidence,
        } => {
            if completed {
                set_completed(item, current, notes, witness, allow_missing_evidence, ctx)
            } else {
                clear_completed(item, current)
            }
        },
        CompletionAction::MarkNotApplicable { reason } => mark_not_applicable(item, current, reason),
        CompletionAction::MarkFailed { report } => mark_failed(item, current, &report, ctx),
        CompletionAction::UpdateNotes { notes } => update_notes(current, notes),
        CompletionAction::Verify => verify(item, current, ctx),
        CompletionAction::LinkNcr { ncr_id } => link_ncr(item, current, ncr_id),
        CompletionAction::AddAttachment { attachment } => {
            let mut next = current.clone();
            next.attachments.push(attachment);
            Ok(Outcome::applied(next, Vec::new(), true))
        },
    }
}

fn set_completed(
    item: &ChecklistItem,
    current: &Completion,
    notes: Option<String>,
    witness: Option<WitnessRecord>,
    allow_missing_evidence: bool,
    ctx: &TransitionContext,
) -> Result<Outcome, CompletionError> {
    if witness.is_some() && item.point_type != PointType::Witness {
        return Err(CompletionError::WitnessNotApplicable {
            checklist_item_id: item.id.clone(),
        });
    }

    match current.state() {
        CompletionState::Completed => {
            // Idempotent re-submission; only the notes may move.
            match notes {
                Some(text) if current.notes.as_deref() != Some(text.as_str()) => {
                    let mut next = current.clone();
                    next.notes = Some(text);
                    Ok(Outcome::applied(next, Vec::new(), true))
                },
                _ => Ok(Outcome::unchanged(current.clone())),
            }
        },
        CompletionState::Pending => {
            if item.evidence_required.is_required()
                && current.attachments.is_empty()
                && !allow_missing_evidence
            {
                return Ok(Outcome::Refused(Refusal::EvidenceMissing));
            }
            if item.point_type == PointType::Witness && witness.is_none() {
                return Ok(Outcome::Refused(Refusal::WitnessDataRequired));
            }

            let mut next = current.clone();
            next.is_completed = true;
            next.completed_at = Some(ctx.now);
            next.completed_by = Some(ctx.actor.clone());
            if notes.is_some() {
                next.notes = notes;
            }
            next.witness = witness.map(WitnessRecord::normalized);
            Ok(Outcome::applied(next, Vec::new(), true))
        },
        from @ (CompletionState::NotApplicable | CompletionState::Failed) => {
            Err(CompletionError::TransitionNotAllowed {
                checklist_item_id: item.id.clone(),
                from,
                to: CompletionState::Completed,
            })
        },
    }
}

fn clear_completed(item: &ChecklistItem, current: &Completion) -> Result<Outcome, CompletionError> {
    match current.state() {
        CompletionState::Pending => Ok(Outcome::unchanged(current.clone())),
        CompletionState::Completed => {
            // No re-validation on the reverse path. Verification and witness
            // data describe the sign-off being withdrawn, so they go with it;
            // notes and attachments stay.
            let mut next = current.clone();
            next.is_completed = false;
            next.completed_at = None;
            next.completed_by = None;
            next.is_verified = false;
            next.verified_at = None;
            next.verified_by = None;
            next.witness = None;
            Ok(Outcome::applied(next, Vec::new(), true))
        },
        from @ (CompletionState::NotApplicable | CompletionState::Failed) => {
            Err(CompletionError::TransitionNotAllowed {
                checklist_item_id: item.id.clone(),
                from,
                to: CompletionState::Pending,
            })
        },
    }
}

fn mark_not_applicable(
    item: &ChecklistItem,
    current: &Completion,
    reason: String,
) -> Result<Outcome, CompletionError> {
    if is_blank(&reason) {
        return Ok(Outcome::Refused(Refusal::ReasonRequired));
    }

    match current.state() {
        CompletionState::Pending => {
            let mut next = current.clone();
            next.is_not_applicable = true;
            next.notes = Some(reason);
            Ok(Outcome::applied(next, Vec::new(), true))
        },
        CompletionState::NotApplicable => {
            if current.notes.as_deref() == Some(reason.as_str()) {
                Ok(Outcome::unchanged(current.clone()))
            } else {
                let mut next = current.clone();
                next.notes = Some(reason);
                Ok(Outcome::applied(next, Vec::new(), true))
            }
        },
        from @ (CompletionState::Completed | CompletionState::Failed) => {
            Err(CompletionError::TransitionNotAllowed {
                checklist_item_id: item.id.clone(),
                from,
                to: CompletionState::NotApplicable,
            })
        },
    }
}

fn mark_failed(
    item: &ChecklistItem,
    current: &Completion,
    report: &FailureReport,
    ctx: &TransitionContext,
) -> Result<Outcome, CompletionError> {
    if is_blank(&report.description) {
        return Ok(Outcome::Refused(Refusal::DescriptionRequired));
    }

    let raise = |completion: &Completion| {
        Effect::RaiseNcr(NcrDraft {
            description: report.description.clone(),
            category: report.category.clone(),
            severity: report.severity,
            lot_id: ctx.lot_id.clone(),
            checklist_item_id: completion.checklist_item_id.clone(),
        })
    };

    match current.state() {
        CompletionState::Failed => {
            // Already failed: never a second NCR. If an earlier NCR creation
            // failed (no link recorded), re-emit the raise effect so the
            // failure is never silently left without an NCR. A changed
            // description is a notes update, not a new failure.
            let mut next = current.clone();
            let mut changed = false;
            if next.notes.as_deref() != Some(report.description.as_str()) {
                next.notes = Some(report.description.clone());
                changed = true;
            }
            let effects = if next.linked_ncr.is_none() {
                vec![raise(&next)]
            } else {
                Vec::new()
            };
            Ok(Outcome::applied(next, effects, changed))
        },
        CompletionState::Pending | CompletionState::Completed => {
            let mut next = current.clone();
            next.is_completed = false;
            next.completed_at = None;
            next.completed_by = None;
            next.is_verified = false;
            next.verified_at = None;
            next.verified_by = None;
            next.is_failed = true;
            next.notes = Some(report.description.clone());
            let effect = raise(&next);
            Ok(Outcome::applied(next, vec![effect], true))
        },
        CompletionState::NotApplicable => Err(CompletionError::TransitionNotAllowed {
            checklist_item_id: item.id.clone(),
            from: CompletionState::NotApplicable,
            to: CompletionState::Failed,
        }),
    }
}

fn update_notes(current: &Completion, notes: String) -> Result<Outcome, CompletionError> {
    // NA reasons and failure descriptions must stay non-empty.
    if is_blank(&notes) {
        match current.state() {
            CompletionState::NotApplicable => return Ok(Outcome::Refused(Refusal::ReasonRequired)),
            CompletionState::Failed => return Ok(Outcome::Refused(Refusal::DescriptionRequired)),
            CompletionState::Pending | CompletionState::Completed => {},
        }
    }

    if current.notes.as_deref() == Some(notes.as_str()) {
        return Ok(Outcome::unchanged(current.clone()));
    }
    let mut next = current.clone();
    next.notes = if notes.is_empty() { None } else { Some(notes) };
    Ok(Outcome::applied(next, Vec::new(), true))
}

fn link_ncr(
    item: &ChecklistItem,
    current: &Completion,
    ncr_id: String,
) -> Result<Outcome, CompletionError> {
    if current.state() != CompletionState::Failed {
        return Err(CompletionError::NcrLinkWithoutFailure {
            checklist_item_id: item.id.clone(),
        });
    }
    match current.linked_ncr.as_deref() {
        Some(existing) if existing == ncr_id => Ok(Outcome::unchanged(current.clone())),
        Some(existing) => Err(CompletionError::NcrAlreadyLinked {
            checklist_item_id: item.id.clone(),
            linked_ncr: existing.to_string(),
        }),
        None => {
            let mut next = current.clone();
            next.linked_ncr = Some(ncr_id);
            Ok(Outcome::applied(next, Vec::new(), true))
        },
    }
}

fn verify(
    item: &ChecklistItem,
    current: &Completion,
    ctx: &TransitionContext,
) -> Result<Outcome, CompletionError> {
    if item.point_type != PointType::HoldPoint {
        return Err(CompletionError::NotAHoldPoint {
            checklist_item_id: item.id.clone(),
        });
    }
    if current.state() != CompletionState::Completed {
        return Err(CompletionError::VerifyBeforeCompletion {
            checklist_item_id: item.id.clone(),
        });
    }
    if current.is_verified {
        return Ok(Outcome::unchanged(current.clone()));
    }

    let mut next = current.clone();
    next.is_verified = true;
    next.verified_at = Some(ctx.now);
    next.verified_by = Some(ctx.actor.clone());
    Ok(Outcome::applied(next, Vec::new(), true))
}
