//! Tests for the completion state machine.

use chrono::{TimeZone, Utc};

use super::machine::{CompletionAction, Effect, Outcome, Refusal, TransitionContext, apply};
use super::state::{Attachment, Completion, CompletionState, FailureReport, WitnessRecord};
use crate::checklist::{ChecklistItem, EvidenceRequired, PointType, ResponsibleParty};
use crate::completion::CompletionError;
use crate::ncr::Severity;

fn item(point_type: PointType, evidence: EvidenceRequired) -> ChecklistItem {
    ChecklistItem {
        id: "item-1".to_string(),
        order: 1,
        description: "Subgrade inspection".to_string(),
        category: "Earthworks".to_string(),
        responsible_party: ResponsibleParty::Contractor,
        point_type,
        evidence_required: evidence,
        test_type: None,
        acceptance_criteria: None,
    }
}

fn ctx() -> TransitionContext {
    TransitionContext {
        lot_id: "lot-1".to_string(),
        actor: "Current User".to_string(),
        now: Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap(),
    }
}

fn pending() -> Completion {
    Completion::pending("itp-1", "item-1")
}

fn complete_action() -> CompletionAction {
    CompletionAction::SetCompleted {
        completed: true,
        notes: None,
        witness: None,
        allow_missing_evidence: false,
    }
}

fn applied(outcome: Outcome) -> Completion {
    match outcome {
        Outcome::Applied(applied) => applied.completion,
        Outcome::Refused(refusal) => panic!("expected applied, got refusal {refusal:?}"),
    }
}

// =============================================================================
// pending -> completed
// =============================================================================

#[test]
fn complete_standard_item() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let next = applied(apply(&item, &pending(), complete_action(), &ctx()).unwrap());

    assert_eq!(next.state(), CompletionState::Completed);
    assert_eq!(next.completed_by.as_deref(), Some("Current User"));
    assert_eq!(next.completed_at, Some(ctx().now));
    assert!(next.flags_consistent());
}

#[test]
fn evidence_required_refuses_without_override() {
    let item = item(PointType::Standard, EvidenceRequired::Photo);
    let outcome = apply(&item, &pending(), complete_action(), &ctx()).unwrap();

    assert_eq!(outcome, Outcome::Refused(Refusal::EvidenceMissing));
}

#[test]
fn evidence_override_completes() {
    let item = item(PointType::Standard, EvidenceRequired::Photo);
    let action = CompletionAction::SetCompleted {
        completed: true,
        notes: None,
        witness: None,
        allow_missing_evidence: true,
    };
    let next = applied(apply(&item, &pending(), action, &ctx()).unwrap());
    assert_eq!(next.state(), CompletionState::Completed);
}

#[test]
fn attached_evidence_satisfies_requirement() {
    let item = item(PointType::Standard, EvidenceRequired::Photo);
    let mut current = pending();
    current.attachments.push(Attachment {
        id: "att-1".to_string(),
        file_ref: "photos/1.jpg".to_string(),
        caption: None,
        gps: None,
        added_at: ctx().now,
    });

    let next = applied(apply(&item, &current, complete_action(), &ctx()).unwrap());
    assert_eq!(next.state(), CompletionState::Completed);
}

#[test]
fn witness_point_refuses_without_attendance() {
    let item = item(PointType::Witness, EvidenceRequired::None);
    let outcome = apply(&item, &pending(), complete_action(), &ctx()).unwrap();
    assert_eq!(outcome, Outcome::Refused(Refusal::WitnessDataRequired));
}

#[test]
fn witness_absence_completes_without_name() {
    let item = item(PointType::Witness, EvidenceRequired::None);
    let action = CompletionAction::SetCompleted {
        completed: true,
        notes: None,
        witness: Some(WitnessRecord {
            present: false,
            name: Some("should be dropped".to_string()),
            company: None,
        }),
        allow_missing_evidence: false,
    };
    let next = applied(apply(&item, &pending(), action, &ctx()).unwrap());

    assert_eq!(next.state(), CompletionState::Completed);
    let witness = next.witness.unwrap();
    assert!(!witness.present);
    assert!(witness.name.is_none());
}

#[test]
fn witness_data_rejected_on_standard_item() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let action = CompletionAction::SetCompleted {
        completed: true,
        notes: None,
        witness: Some(WitnessRecord {
            present: true,
            name: Some("J. Site".to_string()),
            company: Some("Acme".to_string()),
        }),
        allow_missing_evidence: false,
    };
    let err = apply(&item, &pending(), action, &ctx()).unwrap_err();
    assert!(matches!(err, CompletionError::WitnessNotApplicable { .. }));
}

#[test]
fn complete_is_idempotent() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let completed = applied(apply(&item, &pending(), complete_action(), &ctx()).unwrap());

    let outcome = apply(&item, &completed, complete_action(), &ctx()).unwrap();
    match outcome {
        Outcome::Applied(applied) => {
            assert!(!applied.changed);
            assert!(applied.effects.is_empty());
            assert_eq!(applied.completion, completed);
        },
        Outcome::Refused(r) => panic!("unexpected refusal {r:?}"),
    }
}

// =============================================================================
// completed -> pending (toggle off)
// =============================================================================

#[test]
fn toggle_off_is_unconditional() {
    let item = item(PointType::Witness, EvidenceRequired::Photo);
    let action = CompletionAction::SetCompleted {
        completed: true,
        notes: Some("witnessed".to_string()),
        witness: Some(WitnessRecord {
            present: true,
            name: Some("J. Site".to_string()),
            company: Some("Acme".to_string()),
        }),
        allow_missing_evidence: true,
    };
    let completed = applied(apply(&item, &pending(), action, &ctx()).unwrap());

    let off = CompletionAction::SetCompleted {
        completed: false,
        notes: None,
        witness: None,
        allow_missing_evidence: false,
    };
    let reverted = applied(apply(&item, &completed, off, &ctx()).unwrap());

    assert_eq!(reverted.state(), CompletionState::Pending);
    assert!(reverted.completed_at.is_none());
    assert!(reverted.witness.is_none());
    // Notes survive the toggle.
    assert_eq!(reverted.notes.as_deref(), Some("witnessed"));
}

#[test]
fn toggle_round_trip_restores_observable_state() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let with_notes = CompletionAction::SetCompleted {
        completed: true,
        notes: Some("ok".to_string()),
        witness: None,
        allow_missing_evidence: false,
    };
    let first = applied(apply(&item, &pending(), with_notes.clone(), &ctx()).unwrap());

    let off = CompletionAction::SetCompleted {
        completed: false,
        notes: None,
        witness: None,
        allow_missing_evidence: false,
    };
    let back = applied(apply(&item, &first, off, &ctx()).unwrap());
    let again = applied(apply(&item, &back, with_notes, &ctx()).unwrap());

    // Equivalent modulo completed_at/completed_by refresh.
    assert_eq!(again.state(), first.state());
    assert_eq!(again.notes, first.notes);
    assert_eq!(again.attachments, first.attachments);
}

// =============================================================================
// pending -> not_applicable
// =============================================================================

#[test]
fn not_applicable_requires_reason() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let outcome = apply(
        &item,
        &pending(),
        CompletionAction::MarkNotApplicable {
            reason: "   ".to_string(),
        },
        &ctx(),
    )
    .unwrap();
    assert_eq!(outcome, Outcome::Refused(Refusal::ReasonRequired));
}

#[test]
fn not_applicable_records_reason() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let next = applied(
        apply(
            &item,
            &pending(),
            CompletionAction::MarkNotApplicable {
                reason: "no services in this lot".to_string(),
            },
            &ctx(),
        )
        .unwrap(),
    );
    assert_eq!(next.state(), CompletionState::NotApplicable);
    assert_eq!(next.notes.as_deref(), Some("no services in this lot"));
}

#[test]
fn not_applicable_is_terminal() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let na = applied(
        apply(
            &item,
            &pending(),
            CompletionAction::MarkNotApplicable {
                reason: "n/a".to_string(),
            },
            &ctx(),
        )
        .unwrap(),
    );

    let err = apply(&item, &na, complete_action(), &ctx()).unwrap_err();
    assert!(matches!(
        err,
        CompletionError::TransitionNotAllowed {
            from: CompletionState::NotApplicable,
            to: CompletionState::Completed,
            ..
        }
    ));
}

// =============================================================================
// pending -> failed and the NCR effect
// =============================================================================

fn fail_action() -> CompletionAction {
    CompletionAction::MarkFailed {
        report: FailureReport {
            description: "compaction below spec".to_string(),
            category: "Earthworks".to_string(),
            severity: Severity::Major,
        },
    }
}

#[test]
fn failed_requires_description() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let outcome = apply(
        &item,
        &pending(),
        CompletionAction::MarkFailed {
            report: FailureReport {
                description: String::new(),
                category: "Earthworks".to_string(),
                severity: Severity::Minor,
            },
        },
        &ctx(),
    )
    .unwrap();
    assert_eq!(outcome, Outcome::Refused(Refusal::DescriptionRequired));
}

#[test]
fn failed_emits_one_ncr_draft() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let outcome = apply(&item, &pending(), fail_action(), &ctx()).unwrap();

    let Outcome::Applied(applied) = outcome else {
        panic!("expected applied");
    };
    assert_eq!(applied.completion.state(), CompletionState::Failed);
    assert_eq!(applied.effects.len(), 1);
    let Effect::RaiseNcr(draft) = &applied.effects[0];
    assert_eq!(draft.lot_id, "lot-1");
    assert_eq!(draft.checklist_item_id, "item-1");
    assert_eq!(draft.severity, Severity::Major);
}

#[test]
fn refailing_with_linked_ncr_raises_nothing() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let Outcome::Applied(first) = apply(&item, &pending(), fail_action(), &ctx()).unwrap() else {
        panic!("expected applied");
    };
    let mut failed = first.completion;
    failed.linked_ncr = Some("ncr-1".to_string());

    let Outcome::Applied(second) = apply(&item, &failed, fail_action(), &ctx()).unwrap() else {
        panic!("expected applied");
    };
    assert!(second.effects.is_empty());
    assert!(!second.changed);
    assert_eq!(second.completion, failed);
}

#[test]
fn refailing_without_link_reemits_raise() {
    // An earlier NCR creation failure left the completion failed with no
    // linked NCR; resubmitting must offer the effect again.
    let item = item(PointType::Standard, EvidenceRequired::None);
    let Outcome::Applied(first) = apply(&item, &pending(), fail_action(), &ctx()).unwrap() else {
        panic!("expected applied");
    };
    let failed = first.completion;
    assert!(failed.linked_ncr.is_none());

    let Outcome::Applied(second) = apply(&item, &failed, fail_action(), &ctx()).unwrap() else {
        panic!("expected applied");
    };
    assert_eq!(second.effects.len(), 1);
}

#[test]
fn failing_a_completed_item_clears_signoff() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let completed = applied(apply(&item, &pending(), complete_action(), &ctx()).unwrap());

    let Outcome::Applied(result) = apply(&item, &completed, fail_action(), &ctx()).unwrap() else {
        panic!("expected applied");
    };
    assert_eq!(result.completion.state(), CompletionState::Failed);
    assert!(result.completion.completed_at.is_none());
    assert!(result.completion.flags_consistent());
}

// =============================================================================
// Notes and verification
// =============================================================================

#[test]
fn notes_update_never_changes_state() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let completed = applied(apply(&item, &pending(), complete_action(), &ctx()).unwrap());

    let next = applied(
        apply(
            &item,
            &completed,
            CompletionAction::UpdateNotes {
                notes: "re-checked after rain".to_string(),
            },
            &ctx(),
        )
        .unwrap(),
    );
    assert_eq!(next.state(), CompletionState::Completed);
    assert_eq!(next.notes.as_deref(), Some("re-checked after rain"));
}

#[test]
fn blank_notes_refused_on_na_record() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let na = applied(
        apply(
            &item,
            &pending(),
            CompletionAction::MarkNotApplicable {
                reason: "n/a".to_string(),
            },
            &ctx(),
        )
        .unwrap(),
    );

    let outcome = apply(
        &item,
        &na,
        CompletionAction::UpdateNotes {
            notes: String::new(),
        },
        &ctx(),
    )
    .unwrap();
    assert_eq!(outcome, Outcome::Refused(Refusal::ReasonRequired));
}

#[test]
fn verify_requires_hold_point() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let completed = applied(apply(&item, &pending(), complete_action(), &ctx()).unwrap());
    let err = apply(&item, &completed, CompletionAction::Verify, &ctx()).unwrap_err();
    assert!(matches!(err, CompletionError::NotAHoldPoint { .. }));
}

#[test]
fn verify_requires_completion_first() {
    let item = item(PointType::HoldPoint, EvidenceRequired::None);
    let err = apply(&item, &pending(), CompletionAction::Verify, &ctx()).unwrap_err();
    assert!(matches!(err, CompletionError::VerifyBeforeCompletion { .. }));
}

#[test]
fn verify_sets_audit_fields_once() {
    let item = item(PointType::HoldPoint, EvidenceRequired::None);
    let completed = applied(apply(&item, &pending(), complete_action(), &ctx()).unwrap());

    let verified = applied(apply(&item, &completed, CompletionAction::Verify, &ctx()).unwrap());
    assert!(verified.is_verified);
    assert_eq!(verified.verified_by.as_deref(), Some("Current User"));

    let Outcome::Applied(second) = apply(&item, &verified, CompletionAction::Verify, &ctx()).unwrap()
    else {
        panic!("expected applied");
    };
    assert!(!second.changed);
}

#[test]
fn ncr_link_requires_failed_state() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let err = apply(
        &item,
        &pending(),
        CompletionAction::LinkNcr {
            ncr_id: "ncr-1".to_string(),
        },
        &ctx(),
    )
    .unwrap_err();
    assert!(matches!(err, CompletionError::NcrLinkWithoutFailure { .. }));
}

#[test]
fn ncr_link_is_idempotent_but_exclusive() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let Outcome::Applied(failed) = apply(&item, &pending(), fail_action(), &ctx()).unwrap() else {
        panic!("expected applied");
    };

    let link = |ncr_id: &str| CompletionAction::LinkNcr {
        ncr_id: ncr_id.to_string(),
    };
    let linked = applied(apply(&item, &failed.completion, link("ncr-1"), &ctx()).unwrap());
    assert_eq!(linked.linked_ncr.as_deref(), Some("ncr-1"));

    // Same link again: no-op.
    let Outcome::Applied(again) = apply(&item, &linked, link("ncr-1"), &ctx()).unwrap() else {
        panic!("expected applied");
    };
    assert!(!again.changed);

    // A different link is a fault, never a silent overwrite.
    let err = apply(&item, &linked, link("ncr-2"), &ctx()).unwrap_err();
    assert!(matches!(err, CompletionError::NcrAlreadyLinked { .. }));
}

// =============================================================================
// Record-level invariants
// =============================================================================

#[test]
fn item_mismatch_is_an_error() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let other = Completion::pending("itp-1", "item-2");
    let err = apply(&item, &other, complete_action(), &ctx()).unwrap_err();
    assert!(matches!(err, CompletionError::ItemMismatch { .. }));
}

#[test]
fn mutual_exclusion_holds_through_every_transition() {
    let item = item(PointType::Standard, EvidenceRequired::None);
    let completed = applied(apply(&item, &pending(), complete_action(), &ctx()).unwrap());
    assert!(completed.flags_consistent());

    let na = applied(
        apply(
            &item,
            &pending(),
            CompletionAction::MarkNotApplicable {
                reason: "n/a".to_string(),
            },
            &ctx(),
        )
        .unwrap(),
    );
    assert!(na.flags_consistent());

    let Outcome::Applied(failed) = apply(&item, &pending(), fail_action(), &ctx()).unwrap() else {
        panic!("expected applied");
    };
    assert!(failed.completion.flags_consistent());
}
