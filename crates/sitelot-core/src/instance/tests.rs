//! Tests for ITP instances.

use chrono::{TimeZone, Utc};

use super::ItpInstance;
use crate::checklist::{ChecklistItem, ChecklistTemplate, EvidenceRequired, PointType, ResponsibleParty};
use crate::completion::{Completion, CompletionState};

fn template(n: u32) -> ChecklistTemplate {
    let items = (1..=n)
        .map(|i| ChecklistItem {
            id: format!("item-{i}"),
            order: i,
            description: format!("step {i}"),
            category: "General".to_string(),
            responsible_party: ResponsibleParty::General,
            point_type: PointType::Standard,
            evidence_required: EvidenceRequired::None,
            test_type: None,
            acceptance_criteria: None,
        })
        .collect();
    ChecklistTemplate::new("tpl-1", "Test plan", items)
}

fn instance(n: u32) -> ItpInstance {
    ItpInstance::new("itp-1", "lot-1", template(n))
}

fn completed(item_id: &str) -> Completion {
    let mut c = Completion::pending("itp-1", item_id);
    c.is_completed = true;
    c.completed_at = Some(Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap());
    c
}

#[test]
fn unrecorded_item_is_pending() {
    let instance = instance(3);
    assert!(instance.completion("item-1").is_none());
    let lazy = instance.completion_or_pending("item-1");
    assert_eq!(lazy.state(), CompletionState::Pending);
    assert_eq!(lazy.itp_instance_id, "itp-1");
}

#[test]
fn progress_counts_na_as_done() {
    let mut instance = instance(3);
    instance.record(completed("item-1"));
    let mut na = Completion::pending("itp-1", "item-2");
    na.is_not_applicable = true;
    na.notes = Some("not required".to_string());
    instance.record(na);

    let progress = instance.progress();
    assert_eq!(progress.done, 2);
    assert_eq!(progress.total, 3);
    assert!(!progress.is_complete());

    instance.record(completed("item-3"));
    assert!(instance.progress().is_complete());
}

#[test]
fn record_replaces_by_item_id() {
    let mut instance = instance(1);
    instance.record(completed("item-1"));
    instance.record(Completion::pending("itp-1", "item-1"));
    assert_eq!(instance.recorded_count(), 1);
    assert_eq!(
        instance.completion("item-1").unwrap().state(),
        CompletionState::Pending
    );
}

#[test]
fn identical_snapshots_do_not_differ() {
    let mut a = instance(2);
    a.record(completed("item-1"));
    let b = a.clone();
    assert!(!a.meaningfully_differs(&b));
}

#[test]
fn extra_record_is_a_meaningful_difference() {
    let a = instance(2);
    let mut b = a.clone();
    b.record(completed("item-1"));
    assert!(a.meaningfully_differs(&b));
}

#[test]
fn verification_flip_is_a_meaningful_difference() {
    let mut a = instance(1);
    a.record(completed("item-1"));
    let mut b = a.clone();
    let mut verified = completed("item-1");
    verified.is_verified = true;
    b.record(verified);
    assert!(a.meaningfully_differs(&b));
}

#[test]
fn notes_only_change_is_not_meaningful() {
    // A notes edit on the server must not clobber the local view mid-edit.
    let mut a = instance(1);
    a.record(completed("item-1"));
    let mut b = a.clone();
    let mut with_notes = completed("item-1");
    with_notes.notes = Some("server-side note".to_string());
    b.record(with_notes);
    assert!(!a.meaningfully_differs(&b));
}
