//! Tests for checklist templates.

use super::{ChecklistItem, ChecklistTemplate, EvidenceRequired, PointType, ResponsibleParty};

fn item(id: &str, order: u32) -> ChecklistItem {
    ChecklistItem {
        id: id.to_string(),
        order,
        description: format!("item {id}"),
        category: "Earthworks".to_string(),
        responsible_party: ResponsibleParty::Contractor,
        point_type: PointType::Standard,
        evidence_required: EvidenceRequired::None,
        test_type: None,
        acceptance_criteria: None,
    }
}

#[test]
fn template_sorts_items_by_order() {
    let template = ChecklistTemplate::new(
        "tpl-1",
        "Bulk Earthworks",
        vec![item("c", 30), item("a", 10), item("b", 20)],
    );

    let ids: Vec<&str> = template.items().iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(template.len(), 3);
    assert!(!template.is_empty());
}

#[test]
fn template_item_lookup() {
    let template = ChecklistTemplate::new("tpl-1", "Bulk Earthworks", vec![item("a", 1)]);
    assert!(template.item("a").is_some());
    assert!(template.item("missing").is_none());
}

#[test]
fn evidence_required_flag() {
    assert!(!EvidenceRequired::None.is_required());
    assert!(EvidenceRequired::Photo.is_required());
    assert!(EvidenceRequired::Test.is_required());
    assert!(EvidenceRequired::Document.is_required());
}

#[test]
fn point_type_serde_round_trip() {
    let json = serde_json::to_string(&PointType::HoldPoint).unwrap();
    assert_eq!(json, "\"hold_point\"");
    let back: PointType = serde_json::from_str(&json).unwrap();
    assert_eq!(back, PointType::HoldPoint);
}
