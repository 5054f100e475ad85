//! The lot conformance gate.
//!
//! A pure evaluator deciding whether a lot may transition to "conformed".
//! The gate reads the ITP instance plus two live external signals (verified
//! passing test results, open NCRs) and reports each prerequisite alongside
//! human-readable blocking reasons. It never mutates anything and its result
//! is advisory: the authoritative re-check happens server-side when the
//! caller commits the status transition, because the displayed result may be
//! stale by the time the user acts on it.
//!
//! Prerequisites are computed fresh on every call and must not be cached
//! across evaluations; the test and NCR signals belong to other
//! collaborators and move underneath us.

use serde::{Deserialize, Serialize};

use crate::instance::ItpInstance;
use crate::ncr::Ncr;


/// A test result as reported by the test-results collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Stable result identifier.
    pub id: String,
    /// Whether the result has been verified.
    pub verified: bool,
    /// Whether the test passed.
    pub passed: bool,
}

impl TestResult {
    /// A verified passing result satisfies the gate's test prerequisite.
    #[must_use]
    pub fn is_verified_pass(&self) -> bool {
        self.verified && self.passed
    }
}

/// The gate's inputs, gathered fresh for each evaluation.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    /// The lot's ITP instance, if one is assigned.
    pub instance: Option<&'a ItpInstance>,
    /// All test results reported for the lot.
    pub test_results: &'a [TestResult],
    /// All NCRs linked to the lot.
    pub ncrs: &'a [Ncr],
}

/// The four prerequisites, reported individually for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformancePrerequisites {
    /// An ITP instance is assigned to the lot.
    pub itp_assigned: bool,
    /// Every checklist item is completed or not applicable.
    pub itp_completed: bool,
    /// Items done (completed + not applicable).
    pub completed_count: usize,
    /// Total items in the template.
    pub total_count: usize,
    /// At least one verified passing test result exists.
    pub has_passing_test: bool,
    /// No NCR on the lot is open.
    pub no_open_ncrs: bool,
    /// The offending NCR numbers, for display.
    pub open_ncr_numbers: Vec<String>,
}

/// The gate verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    /// Logical AND of the four prerequisites.
    pub can_conform: bool,
    /// Exactly the failing conditions, human-readable. Empty iff
    /// `can_conform`.
    pub blocking_reasons: Vec<String>,
    /// The individual prerequisite flags.
    pub prerequisites: ConformancePrerequisites,
}

/// Evaluates whether a lot may conform.
#[must_use]
pub fn evaluate(input: GateInput<'_>) -> GateResult {
    let itp_assigned = input.instance.is_some();
    let (completed_count, total_count) = input
        .instance
        .map_or((0, 0), |i| (i.progress().done, i.progress().total));
    let itp_completed = itp_assigned && completed_count == total_count;

    let has_passing_test = input.test_results.iter().any(TestResult::is_verified_pass);

    let open_ncr_numbers: Vec<String> = input
        .ncrs
        .iter()
        .filter(|ncr| ncr.status.is_open())
        .map(|ncr| ncr.number.clone())
        .collect();
    let no_open_ncrs = open_ncr_numbers.is_empty();

    let mut blocking_reasons = Vec::new();
    if !itp_assigned {
        blocking_reasons.push("no inspection & test plan assigned to the lot".to_string());
    } else if !itp_completed {
        blocking_reasons.push(format!(
            "checklist incomplete: {completed_count}/{total_count} items signed off"
        ));
    }
    if !has_passing_test {
        blocking_reasons.push("no verified passing test result recorded for the lot".to_string());
    }
    if !no_open_ncrs {
        blocking_reasons.push(format!(
            "open non-conformances must be closed: {}",
            open_ncr_numbers.join(", ")
        ));
    }

    let can_conform = itp_assigned && itp_completed && has_passing_test && no_open_ncrs;
    debug_assert_eq!(can_conform, blocking_reasons.is_empty());

    GateResult {
        can_conform,
        blocking_reasons,
        prerequisites: ConformancePrerequisites {
            itp_assigned,
            itp_completed,
            completed_count,
            total_count,
            has_passing_test,
            no_open_ncrs,
            open_ncr_numbers,
        },
    }
}
