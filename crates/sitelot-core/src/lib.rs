//! Domain core for ITP (Inspection & Test Plan) checklist tracking.
//!
//! This crate owns the pure domain logic of the quality-assurance checklist
//! system: checklist templates, the completion state machine, the
//! non-conformance (NCR) auto-raise policy, and the lot conformance gate.
//! It performs no IO and never suspends; the client runtime that talks to
//! the server and the durable offline cache lives in `sitelot-sync`.
//!
//! # Architecture
//!
//! ```text
//! ChecklistTemplate --assigned to lot--> ItpInstance
//!                                          |
//!                  CompletionAction --> completion::apply (pure)
//!                                          |
//!                        Applied { completion, effects } | Refused
//!                                          |
//!                         Effect::RaiseNcr --> ncr::NcrDraft
//!                                          |
//!              ItpInstance + tests + NCRs --> conformance::evaluate
//! ```
//!
//! # Key Concepts
//!
//! - **Checklist item**: one line of an ITP template, tagged with a point
//!   type (standard / witness / hold point) and an evidence requirement.
//! - **Completion**: the mutable record of one item's inspection outcome,
//!   moved forward through `pending -> completed | not_applicable | failed`.
//! - **Refusal**: an expected validation outcome (missing evidence, missing
//!   witness data, missing reason/description) the caller resolves by
//!   collecting the input and re-invoking. Refusals are not errors.
//! - **Conformance gate**: a pure evaluator deciding whether a lot may
//!   transition to "conformed", with human-readable blocking reasons.

pub mod checklist;
pub mod completion;
pub mod conformance;
pub mod instance;
pub mod ncr;
