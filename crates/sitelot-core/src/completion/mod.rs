//! Completion records and the checklist state machine.
//!
//! One [`Completion`] exists per (ITP instance, checklist item) pair and is
//! only ever moved forward through the state machine:
//!
//! ```text
//!            +--> completed  (toggle back to pending allowed)
//! pending ---+--> not_applicable   (terminal in this core)
//!            +--> failed           (terminal; auto-raises an NCR)
//! ```
//!
//! Transitions are applied by the pure [`apply`] function, which validates
//! the guards for the owning [`ChecklistItem`](crate::checklist::ChecklistItem)
//! and either returns the updated record (plus any side effects for the
//! caller to execute) or a [`Refusal`] telling the caller which input is
//! missing. Refusals are expected control flow, not faults; hard errors
//! (attempting an undefined transition, verifying a non-hold-point) are
//! [`CompletionError`]s.

mod error;
mod machine;
mod state;

#[cfg(test)]
mod tests;

pub use error::CompletionError;
pub use machine::{Applied, CompletionAction, Effect, Outcome, Refusal, TransitionContext, apply};
pub use state::{Attachment, Completion, CompletionState, FailureReport, GpsCoordinates, WitnessRecord};
