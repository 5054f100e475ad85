//! Completion-specific error types.

use thiserror::Error;

use super::state::CompletionState;

/// Hard faults from the completion state machine.
///
/// Validation refusals ([`Refusal`](super::Refusal)) are deliberately not
/// represented here: a refusal is expected control flow the caller resolves
/// by collecting the missing input, while these errors indicate the caller
/// attempted something the state machine does not define.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompletionError {
    /// The requested transition is not defined by the state machine.
    #[error("transition from {from:?} to {to:?} is not allowed for item {checklist_item_id}")]
    TransitionNotAllowed {
        /// The item whose completion was being mutated.
        checklist_item_id: String,
        /// Current state.
        from: CompletionState,
        /// Requested state.
        to: CompletionState,
    },

    /// Verification was requested on an item that is not a hold point.
    #[error("item {checklist_item_id} is not a hold point and cannot be verified")]
    NotAHoldPoint {
        /// The offending item.
        checklist_item_id: String,
    },

    /// Verification was requested before the completion reached `completed`.
    #[error("hold point {checklist_item_id} cannot be verified before it is completed")]
    VerifyBeforeCompletion {
        /// The offending item.
        checklist_item_id: String,
    },

    /// Witness attendance was supplied for an item that is not a witness
    /// point.
    #[error("item {checklist_item_id} is not a witness point; witness data is not accepted")]
    WitnessNotApplicable {
        /// The offending item.
        checklist_item_id: String,
    },

    /// An NCR link was recorded against a completion that is not failed.
    #[error("item {checklist_item_id} is not failed; an NCR cannot be linked")]
    NcrLinkWithoutFailure {
        /// The offending item.
        checklist_item_id: String,
    },

    /// The completion already links a different NCR.
    #[error("item {checklist_item_id} already links NCR {linked_ncr}")]
    NcrAlreadyLinked {
        /// The offending item.
        checklist_item_id: String,
        /// The NCR already linked.
        linked_ncr: String,
    },

    /// The completion record does not belong to the supplied checklist item.
    #[error("completion is for item {completion_item_id}, not item {checklist_item_id}")]
    ItemMismatch {
        /// The item id the caller supplied.
        checklist_item_id: String,
        /// The item id on the completion record.
        completion_item_id: String,
    },

    /// The record's state flags violate mutual exclusion.
    #[error("completion for item {checklist_item_id} has inconsistent state flags")]
    InconsistentFlags {
        /// The offending item.
        checklist_item_id: String,
    },
}
