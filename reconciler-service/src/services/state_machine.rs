//! Confirmation state machine.
//!
//! Pure transition computation: given the session's state and the
//! reconciler's outcome for one event, decide the next state, the draft
//! replacement and the outbound effects. The engine applies the
//! transition and runs the gateway when `commit` is set.

use crate::models::draft::{Draft, DraftKind};
use crate::models::event::{DraftSummary, OutboundEvent, ValidationFailure};
use crate::models::session::SessionState;
use crate::services::gateway::CommitOutcome;
use crate::services::reconciler::ReconciliationResult;

/// Result of one transition computation.
#[derive(Debug, Clone)]
pub struct Transition {
    pub next_state: SessionState,
    pub new_draft: Option<Draft>,
    pub effects: Vec<OutboundEvent>,
    /// The gateway must run before the transition is final; its outcome
    /// goes through [`on_commit_outcome`].
    pub commit: bool,
}

impl Transition {
    fn stay(state: SessionState) -> Self {
        Self {
            next_state: state,
            new_draft: None,
            effects: Vec::new(),
            commit: false,
        }
    }

    fn with_effect(mut self, effect: OutboundEvent) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Whether this draft still needs the account-collection step before it
/// can commit. Transfers never do.
fn needs_account(kind: DraftKind, draft: &Draft) -> bool {
    kind != DraftKind::Transfer && draft.account_missing()
}

/// Compute the transition for a reconciliation outcome.
pub fn on_result(
    state: SessionState,
    kind: DraftKind,
    result: ReconciliationResult,
) -> Transition {
    match result {
        ReconciliationResult::DraftUpdated(draft) => {
            let summary = DraftSummary::of(&draft);
            Transition {
                next_state: SessionState::AwaitingConfirmation,
                new_draft: Some(draft),
                effects: vec![OutboundEvent::DraftPresented(summary)],
                commit: false,
            }
        }
        ReconciliationResult::ValidationFailed(failure) => {
            // Extraction failures in CREATED leave the session addressable
            // for a resend; edit refusals keep the draft awaiting
            // confirmation unchanged.
            Transition::stay(state).with_effect(OutboundEvent::ValidationError(failure))
        }
        ReconciliationResult::AwaitingMoreInput { reason } => Transition::stay(state)
            .with_effect(OutboundEvent::ValidationError(
                ValidationFailure::ExtractionFailure { detail: reason },
            )),
        ReconciliationResult::Ready(draft) => {
            if needs_account(kind, &draft) {
                Transition {
                    next_state: SessionState::AwaitingAccount,
                    new_draft: Some(draft),
                    effects: vec![OutboundEvent::AccountRequested],
                    commit: false,
                }
            } else {
                Transition {
                    next_state: state,
                    new_draft: Some(draft),
                    effects: Vec::new(),
                    commit: true,
                }
            }
        }
    }
}

/// Compute the transition for a gateway outcome. Every failure keeps the
/// draft and returns the session to the confirmation step so the user can
/// retry or edit; only a successful commit is terminal.
pub fn on_commit_outcome(outcome: CommitOutcome) -> Transition {
    match outcome {
        CommitOutcome::Committed { entry_ids } => Transition {
            next_state: SessionState::Committed,
            new_draft: None,
            effects: vec![OutboundEvent::CommitSucceeded { entry_ids }],
            commit: false,
        },
        CommitOutcome::TaxonomyChanged { detail } => {
            Transition::stay(SessionState::AwaitingConfirmation).with_effect(
                OutboundEvent::CommitFailed {
                    reason: format!("the category or account set changed: {}", detail),
                },
            )
        }
        CommitOutcome::Rejected { detail } => {
            Transition::stay(SessionState::AwaitingConfirmation)
                .with_effect(OutboundEvent::CommitFailed { reason: detail })
        }
        CommitOutcome::Unavailable { detail } => {
            Transition::stay(SessionState::AwaitingConfirmation).with_effect(
                OutboundEvent::CommitFailed {
                    reason: format!("the ledger store is unavailable: {}", detail),
                },
            )
        }
    }
}
