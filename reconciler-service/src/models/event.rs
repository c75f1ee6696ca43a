//! Abstract events exchanged with the presentation transport.
//!
//! Rendering summaries and errors to chat text happens on the other side
//! of this boundary; the core only emits structured data.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::draft::Draft;

/// Events the transport delivers to the core, already tagged with the
/// conversation (thread) identifier by the caller.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    ImageReceived(Vec<u8>),
    TextReceived(String),
    ReplyReceived(String),
    CancelRequested,
}

/// Typed reasons a draft operation was refused. Every variant is
/// recoverable within the session: the draft it refers to is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationFailure {
    /// The extraction capability returned nothing usable; the caller is
    /// asked to resend.
    ExtractionFailure { detail: String },
    UnknownCategory { category: String },
    UnknownAccount { account: String },
    ItemNotFound { reference: String },
    AmbiguousEdit { detail: String },
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExtractionFailure { detail } => write!(f, "extraction failed: {}", detail),
            Self::UnknownCategory { category } => write!(f, "unknown category '{}'", category),
            Self::UnknownAccount { account } => write!(f, "unknown account '{}'", account),
            Self::ItemNotFound { reference } => write!(f, "no item matches '{}'", reference),
            Self::AmbiguousEdit { detail } => write!(f, "ambiguous edit: {}", detail),
        }
    }
}

/// Structured draft summary handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSummary {
    pub draft: Draft,
    pub total: Decimal,
}

impl DraftSummary {
    pub fn of(draft: &Draft) -> Self {
        Self {
            draft: draft.clone(),
            total: draft.total(),
        }
    }
}

/// Events the core emits back through the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboundEvent {
    DraftPresented(DraftSummary),
    ValidationError(ValidationFailure),
    AccountRequested,
    CommitSucceeded { entry_ids: Vec<Uuid> },
    CommitFailed { reason: String },
    SessionClosed,
}
