//! Domain models for reconciler-service.

pub mod draft;
pub mod entry;
pub mod event;
pub mod patch;
pub mod session;
pub mod taxonomy;

pub use draft::{ClassificationDraft, Draft, DraftKind, ExpenseDraft, Item, TransferDraft};
pub use entry::NewEntry;
pub use event::{DraftSummary, InboundEvent, OutboundEvent, ValidationFailure};
pub use patch::{AccountSlot, ItemRef, PatchOp};
pub use session::{Session, SessionState};
pub use taxonomy::Taxonomy;
