//! Extraction and edit-interpretation capability seams.
//!
//! Trait-based so the OpenAI-backed implementation and the scripted mocks
//! are interchangeable; the reconciler falls back to its deterministic
//! heuristic whenever a capability reports itself unavailable.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::draft::Draft;
use crate::models::patch::PatchOp;
use crate::models::taxonomy::Taxonomy;

/// Error type for capability calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Capability not configured: {0}")]
    NotConfigured(String),

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed capability response: {0}")]
    Malformed(String),

    #[error("Instruction not recognized")]
    Unrecognized,
}

impl ProviderError {
    /// Unavailability selects the deterministic fallback; any other
    /// failure is reported back to the user as-is.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NotConfigured(_) | Self::Unavailable(_))
    }
}

/// Structured result of extracting a receipt, statement, expense or
/// transfer. Category names the capability could not map onto the
/// taxonomy are carried verbatim in the draft and listed here; such a
/// draft stays unconfirmable until the user corrects them.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub draft: Draft,
    pub unmapped_categories: Vec<String>,
}

impl Extraction {
    pub fn clean(draft: Draft) -> Self {
        Self {
            draft,
            unmapped_categories: Vec::new(),
        }
    }
}

/// Turns raw user input into an initial structured draft.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Itemize a receipt image.
    async fn extract_receipt(
        &self,
        image: &[u8],
        taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError>;

    /// Itemize a free-text statement listing several purchases.
    async fn extract_statement(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError>;

    /// Extract a single expense from free text.
    async fn extract_expense(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError>;

    /// Extract a transfer between accounts from free text.
    async fn extract_transfer(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError>;
}

/// Turns a free-text correction into a validated-later patch set.
#[async_trait]
pub trait EditInterpreter: Send + Sync {
    async fn interpret_edit(
        &self,
        draft: &Draft,
        instruction: &str,
        taxonomy: &Taxonomy,
    ) -> Result<Vec<PatchOp>, ProviderError>;
}
