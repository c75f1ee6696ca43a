//! Scripted mock providers for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{EditInterpreter, Extraction, ExtractionProvider, ProviderError};
use crate::models::draft::Draft;
use crate::models::patch::PatchOp;
use crate::models::taxonomy::Taxonomy;

/// Mock extraction provider that replays queued responses in order.
#[derive(Default)]
pub struct MockExtractionProvider {
    available: AtomicBool,
    responses: Mutex<VecDeque<Result<Extraction, ProviderError>>>,
}

impl MockExtractionProvider {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn push_draft(&self, draft: Draft) {
        self.push(Ok(Extraction::clean(draft)));
    }

    pub fn push_extraction(&self, extraction: Extraction) {
        self.push(Ok(extraction));
    }

    pub fn push_failure(&self, error: ProviderError) {
        self.push(Err(error));
    }

    fn push(&self, response: Result<Extraction, ProviderError>) {
        self.responses
            .lock()
            .expect("mock extraction queue poisoned")
            .push_back(response);
    }

    fn next(&self) -> Result<Extraction, ProviderError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable(
                "mock extraction provider disabled".to_string(),
            ));
        }
        self.responses
            .lock()
            .expect("mock extraction queue poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::Malformed(
                    "mock extraction queue exhausted".to_string(),
                ))
            })
    }
}

#[async_trait]
impl ExtractionProvider for MockExtractionProvider {
    async fn extract_receipt(
        &self,
        _image: &[u8],
        _taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError> {
        self.next()
    }

    async fn extract_statement(
        &self,
        _text: &str,
        _taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError> {
        self.next()
    }

    async fn extract_expense(
        &self,
        _text: &str,
        _taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError> {
        self.next()
    }

    async fn extract_transfer(
        &self,
        _text: &str,
        _taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError> {
        self.next()
    }
}

/// Mock edit interpreter that replays queued patch sets in order. Flip
/// `set_available(false)` to exercise the deterministic fallback.
#[derive(Default)]
pub struct MockEditInterpreter {
    available: AtomicBool,
    responses: Mutex<VecDeque<Result<Vec<PatchOp>, ProviderError>>>,
}

impl MockEditInterpreter {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn push_patches(&self, ops: Vec<PatchOp>) {
        self.push(Ok(ops));
    }

    pub fn push_failure(&self, error: ProviderError) {
        self.push(Err(error));
    }

    fn push(&self, response: Result<Vec<PatchOp>, ProviderError>) {
        self.responses
            .lock()
            .expect("mock interpreter queue poisoned")
            .push_back(response);
    }
}

#[async_trait]
impl EditInterpreter for MockEditInterpreter {
    async fn interpret_edit(
        &self,
        _draft: &Draft,
        _instruction: &str,
        _taxonomy: &Taxonomy,
    ) -> Result<Vec<PatchOp>, ProviderError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable(
                "mock edit interpreter disabled".to_string(),
            ));
        }
        self.responses
            .lock()
            .expect("mock interpreter queue poisoned")
            .pop_front()
            .unwrap_or(Err(ProviderError::Unrecognized))
    }
}
