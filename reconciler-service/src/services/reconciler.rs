//! Draft reconciler: merges inbound events into the session's draft while
//! preserving validity.
//!
//! Patch sets apply to a clone of the draft and replace it only when every
//! operation validates; a refused set leaves the live draft untouched.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{instrument, warn};

use crate::models::draft::{Draft, DraftKind, Item};
use crate::models::event::ValidationFailure;
use crate::models::patch::{AccountSlot, ItemRef, PatchOp};
use crate::models::session::Session;
use crate::models::taxonomy::Taxonomy;
use crate::services::metrics::PROVIDER_FAILURES;
use crate::services::providers::{EditInterpreter, ExtractionProvider, ProviderError};
use crate::utils::text;

/// Minimum distinct-token overlap the fallback heuristic requires from
/// both the item and the category before proposing a rename.
const MIN_TOKEN_OVERLAP: usize = 1;

/// Instruction words that carry no naming information and would otherwise
/// collide with short category names.
const STOPWORDS: &[&str] = &[
    "a", "o", "as", "os", "de", "da", "do", "das", "dos", "em", "na", "no", "e", "com", "para",
    "pra", "por", "um", "uma", "mude", "muda", "troque", "troca", "altere", "altera", "corrija",
    "categoria", "item", "itens",
];

/// Events the reconciler interprets against the current draft.
#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    NewImage(Vec<u8>),
    NewText(String),
    EditInstruction(String),
    Confirmation(String),
    AccountAnswer(String),
}

/// Outcome of interpreting one event.
#[derive(Debug, Clone)]
pub enum ReconciliationResult {
    /// The draft was replaced wholesale; present it again.
    DraftUpdated(Draft),
    /// The session cannot act on this event yet.
    AwaitingMoreInput { reason: String },
    /// The event was refused; the draft is unchanged.
    ValidationFailed(ValidationFailure),
    /// The draft is fully valid and confirmed.
    Ready(Draft),
}

pub struct Reconciler {
    extractor: Arc<dyn ExtractionProvider>,
    interpreter: Arc<dyn EditInterpreter>,
    allow_unknown_accounts: bool,
}

impl Reconciler {
    pub fn new(
        extractor: Arc<dyn ExtractionProvider>,
        interpreter: Arc<dyn EditInterpreter>,
        allow_unknown_accounts: bool,
    ) -> Self {
        Self {
            extractor,
            interpreter,
            allow_unknown_accounts,
        }
    }

    /// Interpret one event against the session's draft. The session is
    /// borrowed for this call only and never mutated here; the caller
    /// applies the resulting transition.
    #[instrument(skip(self, session, event), fields(session_id = %session.session_id, state = %session.state))]
    pub async fn interpret(&self, session: &Session, event: ReconcileEvent) -> ReconciliationResult {
        match event {
            ReconcileEvent::NewImage(image) => self.extract_image(session, &image).await,
            ReconcileEvent::NewText(content) => self.extract_text(session, &content).await,
            ReconcileEvent::EditInstruction(instruction) => {
                self.edit(session, &instruction).await
            }
            ReconcileEvent::Confirmation(reply) => self.confirm(session, &reply).await,
            ReconcileEvent::AccountAnswer(answer) => self.account_answer(session, &answer),
        }
    }

    async fn extract_image(&self, session: &Session, image: &[u8]) -> ReconciliationResult {
        if session.kind != DraftKind::Classification {
            return ReconciliationResult::ValidationFailed(ValidationFailure::ExtractionFailure {
                detail: "this conversation does not take images".to_string(),
            });
        }
        let extraction = self.extractor.extract_receipt(image, &session.taxonomy).await;
        self.extraction_result(extraction)
    }

    async fn extract_text(&self, session: &Session, content: &str) -> ReconciliationResult {
        let extraction = match session.kind {
            DraftKind::Classification => {
                self.extractor
                    .extract_statement(content, &session.taxonomy)
                    .await
            }
            DraftKind::Expense => {
                self.extractor
                    .extract_expense(content, &session.taxonomy)
                    .await
            }
            DraftKind::Transfer => {
                self.extractor
                    .extract_transfer(content, &session.taxonomy)
                    .await
            }
        };
        self.extraction_result(extraction)
    }

    fn extraction_result(
        &self,
        extraction: Result<crate::services::providers::Extraction, ProviderError>,
    ) -> ReconciliationResult {
        match extraction {
            Ok(extraction) => {
                if !extraction.unmapped_categories.is_empty() {
                    warn!(
                        unmapped = ?extraction.unmapped_categories,
                        "extraction produced categories outside the taxonomy"
                    );
                }
                ReconciliationResult::DraftUpdated(extraction.draft)
            }
            Err(e) => {
                PROVIDER_FAILURES.with_label_values(&["extraction"]).inc();
                ReconciliationResult::ValidationFailed(ValidationFailure::ExtractionFailure {
                    detail: e.to_string(),
                })
            }
        }
    }

    async fn confirm(&self, session: &Session, reply: &str) -> ReconciliationResult {
        let Some(draft) = &session.draft else {
            return ReconciliationResult::AwaitingMoreInput {
                reason: "nothing to confirm yet; send a receipt or statement first".to_string(),
            };
        };

        if text::is_affirmative(reply) {
            return match draft.validate(&session.taxonomy, self.allow_unknown_accounts) {
                Ok(()) => ReconciliationResult::Ready(draft.clone()),
                Err(v) => ReconciliationResult::ValidationFailed(v),
            };
        }

        // "sim, conta Nubank" confirms and answers the account step in one
        // reply when the account is still missing.
        if draft.account_missing() {
            if let Some(rest) = text::strip_affirmative_prefix(reply) {
                if !rest.is_empty() {
                    match self.account_answer(session, &rest) {
                        ReconciliationResult::Ready(updated) => {
                            return match updated
                                .validate(&session.taxonomy, self.allow_unknown_accounts)
                            {
                                Ok(()) => ReconciliationResult::Ready(updated),
                                Err(v) => ReconciliationResult::ValidationFailed(v),
                            };
                        }
                        other => return other,
                    }
                }
            }
        }

        self.edit(session, reply).await
    }

    fn account_answer(&self, session: &Session, answer: &str) -> ReconciliationResult {
        let Some(draft) = &session.draft else {
            return ReconciliationResult::AwaitingMoreInput {
                reason: "nothing to attach an account to yet".to_string(),
            };
        };

        let trimmed = answer.trim();
        if trimmed.is_empty() {
            return ReconciliationResult::ValidationFailed(ValidationFailure::UnknownAccount {
                account: answer.to_string(),
            });
        }

        match resolve_account(&session.taxonomy, trimmed) {
            Some(canonical) => {
                let mut updated = draft.clone();
                updated.set_account(canonical.to_string());
                ReconciliationResult::Ready(updated)
            }
            None if self.allow_unknown_accounts => {
                let mut updated = draft.clone();
                updated.set_account(trimmed.to_string());
                ReconciliationResult::Ready(updated)
            }
            None => ReconciliationResult::ValidationFailed(ValidationFailure::UnknownAccount {
                account: trimmed.to_string(),
            }),
        }
    }

    async fn edit(&self, session: &Session, instruction: &str) -> ReconciliationResult {
        let Some(draft) = &session.draft else {
            return ReconciliationResult::AwaitingMoreInput {
                reason: "nothing to edit yet; send a receipt or statement first".to_string(),
            };
        };

        match self
            .interpreter
            .interpret_edit(draft, instruction, &session.taxonomy)
            .await
        {
            Ok(ops) => {
                match apply_patch_set(draft, &ops, &session.taxonomy, self.allow_unknown_accounts)
                {
                    Ok(updated) => ReconciliationResult::DraftUpdated(updated),
                    Err(v) => ReconciliationResult::ValidationFailed(v),
                }
            }
            Err(ProviderError::Unrecognized) => {
                ReconciliationResult::ValidationFailed(ValidationFailure::AmbiguousEdit {
                    detail: "could not map the reply to a correction; state the item and category by name"
                        .to_string(),
                })
            }
            Err(e) if e.is_unavailable() => {
                PROVIDER_FAILURES
                    .with_label_values(&["interpretation"])
                    .inc();
                self.fallback_edit(draft, instruction, &session.taxonomy)
            }
            Err(e) => {
                PROVIDER_FAILURES
                    .with_label_values(&["interpretation"])
                    .inc();
                ReconciliationResult::ValidationFailed(ValidationFailure::AmbiguousEdit {
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Deterministic heuristic used when the interpretation capability is
    /// unavailable: find the item and the category the instruction names
    /// by token overlap and propose a single rename. Values and accounts
    /// are never touched here.
    fn fallback_edit(
        &self,
        draft: &Draft,
        instruction: &str,
        taxonomy: &Taxonomy,
    ) -> ReconciliationResult {
        if text::mentions_number(instruction) {
            return ReconciliationResult::ValidationFailed(ValidationFailure::AmbiguousEdit {
                detail: "the interpretation capability is offline; only category renames are possible right now"
                    .to_string(),
            });
        }

        let Draft::Classification(classification) = draft else {
            return ReconciliationResult::ValidationFailed(ValidationFailure::AmbiguousEdit {
                detail: "the interpretation capability is offline; restate the edit later"
                    .to_string(),
            });
        };

        let tokens: HashSet<String> = text::tokenize(instruction)
            .into_iter()
            .filter(|t| t.len() > 1 && !STOPWORDS.contains(&t.as_str()))
            .collect();

        let Some(item_index) =
            best_unique(classification.items.iter().map(|i| &i.description), &tokens, &HashSet::new())
        else {
            return ReconciliationResult::ValidationFailed(ValidationFailure::AmbiguousEdit {
                detail: "could not identify the item; restate using its exact name".to_string(),
            });
        };

        let item_tokens: HashSet<String> =
            text::tokenize(&classification.items[item_index].description)
                .into_iter()
                .collect();
        let Some(category_index) =
            best_unique(taxonomy.categories.iter(), &tokens, &item_tokens)
        else {
            return ReconciliationResult::ValidationFailed(ValidationFailure::AmbiguousEdit {
                detail: "could not identify the category; restate using its exact name".to_string(),
            });
        };

        let op = PatchOp::RenameCategory {
            item: ItemRef::Index(item_index),
            category: taxonomy.categories[category_index].clone(),
        };
        match apply_patch_set(draft, &[op], taxonomy, self.allow_unknown_accounts) {
            Ok(updated) => ReconciliationResult::DraftUpdated(updated),
            Err(v) => ReconciliationResult::ValidationFailed(v),
        }
    }
}

/// Pick the candidate with the strictly largest token overlap against the
/// instruction, ignoring `excluded` tokens. `None` when nothing clears the
/// minimum or the best is tied.
fn best_unique<'a>(
    candidates: impl Iterator<Item = &'a String>,
    tokens: &HashSet<String>,
    excluded: &HashSet<String>,
) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    let mut tied = false;

    for (index, candidate) in candidates.enumerate() {
        let overlap = text::tokenize(candidate)
            .into_iter()
            .filter(|t| !excluded.contains(t))
            .collect::<HashSet<_>>()
            .intersection(tokens)
            .count();
        match best {
            Some((_, best_overlap)) if overlap > best_overlap => {
                best = Some((index, overlap));
                tied = false;
            }
            Some((_, best_overlap)) if overlap == best_overlap && overlap >= MIN_TOKEN_OVERLAP => {
                tied = true;
            }
            None => {
                best = Some((index, overlap));
                tied = false;
            }
            _ => {}
        }
    }

    match best {
        Some((index, overlap)) if overlap >= MIN_TOKEN_OVERLAP && !tied => Some(index),
        _ => None,
    }
}

/// Deterministic account resolution: exact folded match first, then a
/// unique account name contained in the answer ("conta Nubank" -> Nubank).
fn resolve_account<'t>(taxonomy: &'t Taxonomy, answer: &str) -> Option<&'t str> {
    if let Some(account) = taxonomy.find_account(answer) {
        return Some(account);
    }

    let folded = text::fold(answer);
    let mut matches = taxonomy
        .accounts
        .iter()
        .filter(|a| folded.contains(&text::fold(a)));
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first.as_str())
}

// -----------------------------------------------------------------------------
// Patch application
// -----------------------------------------------------------------------------

/// Field a patch operation writes, used to refuse contradictory sets.
#[derive(Debug, PartialEq, Eq, Hash)]
enum FieldKey {
    ItemCategory(usize),
    ItemValue(usize),
    ItemRemoval(usize),
    Account(AccountSlot),
    Date,
    Description,
    Total,
}

/// Apply a whole patch set to a clone of the draft. Either every operation
/// validates and the new draft is returned, or the set is discarded with
/// the first failure; the input draft is never touched.
pub fn apply_patch_set(
    draft: &Draft,
    ops: &[PatchOp],
    taxonomy: &Taxonomy,
    allow_unknown_accounts: bool,
) -> Result<Draft, ValidationFailure> {
    if ops.is_empty() {
        return Err(ValidationFailure::AmbiguousEdit {
            detail: "the instruction did not produce any change".to_string(),
        });
    }

    check_contradictions(draft, ops)?;

    let resolve_category = |name: &str| -> Result<String, ValidationFailure> {
        taxonomy
            .find_category(name)
            .map(str::to_string)
            .ok_or_else(|| ValidationFailure::UnknownCategory {
                category: name.to_string(),
            })
    };
    let resolve_patch_account = |name: &str| -> Result<String, ValidationFailure> {
        match taxonomy.find_account(name) {
            Some(canonical) => Ok(canonical.to_string()),
            None if allow_unknown_accounts => Ok(name.to_string()),
            None => Err(ValidationFailure::UnknownAccount {
                account: name.to_string(),
            }),
        }
    };

    let mut updated = draft.clone();

    // In-place field writes first, then removals in descending index
    // order, then additions, then the total redistribution, so item
    // references stay stable while they are being used.
    for op in ops {
        match op {
            PatchOp::RenameCategory { item, category } => {
                let category = resolve_category(category)?;
                match &mut updated {
                    Draft::Classification(c) => {
                        let index = resolve_item(&c.items, item)?;
                        c.items[index].category = category;
                    }
                    Draft::Expense(e) => {
                        resolve_expense_ref(&e.description, item)?;
                        e.category = category;
                    }
                    Draft::Transfer(_) => {
                        return Err(ValidationFailure::AmbiguousEdit {
                            detail: "a transfer has no categories to rename".to_string(),
                        })
                    }
                }
            }
            PatchOp::AdjustValue { item, value } => {
                if *value < Decimal::ZERO {
                    return Err(ValidationFailure::AmbiguousEdit {
                        detail: format!("value for {} cannot be negative", item.label()),
                    });
                }
                match &mut updated {
                    Draft::Classification(c) => {
                        let index = resolve_item(&c.items, item)?;
                        c.items[index].value = *value;
                    }
                    Draft::Expense(e) => {
                        resolve_expense_ref(&e.description, item)?;
                        e.value = *value;
                    }
                    Draft::Transfer(_) => {
                        return Err(ValidationFailure::AmbiguousEdit {
                            detail: "use the transfer value, not an item value".to_string(),
                        })
                    }
                }
            }
            PatchOp::ChangeAccount { slot, account } => {
                let account = resolve_patch_account(account)?;
                match (&mut updated, slot) {
                    (Draft::Classification(c), AccountSlot::Entry) => c.account = Some(account),
                    (Draft::Expense(e), AccountSlot::Entry) => e.account = Some(account),
                    (Draft::Transfer(t), AccountSlot::Source) => t.source_account = account,
                    (Draft::Transfer(t), AccountSlot::Destination) => {
                        t.destination_account = account
                    }
                    _ => {
                        return Err(ValidationFailure::AmbiguousEdit {
                            detail: "that account field does not exist on this draft".to_string(),
                        })
                    }
                }
            }
            PatchOp::ChangeDate { date } => match &mut updated {
                Draft::Classification(c) => c.purchase_date = *date,
                Draft::Expense(e) => e.date = *date,
                Draft::Transfer(t) => t.transfer_date = *date,
            },
            PatchOp::SetDescription { description } => match &mut updated {
                Draft::Expense(e) => e.description = description.clone(),
                Draft::Transfer(t) => t.description = description.clone(),
                Draft::Classification(_) => {
                    return Err(ValidationFailure::AmbiguousEdit {
                        detail: "a classification has item descriptions, not a single one"
                            .to_string(),
                    })
                }
            },
            PatchOp::RemoveItem { .. } | PatchOp::AddItem { .. } | PatchOp::SetTotal { .. } => {}
        }
    }

    let mut removals: Vec<usize> = Vec::new();
    for op in ops {
        if let PatchOp::RemoveItem { item } = op {
            match &updated {
                Draft::Classification(c) => removals.push(resolve_item(&c.items, item)?),
                _ => {
                    return Err(ValidationFailure::AmbiguousEdit {
                        detail: "only itemized classifications have removable items".to_string(),
                    })
                }
            }
        }
    }
    removals.sort_unstable_by(|a, b| b.cmp(a));
    if let Draft::Classification(c) = &mut updated {
        for index in removals {
            c.items.remove(index);
        }
    }

    for op in ops {
        if let PatchOp::AddItem {
            description,
            value,
            category,
        } = op
        {
            if *value < Decimal::ZERO {
                return Err(ValidationFailure::AmbiguousEdit {
                    detail: format!("value for '{}' cannot be negative", description),
                });
            }
            let category = resolve_category(category)?;
            match &mut updated {
                Draft::Classification(c) => c.items.push(Item {
                    description: description.clone(),
                    value: *value,
                    category,
                }),
                _ => {
                    return Err(ValidationFailure::AmbiguousEdit {
                        detail: "only itemized classifications take new items".to_string(),
                    })
                }
            }
        }
    }

    for op in ops {
        if let PatchOp::SetTotal { value } = op {
            if *value <= Decimal::ZERO {
                return Err(ValidationFailure::AmbiguousEdit {
                    detail: "total must be positive".to_string(),
                });
            }
            match &mut updated {
                Draft::Classification(c) => redistribute(&mut c.items, *value)?,
                Draft::Expense(e) => e.value = *value,
                Draft::Transfer(t) => t.value = *value,
            }
        }
    }

    check_structure(&updated)?;

    Ok(updated)
}

/// Refuse duplicate or contradictory operations for the same field before
/// anything is applied.
fn check_contradictions(draft: &Draft, ops: &[PatchOp]) -> Result<(), ValidationFailure> {
    let item_key = |item: &ItemRef| -> Result<usize, ValidationFailure> {
        match draft {
            Draft::Classification(c) => resolve_item(&c.items, item),
            Draft::Expense(e) => resolve_expense_ref(&e.description, item).map(|_| 0),
            // Kind mismatches are reported while applying.
            Draft::Transfer(_) => Ok(0),
        }
    };

    let mut seen: HashSet<FieldKey> = HashSet::new();
    let mut conflict = |key: FieldKey| -> Result<(), ValidationFailure> {
        if !seen.insert(key) {
            return Err(ValidationFailure::AmbiguousEdit {
                detail: "the instruction changes the same field twice".to_string(),
            });
        }
        Ok(())
    };

    let mut touched_values = false;
    let mut set_total = false;
    for op in ops {
        match op {
            PatchOp::RenameCategory { item, .. } => conflict(FieldKey::ItemCategory(item_key(item)?))?,
            PatchOp::AdjustValue { item, .. } => {
                touched_values = true;
                conflict(FieldKey::ItemValue(item_key(item)?))?
            }
            PatchOp::RemoveItem { item } => conflict(FieldKey::ItemRemoval(item_key(item)?))?,
            PatchOp::ChangeAccount { slot, .. } => conflict(FieldKey::Account(*slot))?,
            PatchOp::ChangeDate { .. } => conflict(FieldKey::Date)?,
            PatchOp::SetDescription { .. } => conflict(FieldKey::Description)?,
            PatchOp::SetTotal { .. } => {
                set_total = true;
                conflict(FieldKey::Total)?
            }
            PatchOp::AddItem { .. } => {}
        }
    }

    if set_total && touched_values {
        return Err(ValidationFailure::AmbiguousEdit {
            detail: "a total redistribution and a single value change contradict each other"
                .to_string(),
        });
    }

    for key in &seen {
        if let FieldKey::ItemRemoval(index) = key {
            if seen.contains(&FieldKey::ItemCategory(*index))
                || seen.contains(&FieldKey::ItemValue(*index))
            {
                return Err(ValidationFailure::AmbiguousEdit {
                    detail: "the instruction edits an item it also removes".to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Structural invariants that must hold after any patch set.
fn check_structure(draft: &Draft) -> Result<(), ValidationFailure> {
    match draft {
        Draft::Classification(c) => {
            if c.items.is_empty() {
                return Err(ValidationFailure::AmbiguousEdit {
                    detail: "cannot remove the last item".to_string(),
                });
            }
            Ok(())
        }
        Draft::Expense(e) => {
            if e.value <= Decimal::ZERO {
                return Err(ValidationFailure::AmbiguousEdit {
                    detail: "expense value must be positive".to_string(),
                });
            }
            Ok(())
        }
        Draft::Transfer(t) => {
            if t.value <= Decimal::ZERO {
                return Err(ValidationFailure::AmbiguousEdit {
                    detail: "transfer value must be positive".to_string(),
                });
            }
            if text::eq_fold(&t.source_account, &t.destination_account) {
                return Err(ValidationFailure::AmbiguousEdit {
                    detail: "source and destination accounts must differ".to_string(),
                });
            }
            Ok(())
        }
    }
}

/// Resolve an item reference against the current items.
fn resolve_item(items: &[Item], reference: &ItemRef) -> Result<usize, ValidationFailure> {
    match reference {
        ItemRef::Index(index) => {
            if *index < items.len() {
                Ok(*index)
            } else {
                Err(ValidationFailure::ItemNotFound {
                    reference: reference.label(),
                })
            }
        }
        ItemRef::Description(description) => {
            if let Some(index) = items
                .iter()
                .position(|i| text::eq_fold(&i.description, description))
            {
                return Ok(index);
            }

            // Unique substring match covers "o arroz" against "Arroz 5kg".
            let folded = text::fold(description);
            let mut matches = items.iter().enumerate().filter(|(_, i)| {
                let item_folded = text::fold(&i.description);
                item_folded.contains(&folded) || folded.contains(&item_folded)
            });
            match (matches.next(), matches.next()) {
                (Some((index, _)), None) => Ok(index),
                (Some(_), Some(_)) => Err(ValidationFailure::AmbiguousEdit {
                    detail: format!("'{}' matches more than one item", description),
                }),
                (None, _) => Err(ValidationFailure::ItemNotFound {
                    reference: description.clone(),
                }),
            }
        }
    }
}

/// An expense behaves as a single-item draft for item-addressed ops.
fn resolve_expense_ref(description: &Option<String>, reference: &ItemRef) -> Result<(), ValidationFailure> {
    match reference {
        ItemRef::Index(0) => Ok(()),
        ItemRef::Index(_) => Err(ValidationFailure::ItemNotFound {
            reference: reference.label(),
        }),
        ItemRef::Description(d) => match description {
            Some(current) if text::eq_fold(current, d) => Ok(()),
            Some(current) if text::fold(current).contains(&text::fold(d)) => Ok(()),
            // A bare expense has no item names to disagree with.
            None => Ok(()),
            _ => Err(ValidationFailure::ItemNotFound {
                reference: d.clone(),
            }),
        },
    }
}

/// Scale item values proportionally so they sum to `target`, exact to two
/// decimal places; the rounding remainder lands on the last item.
fn redistribute(items: &mut [Item], target: Decimal) -> Result<(), ValidationFailure> {
    if items.is_empty() {
        return Err(ValidationFailure::AmbiguousEdit {
            detail: "there are no items to distribute the total over".to_string(),
        });
    }
    let current: Decimal = items.iter().map(|i| i.value).sum();
    if current <= Decimal::ZERO {
        return Err(ValidationFailure::AmbiguousEdit {
            detail: "cannot redistribute values from a zero total".to_string(),
        });
    }

    let mut allocated = Decimal::ZERO;
    let last = items.len() - 1;
    for (index, item) in items.iter_mut().enumerate() {
        if index == last {
            item.value = target - allocated;
        } else {
            item.value = (item.value * target / current).round_dp(2);
            allocated += item.value;
        }
    }

    if items[last].value < Decimal::ZERO {
        return Err(ValidationFailure::AmbiguousEdit {
            detail: "total is too small to distribute over the items".to_string(),
        });
    }

    Ok(())
}
