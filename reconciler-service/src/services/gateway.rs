//! Persistence gateway: turns a confirmed draft into ledger rows and
//! commits them all-or-nothing.
//!
//! The taxonomy is re-fetched immediately before writing, never taken from
//! the session snapshot, to close the window where categories or accounts
//! changed mid-conversation.

use std::sync::Arc;

use bot_core::retry::{retry_call, RetryConfig};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::draft::Draft;
use crate::models::entry::NewEntry;
use crate::models::session::Session;
use crate::services::database::{LedgerStore, StoreError, TaxonomySource};
use crate::services::metrics::COMMITS_TOTAL;

/// Category recorded on the two legs of a transfer. Transfers move money
/// between accounts and do not belong to a budget category.
const TRANSFER_CATEGORY: &str = "Transferência";

const DEFAULT_TRANSFER_DESCRIPTION: &str = "Transferência entre contas";

/// Outcome of one commit attempt. Only `Committed` is terminal for the
/// session; every other outcome leaves the draft retriable.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed { entry_ids: Vec<Uuid> },
    /// Re-validation against the fresh taxonomy failed.
    TaxonomyChanged { detail: String },
    /// The store rejected a row; the whole transaction was rolled back.
    Rejected { detail: String },
    /// Connectivity failed and retries were exhausted.
    Unavailable { detail: String },
}

pub struct LedgerGateway {
    ledger: Arc<dyn LedgerStore>,
    taxonomy_source: Arc<dyn TaxonomySource>,
    retry: RetryConfig,
    cost_center: String,
    allow_unknown_accounts: bool,
}

impl LedgerGateway {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        taxonomy_source: Arc<dyn TaxonomySource>,
        retry: RetryConfig,
        cost_center: String,
        allow_unknown_accounts: bool,
    ) -> Self {
        Self {
            ledger,
            taxonomy_source,
            retry,
            cost_center,
            allow_unknown_accounts,
        }
    }

    /// Commit the session's draft. All derived rows go into one store
    /// transaction; no partial commit is ever observable.
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub async fn commit(&self, session: &Session) -> CommitOutcome {
        let Some(draft) = &session.draft else {
            return CommitOutcome::Rejected {
                detail: "session has no draft to commit".to_string(),
            };
        };

        let fresh = match self.taxonomy_source.fetch().await {
            Ok(taxonomy) => taxonomy,
            Err(e) => {
                COMMITS_TOTAL.with_label_values(&["unavailable"]).inc();
                return CommitOutcome::Unavailable {
                    detail: e.to_string(),
                };
            }
        };

        if let Err(failure) = draft.validate(&fresh, self.allow_unknown_accounts) {
            warn!(failure = %failure, "draft no longer valid against fresh taxonomy");
            COMMITS_TOTAL.with_label_values(&["taxonomy_changed"]).inc();
            return CommitOutcome::TaxonomyChanged {
                detail: failure.to_string(),
            };
        }
        if draft.account_missing() {
            COMMITS_TOTAL.with_label_values(&["rejected"]).inc();
            return CommitOutcome::Rejected {
                detail: "account was never collected".to_string(),
            };
        }

        let rows = derive_rows(draft, &self.cost_center);

        match retry_call(&self.retry, "insert_entries", || {
            self.ledger.insert_entries(&rows)
        })
        .await
        {
            Ok(entry_ids) => {
                info!(
                    entry_count = entry_ids.len(),
                    total = %draft.total(),
                    "draft committed"
                );
                COMMITS_TOTAL.with_label_values(&["ok"]).inc();
                CommitOutcome::Committed { entry_ids }
            }
            Err(StoreError::Rejected(detail)) => {
                COMMITS_TOTAL.with_label_values(&["rejected"]).inc();
                CommitOutcome::Rejected { detail }
            }
            Err(StoreError::Unavailable(detail)) => {
                COMMITS_TOTAL.with_label_values(&["unavailable"]).inc();
                CommitOutcome::Unavailable { detail }
            }
        }
    }
}

/// Derive the ledger rows for a confirmed draft: one row per item for a
/// classification, one row for an expense, two opposite-signed rows
/// sharing a reference for a transfer.
fn derive_rows(draft: &Draft, cost_center: &str) -> Vec<NewEntry> {
    match draft {
        Draft::Classification(c) => {
            let account = c.account.clone().unwrap_or_default();
            c.items
                .iter()
                .map(|item| NewEntry {
                    entry_date: c.purchase_date,
                    description: row_description(&c.establishment, &item.description),
                    account: account.clone(),
                    category: item.category.clone(),
                    cost_center: cost_center.to_string(),
                    value: item.value.round_dp(2),
                    reference: None,
                })
                .collect()
        }
        Draft::Expense(e) => vec![NewEntry {
            entry_date: e.date,
            description: e
                .description
                .clone()
                .unwrap_or_else(|| e.category.clone()),
            account: e.account.clone().unwrap_or_default(),
            category: e.category.clone(),
            cost_center: cost_center.to_string(),
            value: e.value.round_dp(2),
            reference: None,
        }],
        Draft::Transfer(t) => {
            let reference = Uuid::new_v4();
            let description = t
                .description
                .clone()
                .unwrap_or_else(|| DEFAULT_TRANSFER_DESCRIPTION.to_string());
            let value = t.value.round_dp(2);
            vec![
                NewEntry {
                    entry_date: t.transfer_date,
                    description: description.clone(),
                    account: t.source_account.clone(),
                    category: TRANSFER_CATEGORY.to_string(),
                    cost_center: cost_center.to_string(),
                    value: -value,
                    reference: Some(reference),
                },
                NewEntry {
                    entry_date: t.transfer_date,
                    description,
                    account: t.destination_account.clone(),
                    category: TRANSFER_CATEGORY.to_string(),
                    cost_center: cost_center.to_string(),
                    value,
                    reference: Some(reference),
                },
            ]
        }
    }
}

/// Row description: establishment-prefixed when the establishment was
/// identified.
fn row_description(establishment: &str, item: &str) -> String {
    if establishment.is_empty() || establishment == "Estabelecimento não identificado" {
        item.to_string()
    } else {
        format!("{} - {}", establishment, item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::draft::{ClassificationDraft, ExpenseDraft, Item, TransferDraft};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[test]
    fn classification_rows_preserve_the_exact_total() {
        let draft = Draft::Classification(ClassificationDraft {
            establishment: "Supermercado".to_string(),
            purchase_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            items: vec![
                Item {
                    description: "Arroz".to_string(),
                    value: "25.00".parse().unwrap(),
                    category: "alimentação".to_string(),
                },
                Item {
                    description: "Detergente".to_string(),
                    value: "8.50".parse().unwrap(),
                    category: "limpeza".to_string(),
                },
            ],
            account: Some("Nubank".to_string()),
        });

        let rows = derive_rows(&draft, "custeio");
        assert_eq!(rows.len(), 2);
        let sum: Decimal = rows.iter().map(|r| r.value).sum();
        assert_eq!(sum, "33.50".parse::<Decimal>().unwrap());
        assert!(rows.iter().all(|r| r.account == "Nubank"));
        assert!(rows.iter().all(|r| r.reference.is_none()));
        assert_eq!(rows[0].description, "Supermercado - Arroz");
    }

    #[test]
    fn transfer_rows_sum_to_zero_and_share_a_reference() {
        let draft = Draft::Transfer(TransferDraft {
            value: "500.00".parse().unwrap(),
            source_account: "Conta A".to_string(),
            destination_account: "Conta B".to_string(),
            transfer_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            description: None,
        });

        let rows = derive_rows(&draft, "custeio");
        assert_eq!(rows.len(), 2);
        let sum: Decimal = rows.iter().map(|r| r.value).sum();
        assert_eq!(sum, Decimal::ZERO);
        assert_eq!(rows[0].value, "-500.00".parse::<Decimal>().unwrap());
        assert_eq!(rows[1].value, "500.00".parse::<Decimal>().unwrap());
        assert_eq!(rows[0].reference, rows[1].reference);
        assert!(rows[0].reference.is_some());
        assert_eq!(rows[0].account, "Conta A");
        assert_eq!(rows[1].account, "Conta B");
    }

    #[test]
    fn expense_produces_one_row() {
        let draft = Draft::Expense(ExpenseDraft {
            value: "47.90".parse().unwrap(),
            category: "transporte".to_string(),
            account: Some("Nubank".to_string()),
            date: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            description: Some("corrida".to_string()),
        });

        let rows = derive_rows(&draft, "custeio");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "47.90".parse::<Decimal>().unwrap());
        assert_eq!(rows[0].description, "corrida");
    }
}
