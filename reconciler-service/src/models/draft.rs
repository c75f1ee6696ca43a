//! Draft models: the mutable in-progress representation of a pending
//! ledger entry before confirmation.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::event::ValidationFailure;
use crate::models::taxonomy::Taxonomy;

/// Kind of entry a session is building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftKind {
    Classification,
    Expense,
    Transfer,
}

impl DraftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Expense => "expense",
            Self::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "expense" => Self::Expense,
            "transfer" => Self::Transfer,
            _ => Self::Classification,
        }
    }
}

impl std::fmt::Display for DraftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single line item of a classification draft.
///
/// The category may temporarily hold a name outside the taxonomy when the
/// extraction capability could not map it; the draft then fails validation
/// until the user corrects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub description: String,
    pub value: Decimal,
    pub category: String,
}

/// Itemized receipt or statement classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationDraft {
    pub establishment: String,
    pub purchase_date: NaiveDate,
    pub items: Vec<Item>,
    pub account: Option<String>,
}

impl ClassificationDraft {
    pub fn total(&self) -> Decimal {
        self.items.iter().map(|i| i.value).sum()
    }
}

/// Movement of money between two known accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDraft {
    pub value: Decimal,
    pub source_account: String,
    pub destination_account: String,
    pub transfer_date: NaiveDate,
    pub description: Option<String>,
}

/// Single free-text expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseDraft {
    pub value: Decimal,
    pub category: String,
    pub account: Option<String>,
    pub date: NaiveDate,
    pub description: Option<String>,
}

/// A pending entry, discriminated by kind. Replaced wholesale on every
/// successful reconciliation, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Draft {
    Classification(ClassificationDraft),
    Expense(ExpenseDraft),
    Transfer(TransferDraft),
}

impl Draft {
    pub fn kind(&self) -> DraftKind {
        match self {
            Self::Classification(_) => DraftKind::Classification,
            Self::Expense(_) => DraftKind::Expense,
            Self::Transfer(_) => DraftKind::Transfer,
        }
    }

    /// Total monetary value of the draft.
    pub fn total(&self) -> Decimal {
        match self {
            Self::Classification(c) => c.total(),
            Self::Expense(e) => e.value,
            Self::Transfer(t) => t.value,
        }
    }

    /// Whether the account-collection step is still pending. Transfers
    /// carry both accounts in the draft and never need it.
    pub fn account_missing(&self) -> bool {
        match self {
            Self::Classification(c) => c.account.is_none(),
            Self::Expense(e) => e.account.is_none(),
            Self::Transfer(_) => false,
        }
    }

    pub fn set_account(&mut self, account: String) {
        match self {
            Self::Classification(c) => c.account = Some(account),
            Self::Expense(e) => e.account = Some(account),
            Self::Transfer(_) => {}
        }
    }

    /// Validate every field against the given taxonomy. Called at
    /// confirmation time and again by the gateway against a fresh snapshot
    /// immediately before commit.
    ///
    /// A still-missing account is acceptable here; the account-collection
    /// step fills it before commit.
    pub fn validate(
        &self,
        taxonomy: &Taxonomy,
        allow_unknown_accounts: bool,
    ) -> Result<(), ValidationFailure> {
        let check_account = |account: &str| -> Result<(), ValidationFailure> {
            if allow_unknown_accounts || taxonomy.has_account(account) {
                Ok(())
            } else {
                Err(ValidationFailure::UnknownAccount {
                    account: account.to_string(),
                })
            }
        };

        match self {
            Self::Classification(c) => {
                for item in &c.items {
                    if item.value < Decimal::ZERO {
                        return Err(ValidationFailure::AmbiguousEdit {
                            detail: format!("item '{}' has a negative value", item.description),
                        });
                    }
                    if !taxonomy.has_category(&item.category) {
                        return Err(ValidationFailure::UnknownCategory {
                            category: item.category.clone(),
                        });
                    }
                }
                if let Some(account) = &c.account {
                    check_account(account)?;
                }
                Ok(())
            }
            Self::Expense(e) => {
                if e.value <= Decimal::ZERO {
                    return Err(ValidationFailure::AmbiguousEdit {
                        detail: "expense value must be positive".to_string(),
                    });
                }
                if !taxonomy.has_category(&e.category) {
                    return Err(ValidationFailure::UnknownCategory {
                        category: e.category.clone(),
                    });
                }
                if let Some(account) = &e.account {
                    check_account(account)?;
                }
                Ok(())
            }
            Self::Transfer(t) => {
                if t.value <= Decimal::ZERO {
                    return Err(ValidationFailure::AmbiguousEdit {
                        detail: "transfer value must be positive".to_string(),
                    });
                }
                if crate::utils::text::eq_fold(&t.source_account, &t.destination_account) {
                    return Err(ValidationFailure::AmbiguousEdit {
                        detail: "source and destination accounts must differ".to_string(),
                    });
                }
                check_account(&t.source_account)?;
                check_account(&t.destination_account)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(
            vec!["alimentação".to_string(), "limpeza".to_string()],
            vec!["Nubank".to_string(), "Conta A".to_string(), "Conta B".to_string()],
        )
    }

    fn classification() -> Draft {
        Draft::Classification(ClassificationDraft {
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
            account: None,
        })
    }

    #[test]
    fn classification_totals_are_exact() {
        assert_eq!(classification().total(), "33.50".parse::<Decimal>().unwrap());
    }

    #[test]
    fn classification_validates_against_taxonomy() {
        let draft = classification();
        assert!(draft.validate(&taxonomy(), false).is_ok());

        let mut bad = classification();
        if let Draft::Classification(c) = &mut bad {
            c.items[0].category = "casa".to_string();
        }
        assert_eq!(
            bad.validate(&taxonomy(), false),
            Err(ValidationFailure::UnknownCategory {
                category: "casa".to_string()
            })
        );
    }

    #[test]
    fn missing_account_is_not_a_validation_failure() {
        let draft = classification();
        assert!(draft.account_missing());
        assert!(draft.validate(&taxonomy(), false).is_ok());
    }

    #[test]
    fn unknown_account_gated_by_config() {
        let mut draft = classification();
        draft.set_account("Banco Novo".to_string());
        assert!(draft.validate(&taxonomy(), false).is_err());
        assert!(draft.validate(&taxonomy(), true).is_ok());
    }

    #[test]
    fn transfer_accounts_must_differ() {
        let draft = Draft::Transfer(TransferDraft {
            value: "500.00".parse().unwrap(),
            source_account: "Conta A".to_string(),
            destination_account: "conta a".to_string(),
            transfer_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            description: None,
        });
        assert!(matches!(
            draft.validate(&taxonomy(), false),
            Err(ValidationFailure::AmbiguousEdit { .. })
        ));
    }

    #[test]
    fn transfer_value_must_be_positive() {
        let draft = Draft::Transfer(TransferDraft {
            value: Decimal::ZERO,
            source_account: "Conta A".to_string(),
            destination_account: "Conta B".to_string(),
            transfer_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            description: None,
        });
        assert!(draft.validate(&taxonomy(), false).is_err());
    }
}
