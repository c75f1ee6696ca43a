//! Taxonomy snapshot: the valid categories and account names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::text;

/// Snapshot of the categories configured in the budget table for the
/// current year plus the known account names.
///
/// Sessions carry one and refresh it on every reconciliation attempt; the
/// gateway ignores the snapshot and re-fetches immediately before writing.
/// The core never writes to the tables this is read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub categories: Vec<String>,
    pub accounts: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub fetched_at: DateTime<Utc>,
}

impl Taxonomy {
    pub fn new(categories: Vec<String>, accounts: Vec<String>) -> Self {
        Self {
            categories,
            accounts,
            fetched_at: Utc::now(),
        }
    }

    /// Resolve a category name to its canonical spelling, matching case-
    /// and diacritic-insensitively.
    pub fn find_category(&self, name: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|c| text::eq_fold(c, name))
            .map(String::as_str)
    }

    /// Resolve an account name to its canonical spelling.
    pub fn find_account(&self, name: &str) -> Option<&str> {
        self.accounts
            .iter()
            .find(|a| text::eq_fold(a, name))
            .map(String::as_str)
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.find_category(name).is_some()
    }

    pub fn has_account(&self, name: &str) -> bool {
        self.find_account(name).is_some()
    }
}
