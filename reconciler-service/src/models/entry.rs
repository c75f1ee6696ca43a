//! Ledger entry rows derived from a confirmed draft.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row to insert into the ledger. Rows are derived by the gateway at
/// commit time and written in a single transaction; they are never mutated
/// afterwards by this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub entry_date: NaiveDate,
    pub description: String,
    pub account: String,
    pub category: String,
    pub cost_center: String,
    /// Fixed-point, two decimal places. Transfer legs are signed; the two
    /// legs of one transfer share a `reference` and sum to zero.
    pub value: Decimal,
    pub reference: Option<Uuid>,
}
