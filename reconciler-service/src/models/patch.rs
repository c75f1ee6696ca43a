//! Patch operations produced by the edit-interpretation capability.
//!
//! A patch set applies atomically: either every operation validates and
//! the draft is replaced, or the whole set is discarded.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reference to a classification item, by position or by description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemRef {
    Index(usize),
    Description(String),
}

impl ItemRef {
    pub fn label(&self) -> String {
        match self {
            Self::Index(i) => format!("#{}", i),
            Self::Description(d) => d.clone(),
        }
    }
}

/// Which account field of a draft an account change targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSlot {
    /// The single account of a classification or expense.
    Entry,
    Source,
    Destination,
}

/// One edit operation against the current draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    RenameCategory { item: ItemRef, category: String },
    AdjustValue { item: ItemRef, value: Decimal },
    AddItem {
        description: String,
        value: Decimal,
        category: String,
    },
    RemoveItem { item: ItemRef },
    ChangeAccount { slot: AccountSlot, account: String },
    ChangeDate { date: NaiveDate },
    SetDescription { description: Option<String> },
    /// Redistribute item values proportionally so they sum to the stated
    /// total, exact to two decimal places.
    SetTotal { value: Decimal },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_ops_deserialize_from_interpreter_json() {
        let raw = r#"[
            {"op": "rename_category", "item": "Arroz", "category": "casa"},
            {"op": "adjust_value", "item": 1, "value": "9.90"},
            {"op": "change_account", "slot": "source", "account": "Conta B"},
            {"op": "set_total", "value": "40.00"}
        ]"#;
        let ops: Vec<PatchOp> = serde_json::from_str(raw).unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(
            ops[0],
            PatchOp::RenameCategory {
                item: ItemRef::Description("Arroz".to_string()),
                category: "casa".to_string()
            }
        );
        assert!(matches!(
            ops[1],
            PatchOp::AdjustValue {
                item: ItemRef::Index(1),
                ..
            }
        ));
    }
}
