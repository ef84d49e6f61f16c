use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use crate::schema::credit_transactions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Deduction,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Deduction => "deduction",
            TransactionType::Refund => "refund",
        }
    }

    /// Contribution of `amount` credits of this type to a balance.
    pub fn signed(&self, amount: i32) -> i64 {
        match self {
            TransactionType::Purchase | TransactionType::Refund => amount as i64,
            TransactionType::Deduction => -(amount as i64),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TransactionType::Purchase),
            "deduction" => Ok(TransactionType::Deduction),
            "refund" => Ok(TransactionType::Refund),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = credit_transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CreditTransaction {
    pub id: i32,
    pub user_id: i32,
    pub transaction_type: String,
    pub credits_amount: i32, // always non-negative, the type carries the sign
    pub stripe_payment_id: Option<String>,
    pub campaign_id: Option<i32>,
    pub description: Option<String>,
    pub created_at: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = credit_transactions)]
pub struct NewCreditTransaction {
    pub user_id: i32,
    pub transaction_type: String,
    pub credits_amount: i32,
    pub stripe_payment_id: Option<String>,
    pub campaign_id: Option<i32>,
    pub description: Option<String>,
    pub created_at: i32,
}

/// Sums a sequence of `(type, amount)` rows into a balance.
/// Rows with an unrecognised type are skipped.
pub fn ledger_balance<'a, I>(rows: I) -> i64
where
    I: IntoIterator<Item = (&'a str, i32)>,
{
    rows.into_iter()
        .filter_map(|(kind, amount)| kind.parse::<TransactionType>().ok().map(|t| t.signed(amount)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_is_signed_sum() {
        let rows = [
            ("purchase", 500),
            ("deduction", 120),
            ("refund", 20),
            ("purchase", 100),
            ("deduction", 300),
        ];
        assert_eq!(ledger_balance(rows), 500 - 120 + 20 + 100 - 300);
    }

    #[test]
    fn empty_ledger_is_zero() {
        assert_eq!(ledger_balance(Vec::<(&str, i32)>::new()), 0);
    }

    #[test]
    fn balance_can_be_reported_negative() {
        assert_eq!(ledger_balance([("deduction", 10)]), -10);
    }

    #[test]
    fn unknown_rows_are_ignored() {
        assert_eq!(ledger_balance([("purchase", 10), ("bonus", 99)]), 10);
    }
}
