// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "buy",
            TransactionType::Sell => "sell",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "buy" => Some(TransactionType::Buy),
            "sell" => Some(TransactionType::Sell),
            _ => None,
        }
    }
}

/// Credentials looked up at login; balances are read separately.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hash: String,
}

/// One row of the `trans` ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub stock_symbol: String,
    pub shares: i64,
    pub price: Decimal,
    pub total: Decimal,
    pub trans_type: TransactionType,
    pub executed_at: DateTime<Utc>,
}

/// A ledger row that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: i64,
    pub stock_symbol: String,
    pub shares: i64,
    pub price: Decimal,
    pub total: Decimal,
    pub trans_type: TransactionType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    pub stock_symbol: String,
    pub shares: i64,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub stocks: Vec<Holding>,
    pub cash: Decimal,
    pub total: Decimal,
}
