// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip)]
    pub hash: String,
    pub cash: Decimal,
    pub assets: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortfolioEntry {
    pub username: String,
    pub symbol: String,
    pub shares: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Buy,
    Sell,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Buy => write!(f, "BUY"),
            Operation::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Operation {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Operation::Buy),
            "SELL" => Ok(Operation::Sell),
            _ => Err(format!("Unknown operation: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub username: String,
    pub operation: Operation,
    pub symbol: String,
    pub price: Decimal,
    pub shares: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
}

/// Outcome of asking the price source about a symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Quote),
    NotFound,
}

/// What a committed trade did to the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub record: HistoryRecord,
    pub cash_after: Decimal,
    pub shares_after: i64,
}

/// A history row paired with the company name shown next to it.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryLine {
    pub record: HistoryRecord,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub shares: i64,
    pub price: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub holdings: Vec<Holding>,
    pub cash: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub username: String,
    pub cash: Decimal,
    pub assets: Decimal,
}

// Form bodies. Every field is optional so an absent field becomes a
// MissingField or MissingCredential apology instead of a body
// deserialization rejection.

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    pub username: Option<String>,
    pub password: Option<String>,
    pub confirmation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TradeForm {
    pub symbol: Option<String>,
    pub shares: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteForm {
    pub symbol: Option<String>,
}
