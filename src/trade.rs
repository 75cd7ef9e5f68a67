// src/trade.rs
use crate::db::Ledger;
use crate::error::AppError;
use crate::models::{
    Execution, HistoryLine, Holding, LeaderboardEntry, Lookup, PortfolioSummary, Quote,
};
use crate::quote::QuoteProvider;
use log::{info, warn};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_SYMBOL_LEN: usize = 10;

/// Applies buys and sells to the ledger at current prices and values
/// portfolios for the index page and the leaderboard.
pub struct TradeEngine {
    ledger: Arc<Ledger>,
    quotes: Arc<dyn QuoteProvider>,
}

impl TradeEngine {
    pub fn new(ledger: Arc<Ledger>, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { ledger, quotes }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn quote(&self, symbol: &str) -> Result<Quote, AppError> {
        let symbol = normalize_symbol(symbol)?;
        match self.quotes.lookup(&symbol).await? {
            Lookup::Found(quote) => Ok(quote),
            Lookup::NotFound => Err(AppError::InvalidSymbol),
        }
    }

    pub async fn buy(&self, user_id: i64, symbol: &str, shares: i64) -> Result<Execution, AppError> {
        if shares < 1 {
            return Err(AppError::InvalidQuantity);
        }
        let quote = self.quote(symbol).await?;
        let execution = self
            .ledger
            .execute_buy(user_id, &quote.symbol, quote.price, shares)?;
        info!(
            "{} bought {} x {} at {}",
            execution.record.username, shares, quote.symbol, quote.price
        );
        Ok(execution)
    }

    pub async fn sell(&self, user_id: i64, symbol: &str, shares: i64) -> Result<Execution, AppError> {
        if shares < 1 {
            return Err(AppError::InvalidQuantity);
        }
        let quote = self.quote(symbol).await?;
        let execution = self
            .ledger
            .execute_sell(user_id, &quote.symbol, quote.price, shares)?;
        info!(
            "{} sold {} x {} at {}",
            execution.record.username, shares, quote.symbol, quote.price
        );
        Ok(execution)
    }

    /// The user's trades, oldest first, each with its company name. Every
    /// distinct symbol is looked up once; the symbol stands in for the name
    /// when the lookup fails.
    pub async fn history(&self, user_id: i64) -> Result<Vec<HistoryLine>, AppError> {
        let user = self.ledger.get_user(user_id)?;
        let records = self.ledger.history(&user.username)?;

        let mut names: HashMap<String, String> = HashMap::new();
        let mut lines = Vec::with_capacity(records.len());
        for record in records {
            let name = match names.get(&record.symbol) {
                Some(name) => name.clone(),
                None => {
                    let name = match self.quotes.lookup(&record.symbol).await {
                        Ok(Lookup::Found(q)) => q.name,
                        Ok(Lookup::NotFound) => record.symbol.clone(),
                        Err(e) => {
                            warn!("No name for {}: {}", record.symbol, e);
                            record.symbol.clone()
                        }
                    };
                    names.insert(record.symbol.clone(), name.clone());
                    name
                }
            };
            lines.push(HistoryLine { record, name });
        }
        Ok(lines)
    }

    /// Symbols the user currently holds, for the sell form.
    pub fn owned_symbols(&self, user_id: i64) -> Result<Vec<String>, AppError> {
        let user = self.ledger.get_user(user_id)?;
        Ok(self
            .ledger
            .portfolio(&user.username)?
            .into_iter()
            .map(|entry| entry.symbol)
            .collect())
    }

    /// Values every holding at the current price and refreshes the user's
    /// cached assets total.
    pub async fn portfolio(&self, user_id: i64) -> Result<PortfolioSummary, AppError> {
        let user = self.ledger.get_user(user_id)?;
        let mut holdings = Vec::new();
        let mut total = user.cash;

        for entry in self.ledger.portfolio(&user.username)? {
            let (name, price) = match self.quotes.lookup(&entry.symbol).await? {
                Lookup::Found(q) => (q.name, q.price),
                Lookup::NotFound => {
                    warn!("No price for held symbol {}, valuing at zero", entry.symbol);
                    (entry.symbol.clone(), Decimal::ZERO)
                }
            };
            let value = position_value(price, entry.shares)?;
            total = total.checked_add(value).ok_or(AppError::Overflow)?;
            holdings.push(Holding {
                symbol: entry.symbol,
                name,
                shares: entry.shares,
                price,
                total: value,
            });
        }

        self.ledger.update_assets(&user.username, total)?;
        Ok(PortfolioSummary {
            holdings,
            cash: user.cash,
            total,
        })
    }

    /// Recomputes and stores every user's total assets, then ranks them.
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, AppError> {
        let mut prices: HashMap<String, Decimal> = HashMap::new();

        for user in self.ledger.list_users()? {
            let mut assets = user.cash;
            for entry in self.ledger.portfolio(&user.username)? {
                let price = match prices.get(&entry.symbol) {
                    Some(price) => *price,
                    None => {
                        let price = match self.quotes.lookup(&entry.symbol).await? {
                            Lookup::Found(q) => q.price,
                            Lookup::NotFound => {
                                warn!("No price for {}, valuing at zero", entry.symbol);
                                Decimal::ZERO
                            }
                        };
                        prices.insert(entry.symbol.clone(), price);
                        price
                    }
                };
                assets = assets
                    .checked_add(position_value(price, entry.shares)?)
                    .ok_or(AppError::Overflow)?;
            }
            self.ledger.update_assets(&user.username, assets)?;
        }

        info!("Leaderboard refreshed with {} priced symbols", prices.len());
        self.ledger.leaderboard()
    }
}

fn position_value(price: Decimal, shares: i64) -> Result<Decimal, AppError> {
    price
        .checked_mul(Decimal::from(shares))
        .ok_or(AppError::Overflow)
}

/// Trims and upper-cases a ticker, rejecting anything that cannot be one.
pub fn normalize_symbol(raw: &str) -> Result<String, AppError> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(AppError::MissingField("symbol"));
    }
    if symbol.len() > MAX_SYMBOL_LEN
        || !symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(AppError::InvalidSymbol);
    }
    Ok(symbol)
}

/// Parses the `shares` form field into a positive whole number.
pub fn parse_shares(raw: Option<&str>) -> Result<i64, AppError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(AppError::MissingField("shares"));
    }
    match raw.parse::<i64>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(AppError::InvalidQuantity),
    }
}
