// src/quote.rs
use crate::error::AppError;
use crate::models::{Lookup, Quote};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;

pub const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

/// Source of current share prices.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Current quote for an already normalised symbol.
    async fn lookup(&self, symbol: &str) -> Result<Lookup, AppError>;
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
}

#[derive(Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
}

/// Alpha Vantage quote client: `GLOBAL_QUOTE` for the price, `SYMBOL_SEARCH`
/// for the company name.
pub struct AlphaVantage {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantage {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_key,
            base_url,
        }
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        params: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("function", function), ("apikey", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::Quote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Quote(format!(
                "{function} returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Quote(format!("Failed to parse {function} response: {e}")))
    }

    async fn company_name(&self, symbol: &str) -> Result<Option<String>, AppError> {
        let response: SymbolSearchResponse =
            self.query("SYMBOL_SEARCH", &[("keywords", symbol)]).await?;
        Ok(best_name(response, symbol))
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantage {
    fn name(&self) -> &str {
        "alpha_vantage"
    }

    async fn lookup(&self, symbol: &str) -> Result<Lookup, AppError> {
        let response: GlobalQuoteResponse =
            self.query("GLOBAL_QUOTE", &[("symbol", symbol)]).await?;
        let (symbol, price) = match parse_global_quote(response)? {
            Some(found) => found,
            None => {
                info!("No quote for {}", symbol);
                return Ok(Lookup::NotFound);
            }
        };

        let name = match self.company_name(&symbol).await {
            Ok(Some(name)) => name,
            Ok(None) => symbol.clone(),
            Err(e) => {
                warn!("Name lookup for {} failed: {}", symbol, e);
                symbol.clone()
            }
        };

        Ok(Lookup::Found(Quote {
            symbol,
            name,
            price,
        }))
    }
}

fn parse_global_quote(response: GlobalQuoteResponse) -> Result<Option<(String, Decimal)>, AppError> {
    if let Some(note) = response.note.or(response.information) {
        return Err(AppError::Quote(note));
    }
    if response.error_message.is_some() {
        return Ok(None);
    }
    let quote = match response.global_quote {
        Some(q) => q,
        None => return Ok(None),
    };
    match (quote.symbol, quote.price) {
        (Some(symbol), Some(price)) => {
            let price = Decimal::from_str(price.trim())
                .map_err(|e| AppError::Quote(format!("Bad price '{price}': {e}")))?;
            if price <= Decimal::ZERO {
                warn!("Ignoring non-positive price {} for {}", price, symbol);
                return Ok(None);
            }
            Ok(Some((symbol.to_uppercase(), price)))
        }
        _ => Ok(None),
    }
}

fn best_name(response: SymbolSearchResponse, symbol: &str) -> Option<String> {
    response
        .best_matches
        .into_iter()
        .find(|m| m.symbol.eq_ignore_ascii_case(symbol))
        .map(|m| m.name)
}

/// In-memory price table. Symbols not in the table are reported as not found.
#[derive(Default)]
pub struct FixedQuotes {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl FixedQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, symbol: &str, name: &str, price: Decimal) -> Self {
        self.set(symbol, name, price);
        self
    }

    pub fn set(&self, symbol: &str, name: &str, price: Decimal) {
        let symbol = symbol.to_uppercase();
        if let Ok(mut quotes) = self.quotes.write() {
            quotes.insert(
                symbol.clone(),
                Quote {
                    symbol,
                    name: name.to_string(),
                    price,
                },
            );
        }
    }

    pub fn remove(&self, symbol: &str) {
        if let Ok(mut quotes) = self.quotes.write() {
            quotes.remove(&symbol.to_uppercase());
        }
    }
}

#[async_trait]
impl QuoteProvider for FixedQuotes {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn lookup(&self, symbol: &str) -> Result<Lookup, AppError> {
        let quotes = self
            .quotes
            .read()
            .map_err(|e| AppError::Quote(e.to_string()))?;
        Ok(match quotes.get(&symbol.to_uppercase()) {
            Some(q) => Lookup::Found(q.clone()),
            None => Lookup::NotFound,
        })
    }
}
