// src/lib.rs
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod quote;
pub mod trade;
pub mod views;

use crate::api::AppState;
use crate::auth::Sessions;
use crate::config::Config;
use crate::db::Ledger;
use crate::error::AppError;
use crate::quote::{AlphaVantage, QuoteProvider};
use log::info;
use std::sync::Arc;

/// Opens the ledger and wires the Alpha Vantage client into shared state.
pub fn build_state(config: &Config) -> Result<Arc<AppState>, AppError> {
    let ledger = Arc::new(Ledger::open(&config.db_path)?);
    let quotes: Arc<dyn QuoteProvider> = Arc::new(AlphaVantage::new(
        config.api_key.clone(),
        config.quote_api_url.clone(),
    ));
    info!("Using {} for quotes", quotes.name());

    Ok(Arc::new(AppState::new(
        ledger,
        quotes,
        Sessions::new(config.session_secret.clone(), config.session_ttl),
        config.starting_cash,
    )))
}
