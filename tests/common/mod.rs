//! Shared test helpers.
#![allow(dead_code)]

use finance::api::AppState;
use finance::auth::Sessions;
use finance::db::Ledger;
use finance::quote::FixedQuotes;
use finance::trade::TradeEngine;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const SECRET: &[u8] = b"test-secret-test-secret-test-sec";

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn quotes() -> Arc<FixedQuotes> {
    Arc::new(
        FixedQuotes::new()
            .with("AAPL", "Apple Inc.", dec("50"))
            .with("MSFT", "Microsoft Corporation", dec("300.25"))
            .with("NFLX", "Netflix, Inc.", dec("12.10")),
    )
}

pub fn setup() -> (TradeEngine, Arc<Ledger>, Arc<FixedQuotes>) {
    let ledger = Arc::new(Ledger::in_memory().unwrap());
    let quotes = quotes();
    let engine = TradeEngine::new(ledger.clone(), quotes.clone());
    (engine, ledger, quotes)
}

pub fn app_state() -> (Arc<AppState>, Arc<FixedQuotes>) {
    let ledger = Arc::new(Ledger::in_memory().unwrap());
    let quotes = quotes();
    let state = AppState::new(
        ledger,
        quotes.clone(),
        Sessions::new(SECRET.to_vec(), Duration::from_secs(3600)),
        dec("10000"),
    );
    (Arc::new(state), quotes)
}
