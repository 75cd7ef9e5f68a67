// src/config.rs
use crate::error::AppError;
use crate::quote::ALPHA_VANTAGE_URL;
use log::warn;
use rand::{rngs::OsRng, RngCore};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    pub api_key: String,
    pub quote_api_url: String,
    pub session_secret: Vec<u8>,
    pub session_ttl: Duration,
    pub starting_cash: Decimal,
}

impl Config {
    /// Reads settings from the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Config("API_KEY not set".into()))?;

        let listen_addr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:5000".into())
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("Invalid LISTEN_ADDR: {e}")))?;

        let db_path = lookup("DATABASE_PATH").unwrap_or_else(|| "finance.db".into());
        let quote_api_url = lookup("QUOTE_API_URL").unwrap_or_else(|| ALPHA_VANTAGE_URL.into());

        let session_secret = match lookup("SESSION_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret.into_bytes(),
            None => {
                warn!("SESSION_SECRET not set; sessions will not survive a restart");
                let mut bytes = vec![0u8; 32];
                OsRng.fill_bytes(&mut bytes);
                bytes
            }
        };

        let ttl_hours: u64 = lookup("SESSION_TTL_HOURS")
            .unwrap_or_else(|| "24".into())
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid SESSION_TTL_HOURS: {e}")))?;

        let starting_cash = Decimal::from_str(
            &lookup("STARTING_CASH").unwrap_or_else(|| "10000.00".into()),
        )
        .map_err(|e| AppError::Config(format!("Invalid STARTING_CASH: {e}")))?;
        if starting_cash.is_sign_negative() {
            return Err(AppError::Config("STARTING_CASH must not be negative".into()));
        }

        Ok(Self {
            listen_addr,
            db_path,
            api_key,
            quote_api_url,
            session_secret,
            session_ttl: Duration::from_secs(ttl_hours * 3600),
            starting_cash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, AppError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_api_key_required() {
        assert!(matches!(config_from(&[]), Err(AppError::Config(_))));
        assert!(matches!(
            config_from(&[("API_KEY", "  ")]),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("API_KEY", "demo")]).unwrap();
        assert_eq!(config.listen_addr.port(), 5000);
        assert_eq!(config.db_path, "finance.db");
        assert_eq!(config.quote_api_url, ALPHA_VANTAGE_URL);
        assert_eq!(config.session_secret.len(), 32);
        assert_eq!(config.session_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(config.starting_cash, Decimal::from(10000));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config_from(&[
            ("API_KEY", "demo"),
            ("SESSION_SECRET", "s3cret"),
            ("STARTING_CASH", "2500.50"),
            ("LISTEN_ADDR", "0.0.0.0:8080"),
        ])
        .unwrap();
        assert_eq!(config.session_secret, b"s3cret".to_vec());
        assert_eq!(config.starting_cash, Decimal::from_str("2500.50").unwrap());
        assert_eq!(config.listen_addr.port(), 8080);

        assert!(config_from(&[("API_KEY", "demo"), ("STARTING_CASH", "-1")]).is_err());
        assert!(config_from(&[("API_KEY", "demo"), ("LISTEN_ADDR", "nowhere")]).is_err());
    }
}
