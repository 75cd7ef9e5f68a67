// src/error.rs
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid symbol")]
    InvalidSymbol,

    #[error("invalid shares")]
    InvalidQuantity,

    #[error("can't afford")]
    InsufficientFunds,

    #[error("username already exists")]
    DuplicateUsername,

    #[error("invalid username and/or password")]
    BadCredentials,

    #[error("must provide {0}")]
    MissingField(&'static str),

    #[error("must provide {0}")]
    MissingCredential(&'static str),

    #[error("passwords should match")]
    PasswordMismatch,

    #[error("login required")]
    Unauthorized,

    #[error("user not found: {0}")]
    UserNotFound(i64),

    #[error("quote service error: {0}")]
    Quote(String),

    #[error("amount out of range")]
    Overflow,

    #[error("database error: {0}")]
    Database(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidSymbol
            | AppError::InvalidQuantity
            | AppError::InsufficientFunds
            | AppError::MissingField(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateUsername
            | AppError::BadCredentials
            | AppError::MissingCredential(_)
            | AppError::PasswordMismatch => StatusCode::FORBIDDEN,
            AppError::Unauthorized | AppError::UserNotFound(_) => StatusCode::SEE_OTHER,
            AppError::Quote(_) => StatusCode::BAD_GATEWAY,
            AppError::Overflow
            | AppError::Database(_)
            | AppError::Session(_)
            | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors that mean the session no longer identifies a usable account.
    pub fn requires_login(&self) -> bool {
        matches!(self, AppError::Unauthorized | AppError::UserNotFound(_))
    }
}

impl Reject for AppError {}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_errors_are_bad_requests() {
        assert_eq!(AppError::InvalidSymbol.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidQuantity.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InsufficientFunds.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_account_errors_are_forbidden() {
        assert_eq!(AppError::BadCredentials.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::DuplicateUsername.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::MissingCredential("password").status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::MissingField("shares").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::BadCredentials.to_string(), "invalid username and/or password");
    }

    #[test]
    fn test_missing_field_message() {
        assert_eq!(
            AppError::MissingField("username").to_string(),
            "must provide username"
        );
        assert!(AppError::UserNotFound(3).requires_login());
        assert!(!AppError::InvalidSymbol.requires_login());
    }
}
