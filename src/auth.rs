// src/auth.rs
use crate::db::Ledger;
use crate::error::AppError;
use crate::models::{LoginForm, RegisterForm, User};
use argon2::{
    password_hash::{Error as PasswordHashError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use rand::rngs::OsRng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: usize,
    exp: usize,
}

/// Issues and checks the signed token stored in the session cookie.
pub struct Sessions {
    secret: Vec<u8>,
    ttl: Duration,
}

impl Sessions {
    pub fn new(secret: Vec<u8>, ttl: Duration) -> Self {
        Self { secret, ttl }
    }

    pub fn issue(&self, user_id: i64) -> Result<String, AppError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AppError::Session("System clock is before UNIX_EPOCH".into()))?;
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.as_secs() as usize,
            exp: (now + self.ttl).as_secs() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| AppError::Session(format!("Failed to sign token: {e}")))
    }

    /// Returns the user id carried by a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Result<i64, AppError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        )
        .map_err(|e| {
            if !matches!(e.kind(), ErrorKind::ExpiredSignature) {
                warn!("Rejected session token: {}", e);
            }
            AppError::Unauthorized
        })?;
        data.claims
            .sub
            .parse()
            .map_err(|_| AppError::Unauthorized)
    }

    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{SESSION_COOKIE}={token}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
            self.ttl.as_secs()
        )
    }

    pub fn clear_cookie() -> String {
        format!("{SESSION_COOKIE}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0")
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Session(format!("Failed to hash password: {e}")))
}

pub fn verify_password(hash: &str, candidate: &str) -> Result<(), AppError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Database(format!("Stored password hash is invalid: {e}")))?;
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .map_err(|err| match err {
            PasswordHashError::Password => AppError::BadCredentials,
            other => AppError::Session(format!("Password verification failed: {other}")),
        })
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, AppError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::MissingCredential(field)),
    }
}

/// Creates an account credited with `starting_cash`.
pub fn register(ledger: &Ledger, form: &RegisterForm, starting_cash: Decimal) -> Result<User, AppError> {
    let username = required(&form.username, "username")?.trim();
    if username.is_empty() {
        return Err(AppError::MissingCredential("username"));
    }
    let password = required(&form.password, "password")?;
    let confirmation = required(&form.confirmation, "password")?;
    if password != confirmation {
        return Err(AppError::PasswordMismatch);
    }
    if ledger.find_user_by_username(username)?.is_some() {
        return Err(AppError::DuplicateUsername);
    }

    let hash = hash_password(password)?;
    let user = ledger.create_user(username, &hash, starting_cash)?;
    info!("Registered user {} (id {})", user.username, user.id);
    Ok(user)
}

pub fn login(ledger: &Ledger, form: &LoginForm) -> Result<User, AppError> {
    let username = required(&form.username, "username")?.trim();
    let password = required(&form.password, "password")?;

    let user = ledger
        .find_user_by_username(username)?
        .ok_or(AppError::BadCredentials)?;
    verify_password(&user.hash, password)?;
    Ok(user)
}
