// src/api.rs
use crate::auth::{self, Sessions, SESSION_COOKIE};
use crate::db::Ledger;
use crate::error::AppError;
use crate::models::{LoginForm, QuoteForm, RegisterForm, TradeForm};
use crate::quote::QuoteProvider;
use crate::trade::{normalize_symbol, parse_shares, TradeEngine};
use crate::views;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA, SET_COOKIE};
use warp::http::{StatusCode, Uri};
use warp::{Filter, Rejection, Reply};

const FORM_LIMIT: u64 = 16 * 1024;

/// Everything a request handler needs, shared across requests.
pub struct AppState {
    pub engine: TradeEngine,
    pub sessions: Sessions,
    pub starting_cash: Decimal,
}

impl AppState {
    pub fn new(
        ledger: Arc<Ledger>,
        quotes: Arc<dyn QuoteProvider>,
        sessions: Sessions,
        starting_cash: Decimal,
    ) -> Self {
        Self {
            engine: TradeEngine::new(ledger, quotes),
            sessions,
            starting_cash,
        }
    }

    fn ledger(&self) -> &Ledger {
        self.engine.ledger()
    }
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(index_handler);

    let login_page = warp::path!("login").and(warp::get()).map(|| {
        warp::reply::with_header(
            warp::reply::html(views::login()),
            SET_COOKIE,
            Sessions::clear_cookie(),
        )
    });

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(form::<LoginForm>())
        .and_then(login_handler);

    let logout = warp::path!("logout").and(warp::get()).map(|| {
        warp::reply::with_header(see_other("/"), SET_COOKIE, Sessions::clear_cookie())
    });

    let register_page = warp::path!("register")
        .and(warp::get())
        .map(|| warp::reply::html(views::register()));

    let register = warp::path!("register")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(form::<RegisterForm>())
        .and_then(register_handler);

    let buy_page = warp::path!("buy")
        .and(warp::get())
        .and(with_user(state.clone()))
        .map(|_user_id: i64| warp::reply::html(views::buy_form()));

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<TradeForm>())
        .and_then(buy_handler);

    let sell_page = warp::path!("sell")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(sell_page_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<TradeForm>())
        .and_then(sell_handler);

    let quote_page = warp::path!("quote")
        .and(warp::get())
        .and(with_user(state.clone()))
        .map(|_user_id: i64| warp::reply::html(views::quote_form()));

    let quote = warp::path!("quote")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<QuoteForm>())
        .and_then(quote_handler);

    let history = warp::path!("history")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(history_handler);

    let leaderboard = warp::path!("leaderboard")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state))
        .and_then(leaderboard_handler);

    index
        .or(login_page)
        .or(login)
        .or(logout)
        .or(register_page)
        .or(register)
        .or(buy_page)
        .or(buy)
        .or(sell_page)
        .or(sell)
        .or(quote_page)
        .or(quote)
        .or(history)
        .or(leaderboard)
        .recover(handle_rejection)
        .with(warp::reply::with::headers(no_cache_headers()))
        .with(warp::log("finance"))
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Extracts the user id from the session cookie, rejecting with
/// `Unauthorized` when the cookie is missing or invalid.
fn with_user(state: Arc<AppState>) -> impl Filter<Extract = (i64,), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE)
        .and(with_state(state))
        .and_then(|token: Option<String>, state: Arc<AppState>| async move {
            match token {
                Some(token) => state.sessions.verify(&token).map_err(warp::reject::custom),
                None => Err(warp::reject::custom(AppError::Unauthorized)),
            }
        })
}

fn form<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(FORM_LIMIT).and(warp::body::form())
}

fn see_other(location: &'static str) -> impl Reply {
    warp::redirect::see_other(Uri::from_static(location))
}

fn reject(e: AppError) -> Rejection {
    warp::reject::custom(e)
}

async fn index_handler(user_id: i64, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let user = state.ledger().get_user(user_id).map_err(reject)?;
    let summary = state.engine.portfolio(user_id).await.map_err(reject)?;
    Ok(warp::reply::html(views::index(&user.username, &summary)))
}

async fn login_handler(state: Arc<AppState>, form: LoginForm) -> Result<impl Reply, Rejection> {
    let user = auth::login(state.ledger(), &form).map_err(reject)?;
    let token = state.sessions.issue(user.id).map_err(reject)?;
    info!("User {} logged in", user.username);
    Ok(warp::reply::with_header(
        see_other("/"),
        SET_COOKIE,
        state.sessions.cookie(&token),
    ))
}

async fn register_handler(
    state: Arc<AppState>,
    form: RegisterForm,
) -> Result<impl Reply, Rejection> {
    let user = auth::register(state.ledger(), &form, state.starting_cash).map_err(reject)?;
    let token = state.sessions.issue(user.id).map_err(reject)?;
    Ok(warp::reply::with_header(
        see_other("/"),
        SET_COOKIE,
        state.sessions.cookie(&token),
    ))
}

async fn buy_handler(
    user_id: i64,
    state: Arc<AppState>,
    form: TradeForm,
) -> Result<impl Reply, Rejection> {
    let symbol = normalize_symbol(form.symbol.as_deref().unwrap_or_default()).map_err(reject)?;
    let shares = parse_shares(form.shares.as_deref()).map_err(reject)?;
    state
        .engine
        .buy(user_id, &symbol, shares)
        .await
        .map_err(reject)?;
    Ok(see_other("/"))
}

async fn sell_page_handler(user_id: i64, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let symbols = state.engine.owned_symbols(user_id).map_err(reject)?;
    Ok(warp::reply::html(views::sell_form(&symbols)))
}

async fn sell_handler(
    user_id: i64,
    state: Arc<AppState>,
    form: TradeForm,
) -> Result<impl Reply, Rejection> {
    let symbol = normalize_symbol(form.symbol.as_deref().unwrap_or_default()).map_err(reject)?;
    let shares = parse_shares(form.shares.as_deref()).map_err(reject)?;
    state
        .engine
        .sell(user_id, &symbol, shares)
        .await
        .map_err(reject)?;
    Ok(see_other("/"))
}

async fn quote_handler(
    _user_id: i64,
    state: Arc<AppState>,
    form: QuoteForm,
) -> Result<impl Reply, Rejection> {
    let quote = state
        .engine
        .quote(form.symbol.as_deref().unwrap_or_default())
        .await
        .map_err(reject)?;
    Ok(warp::reply::html(views::quoted(&quote)))
}

async fn history_handler(user_id: i64, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let lines = state.engine.history(user_id).await.map_err(reject)?;
    Ok(warp::reply::html(views::history(&lines)))
}

async fn leaderboard_handler(_user_id: i64, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let entries = state.engine.leaderboard().await.map_err(reject)?;
    Ok(warp::reply::html(views::leaderboard(&entries)))
}

fn apology(status: StatusCode, message: &str) -> Box<dyn Reply> {
    Box::new(warp::reply::with_status(
        warp::reply::html(views::apology(message, status.as_u16())),
        status,
    ))
}

/// Turns every rejection into an apology page, or a trip to the login form
/// when the session is missing.
pub async fn handle_rejection(err: Rejection) -> Result<Box<dyn Reply>, Infallible> {
    if let Some(e) = err.find::<AppError>() {
        if e.requires_login() {
            return Ok(Box::new(warp::reply::with_header(
                see_other("/login"),
                SET_COOKIE,
                Sessions::clear_cookie(),
            )));
        }
        let status = e.status();
        if status.is_server_error() {
            error!("Request failed: {}", e);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), e);
        }
        return Ok(apology(status, &e.to_string()));
    }

    if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        warn!("Malformed form body: {}", e);
        return Ok(apology(StatusCode::BAD_REQUEST, "malformed form"));
    }
    if err.find::<warp::reject::LengthRequired>().is_some() {
        return Ok(apology(StatusCode::BAD_REQUEST, "missing form body"));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(apology(StatusCode::PAYLOAD_TOO_LARGE, "form too large"));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(apology(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
    }
    if err.is_not_found() {
        return Ok(apology(StatusCode::NOT_FOUND, "not found"));
    }

    error!("Unhandled rejection: {:?}", err);
    Ok(apology(StatusCode::INTERNAL_SERVER_ERROR, "internal server error"))
}

fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}
