// src/api.rs
use crate::auth::{self, clear_session_cookie, session_cookie, SessionKeys, UserContext};
use crate::db::Datastore;
use crate::error::{handle_rejection, AppError};
use crate::forms::{
    AddCashForm, BuyForm, CashAmount, LoginForm, QuoteForm, RegisterForm, SellForm, ShareCount,
};
use crate::models::Quote;
use crate::pages;
use crate::portfolio;
use crate::quote::QuoteSource;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA, SET_COOKIE};
use warp::http::Uri;
use warp::{Filter, Rejection, Reply};

const MAX_FORM_BYTES: u64 = 16 * 1024;

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Datastore>,
    pub quotes: Arc<dyn QuoteSource>,
    pub sessions: SessionKeys,
    pub starting_cash: Decimal,
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let user = auth::require_user(state.sessions.clone());

    let index = warp::path::end()
        .and(warp::get().or(warp::post()).unify())
        .and(with_state(state.clone()))
        .and(user.clone())
        .and_then(index_handler);

    let history = warp::path!("history")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(user.clone())
        .and_then(history_handler);

    let buy_page = warp::path!("buy")
        .and(warp::get())
        .and(user.clone())
        .map(|_: UserContext| warp::reply::html(pages::BUY));

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(user.clone())
        .and(form::<BuyForm>())
        .and_then(buy_handler);

    let sell_page = warp::path!("sell")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(user.clone())
        .and_then(sell_page_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(user.clone())
        .and(form::<SellForm>())
        .and_then(sell_handler);

    let quote_page = warp::path!("quote")
        .and(warp::get())
        .and(user.clone())
        .map(|_: UserContext| warp::reply::html(pages::QUOTE));

    let quote = warp::path!("quote")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(user.clone())
        .and(form::<QuoteForm>())
        .and_then(quote_handler);

    let add_cash_page = warp::path!("add_cash")
        .and(warp::get())
        .and(user.clone())
        .map(|_: UserContext| warp::reply::html(pages::ADD_CASH));

    let add_cash = warp::path!("add_cash")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(user)
        .and(form::<AddCashForm>())
        .and_then(add_cash_handler);

    let login_page = warp::path!("login").and(warp::get()).map(|| {
        warp::reply::with_header(
            warp::reply::html(pages::LOGIN),
            SET_COOKIE,
            clear_session_cookie(),
        )
    });

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(form::<LoginForm>())
        .and_then(login_handler);

    let logout = warp::path!("logout").and(warp::get()).map(|| {
        warp::reply::with_header(redirect_home(), SET_COOKIE, clear_session_cookie())
    });

    let register_page = warp::path!("register")
        .and(warp::get())
        .map(|| warp::reply::html(pages::REGISTER));

    let register = warp::path!("register")
        .and(warp::post())
        .and(with_state(state))
        .and(form::<RegisterForm>())
        .and_then(register_handler);

    let account = index.or(history).or(add_cash_page).or(add_cash);
    let trading = buy_page
        .or(buy)
        .or(sell_page)
        .or(sell)
        .or(quote_page)
        .or(quote);
    let session = login_page
        .or(login)
        .or(logout)
        .or(register_page)
        .or(register);

    account
        .or(trading)
        .or(session)
        .recover(handle_rejection)
        .with(warp::reply::with::headers(no_cache_headers()))
        .with(warp::log("stock_trader"))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn form<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_FORM_BYTES).and(warp::body::form())
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

fn redirect_home() -> impl Reply {
    warp::redirect::see_other(Uri::from_static("/"))
}

fn reject(action: &str, e: AppError) -> Rejection {
    if e.is_internal() {
        error!("Failed to {}: {}", action, e);
    } else {
        warn!("Refused to {}: {}", action, e);
    }
    warp::reject::custom(e)
}

async fn index_handler(state: AppState, user: UserContext) -> Result<impl Reply, Rejection> {
    let cash = state
        .store
        .cash(user.user_id)
        .await
        .map_err(|e| reject("load portfolio", e))?
        .unwrap_or(Decimal::ZERO);
    let ledger = state
        .store
        .transactions(user.user_id)
        .await
        .map_err(|e| reject("load portfolio", e))?;

    let summary =
        portfolio::summarize(cash, &ledger).map_err(|e| reject("load portfolio", e))?;
    Ok(warp::reply::json(&summary))
}

async fn history_handler(state: AppState, user: UserContext) -> Result<impl Reply, Rejection> {
    let ledger = state
        .store
        .transactions(user.user_id)
        .await
        .map_err(|e| reject("load history", e))?;
    Ok(warp::reply::json(&ledger))
}

async fn buy_handler(
    state: AppState,
    user: UserContext,
    form: BuyForm,
) -> Result<impl Reply, Rejection> {
    let shares = ShareCount::parse(&form.shares)
        .map_err(|_| reject("buy", AppError::forbidden("Invalid number of shares")))?;
    let quote = state
        .quotes
        .lookup(&form.stock_symbol)
        .await
        .ok_or_else(|| reject("buy", AppError::forbidden("Invalid symbol")))?;

    let entry =
        portfolio::buy_entry(user.user_id, &quote, shares).map_err(|e| reject("buy", e))?;
    let cash = state
        .store
        .buy(&entry)
        .await
        .map_err(|e| reject("buy", e))?;

    info!(
        "User {} bought {} {} at {}; cash now {}",
        user.user_id, entry.shares, entry.stock_symbol, entry.price, cash
    );
    Ok(redirect_home())
}

async fn sell_page_handler(state: AppState, user: UserContext) -> Result<impl Reply, Rejection> {
    let ledger = state
        .store
        .transactions(user.user_id)
        .await
        .map_err(|e| reject("list holdings", e))?;
    let held = portfolio::holdings(&ledger).map_err(|e| reject("list holdings", e))?;
    Ok(warp::reply::json(&held))
}

async fn sell_handler(
    state: AppState,
    user: UserContext,
    form: SellForm,
) -> Result<impl Reply, Rejection> {
    let shares = ShareCount::parse(&form.shares)
        .map_err(|_| reject("sell", AppError::forbidden("Invalid Shares")))?;
    let quote = state
        .quotes
        .lookup(&form.symbol)
        .await
        .ok_or_else(|| reject("sell", AppError::forbidden("Stock not found")))?;

    let entry =
        portfolio::sell_entry(user.user_id, &quote, shares).map_err(|e| reject("sell", e))?;
    let cash = state
        .store
        .sell(&entry)
        .await
        .map_err(|e| reject("sell", e))?;

    info!(
        "User {} sold {} {} at {}; cash now {}",
        user.user_id, -entry.shares, entry.stock_symbol, entry.price, cash
    );
    Ok(redirect_home())
}

async fn quote_handler(
    state: AppState,
    _user: UserContext,
    form: QuoteForm,
) -> Result<impl Reply, Rejection> {
    let quote = state
        .quotes
        .lookup(&form.stock_symbol)
        .await
        .ok_or_else(|| reject("quote", AppError::forbidden("Stock Symbol does not exist")))?;

    Ok(warp::reply::json(&Quote {
        symbol: quote.symbol,
        price: quote.price.round_dp(2),
    }))
}

async fn add_cash_handler(
    state: AppState,
    user: UserContext,
    form: AddCashForm,
) -> Result<impl Reply, Rejection> {
    let amount = CashAmount::parse(&form.cash)
        .map_err(|_| reject("add cash", AppError::forbidden("Invalid cash amount")))?;
    let cash = state
        .store
        .add_cash(user.user_id, amount.get())
        .await
        .map_err(|e| match e {
            AppError::AmountOutOfRange => {
                reject("add cash", AppError::forbidden("Invalid cash amount"))
            }
            e => reject("add cash", e),
        })?;

    info!("User {} added {}; cash now {}", user.user_id, amount.get(), cash);
    Ok(redirect_home())
}

async fn authenticate(state: &AppState, form: &LoginForm) -> Result<String, AppError> {
    if form.username.is_empty() {
        return Err(AppError::forbidden("must provide username"));
    }
    if form.password.is_empty() {
        return Err(AppError::forbidden("must provide password"));
    }

    match state.store.find_user_by_username(&form.username).await? {
        Some(user) if auth::verify_password(&user.hash, &form.password) => {
            info!("User {} ({}) logged in.", user.username, user.id);
            state.sessions.issue(user.id)
        }
        _ => Err(AppError::forbidden("invalid username and/or password")),
    }
}

/// Every login response resets the session cookie, whether or not it issues a new one.
async fn login_handler(state: AppState, form: LoginForm) -> Result<impl Reply, Rejection> {
    let reply = match authenticate(&state, &form).await {
        Ok(token) => {
            warp::reply::with_header(redirect_home(), SET_COOKIE, session_cookie(&token))
                .into_response()
        }
        Err(e) => {
            if e.is_internal() {
                error!("Failed to log in: {}", e);
            } else {
                warn!("Refused to log in: {}", e);
            }
            warp::reply::with_header(e.into_reply(), SET_COOKIE, clear_session_cookie())
                .into_response()
        }
    };
    Ok(reply)
}

async fn register_handler(state: AppState, form: RegisterForm) -> Result<impl Reply, Rejection> {
    if form.username.is_empty() {
        return Err(reject(
            "register",
            AppError::bad_request("must provide username"),
        ));
    }
    if form.password.is_empty() {
        return Err(reject(
            "register",
            AppError::bad_request("must provide password"),
        ));
    }

    let existing = state
        .store
        .find_user_by_username(&form.username)
        .await
        .map_err(|e| reject("register", e))?;
    if existing.is_some() {
        return Err(reject("register", AppError::UsernameTaken));
    }
    if form.password != form.confirmation {
        return Err(reject(
            "register",
            AppError::bad_request("Passwords do not match"),
        ));
    }

    let hash = auth::hash_password(&form.password).map_err(|e| reject("register", e))?;
    let user_id = state
        .store
        .create_user(&form.username, &hash, state.starting_cash)
        .await
        .map_err(|e| reject("register", e))?;
    let token = state
        .sessions
        .issue(user_id)
        .map_err(|e| reject("register", e))?;

    info!("Registered user {} ({}).", form.username, user_id);
    Ok(warp::reply::with_header(
        redirect_home(),
        SET_COOKIE,
        session_cookie(&token),
    ))
}
