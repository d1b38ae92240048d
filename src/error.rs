// src/error.rs
use crate::auth::Unauthenticated;
use log::error;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::{StatusCode, Uri};
use warp::reject::Reject;
use warp::{Rejection, Reply};

#[derive(Debug, Error)]
pub enum AppError {
    /// A validation failure shown to the user as-is.
    #[error("{message}")]
    Apology { status: StatusCode, message: String },

    #[error("username already exists")]
    UsernameTaken,

    #[error("User not found")]
    UserNotFound,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("You don't own that many shares")]
    InsufficientShares,

    #[error("amount out of range")]
    AmountOutOfRange,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("session token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::Apology {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Apology {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Apology { status, .. } => *status,
            AppError::UsernameTaken => StatusCode::BAD_REQUEST,
            // Infrastructure failures share the trading apology status.
            _ => StatusCode::FORBIDDEN,
        }
    }

    /// True for failures the user cannot fix by changing their input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Hash(_) | AppError::Token(_)
        )
    }

    pub fn into_reply(self) -> warp::reply::Response {
        apology(self.status(), self.to_string())
    }
}

impl Reject for AppError {}

#[derive(Serialize)]
struct ApologyBody {
    code: u16,
    message: String,
}

/// The error page: a message plus the status code it was sent with.
pub fn apology(status: StatusCode, message: impl Into<String>) -> warp::reply::Response {
    let body = ApologyBody {
        code: status.as_u16(),
        message: message.into(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if err.find::<Unauthenticated>().is_some() {
        return Ok(warp::redirect::see_other(Uri::from_static("/login")).into_response());
    }

    if let Some(app_error) = err.find::<AppError>() {
        return Ok(apology(app_error.status(), app_error.to_string()));
    }

    if err.is_not_found() {
        return Ok(apology(StatusCode::NOT_FOUND, "Not Found"));
    }

    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(apology(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"));
    }

    if err.find::<warp::body::BodyDeserializeError>().is_some()
        || err.find::<warp::reject::UnsupportedMediaType>().is_some()
        || err.find::<warp::reject::PayloadTooLarge>().is_some()
    {
        return Ok(apology(StatusCode::BAD_REQUEST, "Malformed form submission"));
    }

    error!("Unhandled rejection: {:?}", err);
    Ok(apology(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error",
    ))
}
