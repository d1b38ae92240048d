// src/auth.rs
use crate::error::AppError;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::{Filter, Rejection};

pub const SESSION_COOKIE: &str = "session";

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: i64,
}

/// Rejection raised when a protected route is hit without a valid session.
#[derive(Debug)]
pub struct Unauthenticated;

impl warp::reject::Reject for Unauthenticated {}

/// Signs and verifies session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    secret: Arc<Vec<u8>>,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: Arc::new(secret.as_bytes().to_vec()),
            ttl,
        }
    }

    pub fn issue(&self, user_id: i64) -> Result<String, AppError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now() + self.ttl).timestamp().max(0) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )?;
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Option<UserContext> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        )
        .ok()?;
        let user_id = data.claims.sub.parse().ok()?;
        Some(UserContext { user_id })
    }
}

pub fn session_cookie(token: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, token)
}

pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

/// Extracts the logged-in user or rejects with [`Unauthenticated`].
pub fn require_user(
    keys: SessionKeys,
) -> impl Filter<Extract = (UserContext,), Error = Rejection> + Clone {
    warp::cookie::optional(SESSION_COOKIE).and_then(move |token: Option<String>| {
        let keys = keys.clone();
        async move {
            token
                .and_then(|t| keys.verify(&t))
                .ok_or_else(|| warp::reject::custom(Unauthenticated))
        }
    })
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Hash(e.to_string()))
}

/// False for a wrong password and for a stored hash that cannot be parsed.
pub fn verify_password(stored_hash: &str, password: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> SessionKeys {
        SessionKeys::new("test-secret", Duration::hours(1))
    }

    #[test]
    fn issued_token_verifies() {
        let keys = keys();
        let token = keys.issue(42).unwrap();
        assert_eq!(keys.verify(&token), Some(UserContext { user_id: 42 }));
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let token = SessionKeys::new("other", Duration::hours(1))
            .issue(42)
            .unwrap();
        assert_eq!(keys().verify(&token), None);
    }

    #[test]
    fn expired_token_is_rejected() {
        let expired = SessionKeys::new("test-secret", Duration::hours(-2));
        let token = expired.issue(7).unwrap();
        assert_eq!(keys().verify(&token), None);
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert_eq!(keys().verify("not-a-jwt"), None);
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "hunter3"));
    }

    #[test]
    fn unparseable_hash_never_verifies() {
        assert!(!verify_password("plaintext", "plaintext"));
    }

    #[tokio::test]
    async fn gate_rejects_missing_cookie() {
        let filter = require_user(keys());
        let result = warp::test::request().filter(&filter).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn gate_passes_valid_cookie() {
        let keys = keys();
        let token = keys.issue(9).unwrap();
        let filter = require_user(keys);
        let user = warp::test::request()
            .header("cookie", format!("{}={}", SESSION_COOKIE, token))
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(user.user_id, 9);
    }
}
