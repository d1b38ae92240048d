// src/config.rs
use rust_decimal::Decimal;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_SECRET_KEY: &str = "your_default_secret_key";

/// Sessions may last at most a year.
const MAX_SESSION_TTL_HOURS: i64 = 24 * 366;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub secret_key: String,
    pub alpha_vantage_api_key: String,
    pub bind_addr: SocketAddr,
    pub starting_cash: Decimal,
    pub session_ttl_hours: i64,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: var_or("DATABASE_URL", "sqlite:finance.db"),
            secret_key: var_or("SECRET_KEY", DEFAULT_SECRET_KEY),
            alpha_vantage_api_key: var_or("ALPHA_VANTAGE_API_KEY", "demo"),
            bind_addr: parse_var("BIND_ADDR", "127.0.0.1:3030")?,
            starting_cash: parse_var("STARTING_CASH", "10000.00")?,
            session_ttl_hours: session_ttl(var_or("SESSION_TTL_HOURS", "24"))?,
        })
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = var_or(key, default);
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn session_ttl(value: String) -> Result<i64, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(hours) if (1..=MAX_SESSION_TTL_HOURS).contains(&hours) => Ok(hours),
        _ => Err(ConfigError::Invalid {
            key: "SESSION_TTL_HOURS",
            value,
        }),
    }
}
