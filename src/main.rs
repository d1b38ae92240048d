// src/main.rs
mod api;
mod auth;
mod config;
mod db;
mod error;
mod forms;
mod models;
mod pages;
mod portfolio;
mod quote;

use crate::api::AppState;
use crate::auth::SessionKeys;
use crate::config::Config;
use crate::db::SqliteStore;
use crate::quote::AlphaVantageQuotes;
use env_logger::{Builder, Env};
use log::{error, info, warn};
use reqwest::Client;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    if config.uses_default_secret() {
        warn!("SECRET_KEY is not set; sessions are signed with the built-in default key.");
    }

    let store = match SqliteStore::connect(&config.database_url).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to database...");

    let state = AppState {
        store: Arc::new(store),
        quotes: Arc::new(AlphaVantageQuotes::new(
            Client::new(),
            config.alpha_vantage_api_key.clone(),
        )),
        sessions: SessionKeys::new(
            &config.secret_key,
            chrono::Duration::hours(config.session_ttl_hours),
        ),
        starting_cash: config.starting_cash,
    };

    let api = api::routes(state);

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api).run(config.bind_addr).await;
}
