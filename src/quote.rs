// src/quote.rs
use crate::models::Quote;
use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

/// Looks up the current price of a ticker. `None` means the symbol is unknown
/// or the provider could not answer.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn lookup(&self, symbol: &str) -> Option<Quote>;
}

/// Trims and upper-cases a user-typed ticker, rejecting anything that cannot
/// be one.
pub fn normalize_symbol(input: &str) -> Option<String> {
    let symbol = input.trim();
    if symbol.is_empty()
        || symbol.len() > 12
        || !symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return None;
    }
    Some(symbol.to_ascii_uppercase())
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
}

impl GlobalQuoteResponse {
    fn into_quote(self) -> Option<Quote> {
        let quote = self.quote?;
        let price = Decimal::from_str(quote.price?.trim()).ok()?;
        if price <= Decimal::ZERO {
            return None;
        }
        Some(Quote {
            symbol: quote.symbol?,
            price,
        })
    }
}

pub struct AlphaVantageQuotes {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantageQuotes {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: ALPHA_VANTAGE_URL.to_string(),
        }
    }
}

#[async_trait]
impl QuoteSource for AlphaVantageQuotes {
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        let symbol = normalize_symbol(symbol)?;

        let response = match self
            .client
            .get(self.base_url.as_str())
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Quote request for {} failed: {}", symbol, e);
                return None;
            }
        };

        if !response.status().is_success() {
            error!(
                "Quote provider answered HTTP {} for {}",
                response.status(),
                symbol
            );
            return None;
        }

        match response.json::<GlobalQuoteResponse>().await {
            Ok(body) => {
                let quote = body.into_quote();
                match &quote {
                    Some(q) => info!("Quoted {} at {}", q.symbol, q.price),
                    None => warn!("No quote available for {}", symbol),
                }
                quote
            }
            Err(e) => {
                error!("Failed to parse quote for {}: {}", symbol, e);
                None
            }
        }
    }
}

/// Fixed price table used in tests in place of the network provider.
#[cfg(test)]
pub struct StaticQuotes {
    prices: std::sync::Mutex<std::collections::HashMap<String, Decimal>>,
}

#[cfg(test)]
impl StaticQuotes {
    pub fn new() -> Self {
        Self {
            prices: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn set(&self, symbol: &str, price: Decimal) {
        self.prices
            .lock()
            .unwrap()
            .insert(symbol.to_ascii_uppercase(), price);
    }
}

#[cfg(test)]
#[async_trait]
impl QuoteSource for StaticQuotes {
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        let symbol = normalize_symbol(symbol)?;
        let price = *self.prices.lock().unwrap().get(&symbol)?;
        Some(Quote { symbol, price })
    }
}
