// src/portfolio.rs
//! Ledger arithmetic. Positions are never stored; they are folded out of the
//! user's transactions every time they are needed.
use crate::error::AppError;
use crate::forms::ShareCount;
use crate::models::{Holding, NewTransaction, Portfolio, Quote, Transaction, TransactionType};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

fn cost(quote: &Quote, shares: i64) -> Result<Decimal, AppError> {
    quote
        .price
        .checked_mul(Decimal::from(shares))
        .ok_or(AppError::AmountOutOfRange)
}

pub fn buy_entry(user_id: i64, quote: &Quote, shares: ShareCount) -> Result<NewTransaction, AppError> {
    let shares = shares.get();
    Ok(NewTransaction {
        user_id,
        stock_symbol: quote.symbol.clone(),
        shares,
        price: quote.price,
        total: cost(quote, shares)?,
        trans_type: TransactionType::Buy,
    })
}

/// Sells are recorded with negative shares and a negative total.
pub fn sell_entry(user_id: i64, quote: &Quote, shares: ShareCount) -> Result<NewTransaction, AppError> {
    let shares = shares.get();
    Ok(NewTransaction {
        user_id,
        stock_symbol: quote.symbol.clone(),
        shares: -shares,
        price: quote.price,
        total: -cost(quote, shares)?,
        trans_type: TransactionType::Sell,
    })
}

/// Per-symbol sums of shares and totals, keeping only symbols still held.
pub fn holdings(ledger: &[Transaction]) -> Result<Vec<Holding>, AppError> {
    let mut by_symbol: BTreeMap<&str, (i64, Decimal)> = BTreeMap::new();
    for row in ledger {
        let entry = by_symbol
            .entry(row.stock_symbol.as_str())
            .or_insert((0, Decimal::ZERO));
        entry.0 = entry
            .0
            .checked_add(row.shares)
            .ok_or(AppError::AmountOutOfRange)?;
        entry.1 = entry
            .1
            .checked_add(row.total)
            .ok_or(AppError::AmountOutOfRange)?;
    }

    Ok(by_symbol
        .into_iter()
        .filter(|(_, (shares, _))| *shares > 0)
        .map(|(symbol, (shares, total))| Holding {
            stock_symbol: symbol.to_string(),
            shares,
            total,
        })
        .collect())
}

/// Net worth is cash plus the signed cost basis of every ledger row; current
/// prices are not consulted.
pub fn summarize(cash: Decimal, ledger: &[Transaction]) -> Result<Portfolio, AppError> {
    let total = ledger
        .iter()
        .try_fold(cash, |acc, row| acc.checked_add(row.total))
        .ok_or(AppError::AmountOutOfRange)?;
    Ok(Portfolio {
        stocks: holdings(ledger)?,
        cash,
        total,
    })
}
