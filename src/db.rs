// src/db.rs
use crate::error::AppError;
use crate::models::{NewTransaction, Transaction, TransactionType, User};
use async_trait::async_trait;
use log::info;
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    hash TEXT NOT NULL,
    cash TEXT NOT NULL DEFAULT '10000.00'
);
CREATE TABLE IF NOT EXISTS trans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users (id),
    stock_symbol TEXT NOT NULL,
    shares INTEGER NOT NULL,
    price TEXT NOT NULL,
    total TEXT NOT NULL,
    trans_type TEXT NOT NULL CHECK (trans_type IN ('buy', 'sell')),
    executed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS trans_user_symbol ON trans (user_id, stock_symbol);
"#;

/// Balance updates take the write lock up front so concurrent requests wait
/// on the busy timeout instead of failing to upgrade a read lock.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// Everything the request handlers need from persistent storage.
///
/// `buy`, `sell` and `add_cash` each read the balance, check it, write it
/// back and (for trades) append the ledger row inside one transaction, and
/// return the new balance.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    /// Fails with [`AppError::UsernameTaken`] if the name is already used.
    async fn create_user(&self, username: &str, hash: &str, cash: Decimal)
        -> Result<i64, AppError>;

    async fn cash(&self, user_id: i64) -> Result<Option<Decimal>, AppError>;

    /// The user's ledger in insertion order.
    async fn transactions(&self, user_id: i64) -> Result<Vec<Transaction>, AppError>;

    async fn buy(&self, entry: &NewTransaction) -> Result<Decimal, AppError>;

    async fn sell(&self, entry: &NewTransaction) -> Result<Decimal, AppError>;

    async fn add_cash(&self, user_id: i64, amount: Decimal) -> Result<Decimal, AppError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.init_schema().await?;
        info!("Successfully connected to {}.", database_url);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), AppError> {
        for statement in SCHEMA.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }
        Ok(())
    }
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(text.trim()).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, sqlx::Error> {
    let trans_type: String = row.try_get("trans_type")?;
    let trans_type = TransactionType::parse(&trans_type).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown trans_type {:?}", trans_type).into())
    })?;

    Ok(Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        stock_symbol: row.try_get("stock_symbol")?,
        shares: row.try_get("shares")?,
        price: decimal_column(row, "price")?,
        total: decimal_column(row, "total")?,
        trans_type,
        executed_at: row.try_get("executed_at")?,
    })
}

async fn read_cash(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<Option<Decimal>, AppError> {
    let row = sqlx::query("SELECT CAST(cash AS TEXT) AS cash FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(Some(decimal_column(&row, "cash")?)),
        None => Ok(None),
    }
}

async fn write_cash(
    conn: &mut SqliteConnection,
    user_id: i64,
    cash: Decimal,
) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET cash = ? WHERE id = ?")
        .bind(cash.to_string())
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn append_ledger(
    conn: &mut SqliteConnection,
    entry: &NewTransaction,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO trans (user_id, stock_symbol, shares, price, total, trans_type, executed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.user_id)
    .bind(&entry.stock_symbol)
    .bind(entry.shares)
    .bind(entry.price.to_string())
    .bind(entry.total.to_string())
    .bind(entry.trans_type.as_str())
    .bind(chrono::Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Datastore for SqliteStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query("SELECT id, username, hash FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(User {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                hash: row.try_get("hash")?,
            })),
            None => Ok(None),
        }
    }

    async fn create_user(
        &self,
        username: &str,
        hash: &str,
        cash: Decimal,
    ) -> Result<i64, AppError> {
        let result = sqlx::query("INSERT INTO users (username, hash, cash) VALUES (?, ?, ?)")
            .bind(username)
            .bind(hash)
            .bind(cash.to_string())
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::UsernameTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cash(&self, user_id: i64) -> Result<Option<Decimal>, AppError> {
        let mut conn = self.pool.acquire().await?;
        read_cash(&mut conn, user_id).await
    }

    async fn transactions(&self, user_id: i64) -> Result<Vec<Transaction>, AppError> {
        let rows = sqlx::query(
            "SELECT id, user_id, stock_symbol, shares, CAST(price AS TEXT) AS price, \
             CAST(total AS TEXT) AS total, trans_type, executed_at \
             FROM trans WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let ledger = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ledger)
    }

    async fn buy(&self, entry: &NewTransaction) -> Result<Decimal, AppError> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let cash = read_cash(&mut tx, entry.user_id)
            .await?
            .ok_or(AppError::UserNotFound)?;
        if cash < entry.total {
            return Err(AppError::InsufficientBalance);
        }

        let remaining = cash
            .checked_sub(entry.total)
            .ok_or(AppError::AmountOutOfRange)?
            .round_dp(2);
        write_cash(&mut tx, entry.user_id, remaining).await?;
        append_ledger(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(remaining)
    }

    async fn sell(&self, entry: &NewTransaction) -> Result<Decimal, AppError> {
        let requested = -entry.shares;
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let held: Option<i64> = sqlx::query(
            "SELECT SUM(shares) AS total_shares FROM trans WHERE user_id = ? AND stock_symbol = ?",
        )
        .bind(entry.user_id)
        .bind(&entry.stock_symbol)
        .fetch_one(&mut *tx)
        .await?
        .try_get("total_shares")?;

        match held {
            Some(held) if held > 0 && requested <= held => {}
            _ => return Err(AppError::InsufficientShares),
        }

        let cash = read_cash(&mut tx, entry.user_id)
            .await?
            .ok_or(AppError::UserNotFound)?;
        let balance = cash
            .checked_sub(entry.total)
            .ok_or(AppError::AmountOutOfRange)?;

        write_cash(&mut tx, entry.user_id, balance).await?;
        append_ledger(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn add_cash(&self, user_id: i64, amount: Decimal) -> Result<Decimal, AppError> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let cash = read_cash(&mut tx, user_id)
            .await?
            .ok_or(AppError::UserNotFound)?;
        let balance = cash
            .checked_add(amount)
            .ok_or(AppError::AmountOutOfRange)?;

        write_cash(&mut tx, user_id, balance).await?;
        tx.commit().await?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::ShareCount;
    use crate::models::Quote;
    use crate::portfolio::{buy_entry, holdings, sell_entry};
    use rust_decimal_macros::dec;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    async fn user_with_cash(store: &SqliteStore, cash: Decimal) -> i64 {
        store.create_user("alice", "hash", cash).await.unwrap()
    }

    fn quote(symbol: &str, price: Decimal) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price,
        }
    }

    fn shares(n: &str) -> ShareCount {
        ShareCount::parse(n).unwrap()
    }

    #[tokio::test]
    async fn buy_then_sell_scenario() {
        let store = store().await;
        let id = user_with_cash(&store, dec!(10000)).await;

        let cash = store
            .buy(&buy_entry(id, &quote("AAA", dec!(50)), shares("10")).unwrap())
            .await
            .unwrap();
        assert_eq!(cash, dec!(9500));

        let cash = store
            .sell(&sell_entry(id, &quote("AAA", dec!(60)), shares("4")).unwrap())
            .await
            .unwrap();
        assert_eq!(cash, dec!(9740));
        assert_eq!(store.cash(id).await.unwrap(), Some(dec!(9740)));

        let ledger = store.transactions(id).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].shares, 10);
        assert_eq!(ledger[0].total, dec!(500));
        assert_eq!(ledger[0].trans_type, TransactionType::Buy);
        assert_eq!(ledger[1].shares, -4);
        assert_eq!(ledger[1].total, dec!(-240));
        assert_eq!(ledger[1].trans_type, TransactionType::Sell);
        assert_eq!(holdings(&ledger).unwrap()[0].shares, 6);
    }

    #[tokio::test]
    async fn buy_rounds_remaining_cash_to_cents() {
        let store = store().await;
        let id = user_with_cash(&store, dec!(1000)).await;

        let cash = store
            .buy(&buy_entry(id, &quote("AAA", dec!(10.3333)), shares("3")).unwrap())
            .await
            .unwrap();
        assert_eq!(cash, dec!(969.00));
        assert_eq!(store.transactions(id).await.unwrap()[0].total, dec!(30.9999));
    }

    #[tokio::test]
    async fn overspending_changes_nothing() {
        let store = store().await;
        let id = user_with_cash(&store, dec!(100)).await;

        let err = store
            .buy(&buy_entry(id, &quote("AAA", dec!(50)), shares("10")).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance));
        assert_eq!(store.cash(id).await.unwrap(), Some(dec!(100)));
        assert!(store.transactions(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overselling_changes_nothing() {
        let store = store().await;
        let id = user_with_cash(&store, dec!(1000)).await;
        store
            .buy(&buy_entry(id, &quote("AAA", dec!(10)), shares("2")).unwrap())
            .await
            .unwrap();

        let err = store
            .sell(&sell_entry(id, &quote("AAA", dec!(10)), shares("3")).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientShares));
        assert_eq!(store.cash(id).await.unwrap(), Some(dec!(980)));
        assert_eq!(store.transactions(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn selling_an_unowned_symbol_fails() {
        let store = store().await;
        let id = user_with_cash(&store, dec!(1000)).await;

        let err = store
            .sell(&sell_entry(id, &quote("ZZZ", dec!(10)), shares("1")).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientShares));
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = store().await;
        user_with_cash(&store, dec!(10000)).await;

        let err = store
            .create_user("alice", "other", dec!(10000))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UsernameTaken));
    }

    #[tokio::test]
    async fn finds_users_by_name() {
        let store = store().await;
        let id = user_with_cash(&store, dec!(10000)).await;

        let user = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.username, "alice");
        assert_eq!(user.hash, "hash");
        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_cash_increments_balance() {
        let store = store().await;
        let id = user_with_cash(&store, dec!(10000)).await;

        let cash = store.add_cash(id, dec!(250.50)).await.unwrap();
        assert_eq!(cash, dec!(10250.50));
        assert_eq!(store.cash(id).await.unwrap(), Some(dec!(10250.50)));
    }

    #[tokio::test]
    async fn missing_user_is_reported() {
        let store = store().await;

        assert!(store.cash(99).await.unwrap().is_none());
        assert!(matches!(
            store.add_cash(99, dec!(1)).await.unwrap_err(),
            AppError::UserNotFound
        ));
        assert!(matches!(
            store
                .buy(&buy_entry(99, &quote("AAA", dec!(1)), shares("1")).unwrap())
                .await
                .unwrap_err(),
            AppError::UserNotFound
        ));
    }

    #[tokio::test]
    async fn add_cash_overflow_is_refused() {
        let store = store().await;
        let id = user_with_cash(&store, dec!(10000)).await;

        assert!(matches!(
            store.add_cash(id, Decimal::MAX).await.unwrap_err(),
            AppError::AmountOutOfRange
        ));
        assert_eq!(store.cash(id).await.unwrap(), Some(dec!(10000)));
    }

    #[tokio::test]
    async fn sell_for_a_deleted_user_is_reported() {
        let store = store().await;
        let id = user_with_cash(&store, dec!(1000)).await;
        store
            .buy(&buy_entry(id, &quote("AAA", dec!(10)), shares("2")).unwrap())
            .await
            .unwrap();

        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store
            .sell(&sell_entry(id, &quote("AAA", dec!(10)), shares("1")).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UserNotFound));
        assert_eq!(store.transactions(id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buys_all_settle() {
        let path = std::env::temp_dir().join(format!(
            "stock_trader_concurrent_{}_{}.db",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let url = format!("sqlite://{}", path.display());
        let store = SqliteStore::connect(&url).await.unwrap();
        let id = user_with_cash(&store, dec!(10000)).await;

        let orders = (0..20).map(|_| {
            let store = store.clone();
            let entry = buy_entry(id, &quote("AAA", dec!(1)), shares("1")).unwrap();
            tokio::spawn(async move { store.buy(&entry).await })
        });
        let results = settle(orders.collect()).await;

        let cash = store.cash(id).await.unwrap();
        let rows = store.transactions(id).await.unwrap().len();
        store.pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }

        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
        assert_eq!(cash, Some(dec!(9980)));
        assert_eq!(rows, 20);
    }

    async fn settle(
        handles: Vec<tokio::task::JoinHandle<Result<Decimal, AppError>>>,
    ) -> Vec<Result<Decimal, AppError>> {
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }
}
