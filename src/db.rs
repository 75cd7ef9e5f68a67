// src/db.rs
use crate::error::AppError;
use crate::models::{
    Execution, HistoryRecord, LeaderboardEntry, Operation, PortfolioEntry, User,
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed store for users, holdings and the trade log.
///
/// A single connection sits behind a mutex, so every statement (and every
/// trade transaction) is serialised within the process.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    pub fn open(path: &str) -> Result<Self, AppError> {
        // Open the database file and apply pragmas
        let conn = Connection::open(path)?;
        if path != ":memory:" {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Create tables if they don't exist
        run_migrations(&conn)?;
        info!("Ledger ready at {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, AppError> {
        Self::open(":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub fn create_user(
        &self,
        username: &str,
        hash: &str,
        starting_cash: Decimal,
    ) -> Result<User, AppError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO users (username, hash, cash, assets) VALUES (?1, ?2, ?3, ?3)",
            params![username, hash, starting_cash.to_string()],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(AppError::DuplicateUsername);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(User {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            hash: hash.to_string(),
            cash: starting_cash,
            assets: starting_cash,
        })
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, username, hash, cash, assets FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_user(&self, id: i64) -> Result<User, AppError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, username, hash, cash, assets FROM users WHERE id = ?1",
            params![id],
            row_to_user,
        )
        .optional()?
        .ok_or(AppError::UserNotFound(id))
    }

    pub fn list_users(&self) -> Result<Vec<User>, AppError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, username, hash, cash, assets FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn portfolio(&self, username: &str) -> Result<Vec<PortfolioEntry>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT username, symbol, shares FROM portfolio WHERE username = ?1 ORDER BY symbol ASC",
        )?;
        let entries = stmt
            .query_map(params![username], |row| {
                Ok(PortfolioEntry {
                    username: row.get(0)?,
                    symbol: row.get(1)?,
                    shares: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Shares held of `symbol`, zero when there is no entry.
    pub fn shares_owned(&self, username: &str, symbol: &str) -> Result<i64, AppError> {
        let conn = self.lock()?;
        let shares: Option<i64> = conn
            .query_row(
                "SELECT shares FROM portfolio WHERE username = ?1 AND symbol = ?2",
                params![username, symbol],
                |row| row.get(0),
            )
            .optional()?;
        Ok(shares.unwrap_or(0))
    }

    pub fn history(&self, username: &str) -> Result<Vec<HistoryRecord>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, username, operation, symbol, price, shares, transacted_at
             FROM history WHERE username = ?1 ORDER BY id ASC",
        )?;
        let records = stmt
            .query_map(params![username], row_to_history)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Debit cash, log the trade and add to the holding, all in one transaction.
    pub fn execute_buy(
        &self,
        user_id: i64,
        symbol: &str,
        price: Decimal,
        shares: i64,
    ) -> Result<Execution, AppError> {
        check_order(symbol, price, shares)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (username, cash) = user_cash(&tx, user_id)?;
        let cost = price
            .checked_mul(Decimal::from(shares))
            .ok_or(AppError::InvalidQuantity)?;
        if cash < cost {
            warn!(
                "User {} cannot afford {} x {} (cost {}, cash {})",
                username, shares, symbol, cost, cash
            );
            return Err(AppError::InsufficientFunds);
        }
        let cash_after = cash - cost;

        tx.execute(
            "UPDATE users SET cash = ?1 WHERE id = ?2",
            params![cash_after.to_string(), user_id],
        )?;
        let record = append_history(&tx, &username, Operation::Buy, symbol, price, shares)?;
        tx.execute(
            "INSERT INTO portfolio (username, symbol, shares) VALUES (?1, ?2, ?3)
             ON CONFLICT(username, symbol) DO UPDATE SET shares = shares + excluded.shares",
            params![username, symbol, shares],
        )?;
        let shares_after: i64 = tx.query_row(
            "SELECT shares FROM portfolio WHERE username = ?1 AND symbol = ?2",
            params![username, symbol],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(Execution {
            record,
            cash_after,
            shares_after,
        })
    }

    /// Credit cash, log the trade and reduce the holding, all in one transaction.
    /// The entry is removed once no shares remain.
    pub fn execute_sell(
        &self,
        user_id: i64,
        symbol: &str,
        price: Decimal,
        shares: i64,
    ) -> Result<Execution, AppError> {
        check_order(symbol, price, shares)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (username, cash) = user_cash(&tx, user_id)?;
        let owned: i64 = tx
            .query_row(
                "SELECT shares FROM portfolio WHERE username = ?1 AND symbol = ?2",
                params![username, symbol],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        if shares > owned {
            warn!(
                "User {} tried to sell {} x {} but owns {}",
                username, shares, symbol, owned
            );
            return Err(AppError::InvalidQuantity);
        }

        let proceeds = price
            .checked_mul(Decimal::from(shares))
            .ok_or(AppError::InvalidQuantity)?;
        let cash_after = cash
            .checked_add(proceeds)
            .ok_or(AppError::InvalidQuantity)?;
        let shares_after = owned - shares;

        tx.execute(
            "UPDATE users SET cash = ?1 WHERE id = ?2",
            params![cash_after.to_string(), user_id],
        )?;
        let record = append_history(&tx, &username, Operation::Sell, symbol, price, shares)?;
        if shares_after == 0 {
            tx.execute(
                "DELETE FROM portfolio WHERE username = ?1 AND symbol = ?2",
                params![username, symbol],
            )?;
        } else {
            tx.execute(
                "UPDATE portfolio SET shares = ?1 WHERE username = ?2 AND symbol = ?3",
                params![shares_after, username, symbol],
            )?;
        }

        tx.commit()?;
        Ok(Execution {
            record,
            cash_after,
            shares_after,
        })
    }

    pub fn update_assets(&self, username: &str, assets: Decimal) -> Result<(), AppError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE users SET assets = ?1 WHERE username = ?2",
            params![assets.to_string(), username],
        )?;
        if rows == 0 {
            warn!("No user {} to update assets for", username);
        }
        Ok(())
    }

    /// Users ranked by the cached assets value, then cash.
    pub fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, AppError> {
        let mut entries: Vec<LeaderboardEntry> = self
            .list_users()?
            .into_iter()
            .map(|u| LeaderboardEntry {
                username: u.username,
                cash: u.cash,
                assets: u.assets,
            })
            .collect();
        // Money is stored as text, so the ordering happens here rather than in SQL.
        entries.sort_by(|a, b| {
            b.assets
                .cmp(&a.assets)
                .then_with(|| b.cash.cmp(&a.cash))
                .then_with(|| a.username.cmp(&b.username))
        });
        Ok(entries)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            hash TEXT NOT NULL,
            cash TEXT NOT NULL DEFAULT '10000.00',
            assets TEXT NOT NULL DEFAULT '10000.00'
        );

        CREATE TABLE IF NOT EXISTS portfolio (
            username TEXT NOT NULL REFERENCES users(username),
            symbol TEXT NOT NULL,
            shares INTEGER NOT NULL CHECK (shares > 0),
            PRIMARY KEY (username, symbol)
        );

        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL REFERENCES users(username),
            operation TEXT NOT NULL CHECK (operation IN ('BUY', 'SELL')),
            symbol TEXT NOT NULL,
            price TEXT NOT NULL,
            shares INTEGER NOT NULL CHECK (shares > 0),
            transacted_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_username ON history(username);
        ",
    )
    .map_err(|e| AppError::Database(format!("Migration failed: {e}")))
}

fn user_cash(conn: &Connection, user_id: i64) -> Result<(String, Decimal), AppError> {
    let (username, cash): (String, String) = conn
        .query_row(
            "SELECT username, cash FROM users WHERE id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or(AppError::UserNotFound(user_id))?;
    let cash = Decimal::from_str(&cash)
        .map_err(|e| AppError::Database(format!("Corrupt cash value '{cash}': {e}")))?;
    Ok((username, cash))
}

fn append_history(
    conn: &Connection,
    username: &str,
    operation: Operation,
    symbol: &str,
    price: Decimal,
    shares: i64,
) -> Result<HistoryRecord, AppError> {
    let timestamp = Utc::now();
    conn.execute(
        "INSERT INTO history (username, operation, symbol, price, shares, transacted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            username,
            operation.to_string(),
            symbol,
            price.to_string(),
            shares,
            timestamp.to_rfc3339(),
        ],
    )?;
    Ok(HistoryRecord {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        operation,
        symbol: symbol.to_string(),
        price,
        shares,
        timestamp,
    })
}

fn decimal_column(row: &rusqlite::Row, idx: usize) -> Result<Decimal, rusqlite::Error> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// Both sides of a trade need a positive share count and a positive price.
fn check_order(symbol: &str, price: Decimal, shares: i64) -> Result<(), AppError> {
    if shares < 1 {
        return Err(AppError::InvalidQuantity);
    }
    if price <= Decimal::ZERO {
        return Err(AppError::Quote(format!("Non-positive price {price} for {symbol}")));
    }
    Ok(())
}

fn row_to_user(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        hash: row.get(2)?,
        cash: decimal_column(row, 3)?,
        assets: decimal_column(row, 4)?,
    })
}

fn row_to_history(row: &rusqlite::Row) -> Result<HistoryRecord, rusqlite::Error> {
    let op_str: String = row.get(2)?;
    let ts_str: String = row.get(6)?;
    Ok(HistoryRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        operation: op_str.parse::<Operation>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        symbol: row.get(3)?,
        price: decimal_column(row, 4)?,
        shares: row.get(5)?,
        timestamp: DateTime::parse_from_rfc3339(&ts_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
            })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ledger_with_user() -> (Ledger, User) {
        let ledger = Ledger::in_memory().unwrap();
        let user = ledger.create_user("alice", "hash", dec("10000")).unwrap();
        (ledger, user)
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let (ledger, _) = ledger_with_user();
        let err = ledger.create_user("alice", "other", dec("1")).unwrap_err();
        assert!(matches!(err, AppError::DuplicateUsername));
        assert_eq!(ledger.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_buy_debits_cash_and_upserts_holding() {
        let (ledger, user) = ledger_with_user();
        let first = ledger.execute_buy(user.id, "AAPL", dec("50"), 10).unwrap();
        assert_eq!(first.cash_after, dec("9500"));
        assert_eq!(first.shares_after, 10);

        let second = ledger.execute_buy(user.id, "AAPL", dec("25.5"), 2).unwrap();
        assert_eq!(second.cash_after, dec("9449"));
        assert_eq!(second.shares_after, 12);

        assert_eq!(ledger.shares_owned("alice", "AAPL").unwrap(), 12);
        assert_eq!(ledger.get_user(user.id).unwrap().cash, dec("9449"));
        assert_eq!(ledger.portfolio("alice").unwrap().len(), 1);
        assert_eq!(ledger.history("alice").unwrap().len(), 2);
    }

    #[test]
    fn test_insufficient_funds_rolls_back() {
        let (ledger, user) = ledger_with_user();
        let err = ledger
            .execute_buy(user.id, "AAPL", dec("1000.01"), 10)
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds));
        assert_eq!(ledger.get_user(user.id).unwrap().cash, dec("10000"));
        assert!(ledger.portfolio("alice").unwrap().is_empty());
        assert!(ledger.history("alice").unwrap().is_empty());
    }

    #[test]
    fn test_buy_rejects_bad_orders_without_change() {
        let (ledger, user) = ledger_with_user();
        let err = ledger.execute_buy(user.id, "AAPL", dec("50"), -5).unwrap_err();
        assert!(matches!(err, AppError::InvalidQuantity));
        let err = ledger.execute_buy(user.id, "AAPL", dec("50"), 0).unwrap_err();
        assert!(matches!(err, AppError::InvalidQuantity));
        let err = ledger.execute_buy(user.id, "AAPL", Decimal::ZERO, 1).unwrap_err();
        assert!(matches!(err, AppError::Quote(_)));
        let err = ledger.execute_sell(user.id, "AAPL", dec("-1"), 1).unwrap_err();
        assert!(matches!(err, AppError::Quote(_)));

        assert_eq!(ledger.get_user(user.id).unwrap().cash, dec("10000"));
        assert!(ledger.history("alice").unwrap().is_empty());
    }

    #[test]
    fn test_failure_after_cash_update_rolls_back() {
        let (ledger, user) = ledger_with_user();
        ledger.execute_buy(user.id, "AAPL", dec("50"), 2).unwrap();

        // Make the history insert fail once cash has already been written.
        ledger
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER history_down BEFORE INSERT ON history
                 BEGIN SELECT RAISE(ABORT, 'history unavailable'); END;",
            )
            .unwrap();

        let err = ledger.execute_buy(user.id, "AAPL", dec("50"), 3).unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        let err = ledger.execute_sell(user.id, "AAPL", dec("50"), 1).unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        assert_eq!(ledger.get_user(user.id).unwrap().cash, dec("9900"));
        assert_eq!(ledger.shares_owned("alice", "AAPL").unwrap(), 2);
        assert_eq!(ledger.history("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_buy_exact_balance_allowed() {
        let (ledger, user) = ledger_with_user();
        let exec = ledger.execute_buy(user.id, "MSFT", dec("1000"), 10).unwrap();
        assert_eq!(exec.cash_after, Decimal::ZERO);
    }

    #[test]
    fn test_sell_to_zero_removes_entry() {
        let (ledger, user) = ledger_with_user();
        ledger.execute_buy(user.id, "AAPL", dec("50"), 10).unwrap();
        ledger.execute_buy(user.id, "MSFT", dec("10"), 1).unwrap();

        let partial = ledger.execute_sell(user.id, "AAPL", dec("60"), 4).unwrap();
        assert_eq!(partial.shares_after, 6);
        assert_eq!(partial.cash_after, dec("9730"));

        let rest = ledger.execute_sell(user.id, "AAPL", dec("60"), 6).unwrap();
        assert_eq!(rest.shares_after, 0);
        assert_eq!(ledger.shares_owned("alice", "AAPL").unwrap(), 0);

        // Other holdings are untouched.
        let portfolio = ledger.portfolio("alice").unwrap();
        assert_eq!(portfolio.len(), 1);
        assert_eq!(portfolio[0].symbol, "MSFT");
        assert_eq!(portfolio[0].shares, 1);
    }

    #[test]
    fn test_oversell_rejected_without_change() {
        let (ledger, user) = ledger_with_user();
        ledger.execute_buy(user.id, "AAPL", dec("50"), 3).unwrap();

        let err = ledger.execute_sell(user.id, "AAPL", dec("50"), 4).unwrap_err();
        assert!(matches!(err, AppError::InvalidQuantity));
        let err = ledger.execute_sell(user.id, "TSLA", dec("50"), 1).unwrap_err();
        assert!(matches!(err, AppError::InvalidQuantity));

        assert_eq!(ledger.shares_owned("alice", "AAPL").unwrap(), 3);
        assert_eq!(ledger.get_user(user.id).unwrap().cash, dec("9850"));
        assert_eq!(ledger.history("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_user_is_reported() {
        let ledger = Ledger::in_memory().unwrap();
        let err = ledger.execute_buy(42, "AAPL", dec("1"), 1).unwrap_err();
        assert!(matches!(err, AppError::UserNotFound(42)));
    }

    #[test]
    fn test_history_rows_match_trades() {
        let (ledger, user) = ledger_with_user();
        ledger.execute_buy(user.id, "AAPL", dec("50.25"), 2).unwrap();
        ledger.execute_sell(user.id, "AAPL", dec("51"), 1).unwrap();

        let history = ledger.history("alice").unwrap();
        assert_eq!(history[0].operation, Operation::Buy);
        assert_eq!(history[0].price, dec("50.25"));
        assert_eq!(history[0].shares, 2);
        assert_eq!(history[1].operation, Operation::Sell);
        assert_eq!(history[1].symbol, "AAPL");
        assert_eq!(history[1].shares, 1);
    }

    #[test]
    fn test_leaderboard_orders_by_assets_then_cash() {
        let ledger = Ledger::in_memory().unwrap();
        ledger.create_user("a", "h", dec("100")).unwrap();
        ledger.create_user("b", "h", dec("200")).unwrap();
        ledger.create_user("c", "h", dec("50")).unwrap();
        ledger.update_assets("a", dec("300")).unwrap();
        ledger.update_assets("b", dec("300")).unwrap();

        let board = ledger.leaderboard().unwrap();
        let names: Vec<&str> = board.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_file_backed_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finance.db");
        let path = path.to_str().unwrap();
        {
            let ledger = Ledger::open(path).unwrap();
            let user = ledger.create_user("alice", "hash", dec("10000")).unwrap();
            ledger.execute_buy(user.id, "AAPL", dec("50"), 10).unwrap();
        }
        let reopened = Ledger::open(path).unwrap();
        assert_eq!(reopened.shares_owned("alice", "AAPL").unwrap(), 10);
        let user = reopened.find_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.cash, dec("9500"));
    }
}
