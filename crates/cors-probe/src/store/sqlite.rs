//! SQLite-backed exchange store.
//!
//! One row per exchange; request and response are stored as JSON text. Row
//! order is the autoincrement id, which is the append order.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};

use super::ExchangeStore;
use crate::error::StoreError;
use crate::model::{Exchange, Request, Response};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS proxy_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    correlation_id TEXT NOT NULL,
    request TEXT,
    response TEXT,
    created_at_unix_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_proxy_history_correlation
    ON proxy_history (correlation_id, id);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;

        tracing::debug!(path = %path.display(), "SQLite exchange store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>, StoreError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}

impl ExchangeStore for SqliteStore {
    fn append(&self, correlation_id: &str, exchange: &Exchange) -> Result<(), StoreError> {
        let request = to_json(exchange.request.as_ref())?;
        let response = to_json(exchange.response.as_ref())?;

        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO proxy_history (correlation_id, request, response, created_at_unix_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![correlation_id, request, response, now_unix_ms()],
        )?;
        Ok(())
    }

    fn read_all(&self, correlation_id: &str) -> Result<Vec<Exchange>, StoreError> {
        let rows: Vec<(Option<String>, Option<String>)> = {
            let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
            let mut stmt = conn.prepare(
                "SELECT request, response FROM proxy_history
                 WHERE correlation_id = ?1 ORDER BY id",
            )?;
            let mapped = stmt.query_map(params![correlation_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            let rows = mapped.collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(request, response)| -> Result<Exchange, StoreError> {
                Ok(Exchange {
                    request: request
                        .map(|json| serde_json::from_str::<Request>(&json))
                        .transpose()?,
                    response: response
                        .map(|json| serde_json::from_str::<Response>(&json))
                        .transpose()?,
                })
            })
            .collect()
    }

    fn count(&self, correlation_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM proxy_history WHERE correlation_id = ?1",
            params![correlation_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
