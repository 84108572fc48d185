//! Shared SQLite store for queue tickets, alert subscriptions, the house
//! rate, rate history and the admin registry.
//!
//! All entities live behind one connection so every check-then-act sequence
//! (queue join, alert replace, fire-then-deactivate) runs as a single
//! IMMEDIATE transaction against the same store.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::Quote;

const SCHEMA_SQL: &str = r#"
-- WAL mode for concurrent reads during writes
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS queue (
    queue_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'waiting',
    created_at INTEGER NOT NULL,
    processed_at INTEGER
);

-- One live ticket per user, enforced by the store rather than callers
CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_live_user
    ON queue(user_id) WHERE status IN ('waiting', 'processing');

CREATE INDEX IF NOT EXISTS idx_queue_status_order
    ON queue(status, created_at, queue_id);

CREATE TABLE IF NOT EXISTS alerts (
    alert_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    target_rate REAL NOT NULL,
    condition TEXT NOT NULL DEFAULT 'above',
    active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    triggered_at INTEGER
);

-- One active subscription per user
CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_active_user
    ON alerts(user_id) WHERE active = 1;

-- Single-row house rate, replaced wholesale on every admin write
CREATE TABLE IF NOT EXISTS custom_rate (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    provider TEXT NOT NULL,
    buying REAL NOT NULL,
    selling REAL NOT NULL,
    set_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rate_history (
    history_id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    buying REAL,
    selling REAL,
    recorded_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rate_history_provider
    ON rate_history(provider, recorded_at DESC);

CREATE TABLE IF NOT EXISTS admins (
    admin_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT UNIQUE NOT NULL,
    display_name TEXT,
    added_at INTEGER NOT NULL
);
"#;

/// The last recorded value for a provider, used to degrade gracefully when
/// a live fetch fails.
#[derive(Debug, Clone)]
pub struct HistoricalRate {
    pub provider: String,
    pub buying: Option<f64>,
    pub selling: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Handle to the shared store. Cheap to clone; all clones serialize through
/// the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Database initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Append live observations from a refresh sweep to the history log.
    /// Substituted (degraded) values are not re-recorded, so history only
    /// ever holds rates a provider actually reported.
    pub fn save_rate_history(&self, quotes: &[Quote]) -> Result<usize> {
        let now = Utc::now().timestamp_micros();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut saved = 0usize;
        for quote in quotes
            .iter()
            .filter(|q| matches!(q.status, crate::models::QuoteStatus::Ok))
        {
            tx.execute(
                "INSERT INTO rate_history (provider, buying, selling, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![quote.provider, quote.buying, quote.selling, now],
            )?;
            saved += 1;
        }
        tx.commit()?;

        Ok(saved)
    }

    /// Most recent recorded value for one provider, if any.
    pub fn last_recorded_rate(&self, provider: &str) -> Result<Option<HistoricalRate>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT provider, buying, selling, recorded_at FROM rate_history
                 WHERE provider = ?1
                 ORDER BY recorded_at DESC, history_id DESC
                 LIMIT 1",
                params![provider],
                |row| {
                    Ok(HistoricalRate {
                        provider: row.get(0)?,
                        buying: row.get(1)?,
                        selling: row.get(2)?,
                        recorded_at: from_micros(row.get(3)?),
                    })
                },
            )
            .optional()?;

        Ok(row)
    }

    /// Whether the user is in the persisted admin registry.
    pub fn is_admin(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn();
        let found = conn
            .query_row(
                "SELECT 1 FROM admins WHERE user_id = ?1",
                params![user_id],
                |_| Ok(()),
            )
            .optional()?;

        Ok(found.is_some())
    }

    /// Register an admin. Returns false if the user was already registered.
    pub fn add_admin(&self, user_id: &str, display_name: Option<&str>) -> Result<bool> {
        let conn = self.conn();
        let changes = conn.execute(
            "INSERT OR IGNORE INTO admins (user_id, display_name, added_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, display_name, Utc::now().timestamp_micros()],
        )?;

        Ok(changes > 0)
    }
}

/// Micros-since-epoch to UTC timestamp. Timestamps are written by this
/// process, so out-of-range values cannot occur.
pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuoteStatus;
    use tempfile::NamedTempFile;

    fn open_test_db() -> (Database, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::open(temp_file.path().to_str().unwrap()).unwrap();
        (db, temp_file)
    }

    fn quote(provider: &str, buying: f64, status: QuoteStatus) -> Quote {
        Quote {
            provider: provider.to_string(),
            buying: Some(buying),
            selling: Some(buying),
            status,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_history_skips_errored_quotes() {
        let (db, _temp) = open_test_db();

        let quotes = vec![
            quote("mid-market", 4.52, QuoteStatus::Ok),
            Quote::errored("bot-reference"),
        ];

        let saved = db.save_rate_history(&quotes).unwrap();
        assert_eq!(saved, 1);

        let last = db.last_recorded_rate("mid-market").unwrap().unwrap();
        assert_eq!(last.buying, Some(4.52));

        assert!(db.last_recorded_rate("bot-reference").unwrap().is_none());
    }

    #[test]
    fn test_last_recorded_rate_picks_newest() {
        let (db, _temp) = open_test_db();

        db.save_rate_history(&[quote("mid-market", 4.50, QuoteStatus::Ok)])
            .unwrap();
        db.save_rate_history(&[quote("mid-market", 4.61, QuoteStatus::Ok)])
            .unwrap();

        let last = db.last_recorded_rate("mid-market").unwrap().unwrap();
        assert_eq!(last.buying, Some(4.61));
    }

    #[test]
    fn test_admin_registry() {
        let (db, _temp) = open_test_db();

        assert!(!db.is_admin("U1").unwrap());
        assert!(db.add_admin("U1", Some("Boss")).unwrap());
        assert!(db.is_admin("U1").unwrap());

        // Second registration is a no-op
        assert!(!db.add_admin("U1", None).unwrap());
    }
}
