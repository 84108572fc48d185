//! First-come-first-served service queue.
//!
//! Order is defined solely by (created_at, id) assigned at insert time.
//! Every check-then-act sequence runs inside one IMMEDIATE transaction, and
//! the store's partial unique index keeps a user from holding two live
//! tickets no matter how callers interleave.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::info;

use crate::db::{from_micros, Database};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{JoinOutcome, QueueEntry, QueueStatus};

pub struct QueueManager {
    db: Database,
}

impl QueueManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Join the queue. A user with a live (waiting or processing) ticket
    /// gets their current position back instead of a duplicate.
    pub fn join(&self, user_id: &str, display_name: &str) -> ServiceResult<JoinOutcome> {
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                "SELECT queue_id, status, created_at FROM queue
                 WHERE user_id = ?1 AND status IN ('waiting', 'processing')",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        if let Some((entry_id, status, created_at)) = existing {
            let position = if status == "processing" {
                0
            } else {
                waiting_position(&tx, created_at, entry_id)?
            };
            return Ok(JoinOutcome {
                already_queued: true,
                entry_id,
                position,
            });
        }

        let now = Utc::now().timestamp_micros();
        tx.execute(
            "INSERT INTO queue (user_id, display_name, status, created_at)
             VALUES (?1, ?2, 'waiting', ?3)",
            params![user_id, display_name, now],
        )?;
        let entry_id = tx.last_insert_rowid();
        let position = waiting_position(&tx, now, entry_id)?;
        tx.commit()?;

        info!("🎫 {} joined the queue at position {}", display_name, position);

        Ok(JoinOutcome {
            already_queued: false,
            entry_id,
            position,
        })
    }

    /// Current position for a user: 1-indexed among waiting entries, 0 when
    /// already being served, `None` when not in the queue.
    pub fn position(&self, user_id: &str) -> ServiceResult<Option<i64>> {
        let conn = self.db.conn();

        let entry = conn
            .query_row(
                "SELECT queue_id, status, created_at FROM queue
                 WHERE user_id = ?1 AND status IN ('waiting', 'processing')",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((entry_id, status, created_at)) = entry else {
            return Ok(None);
        };

        if status == "processing" {
            return Ok(Some(0));
        }

        let ahead: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue
             WHERE status = 'waiting'
               AND (created_at < ?1 OR (created_at = ?1 AND queue_id < ?2))",
            params![created_at, entry_id],
            |row| row.get(0),
        )?;

        Ok(Some(ahead + 1))
    }

    /// Take the oldest waiting entry into processing. Refuses while another
    /// entry is already being served; the guard lives in the transaction,
    /// not in caller discipline.
    pub fn dequeue_next(&self) -> ServiceResult<Option<QueueEntry>> {
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let processing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM queue WHERE status = 'processing'",
            [],
            |row| row.get(0),
        )?;
        if processing > 0 {
            return Err(ServiceError::ServiceBusy);
        }

        let next = tx
            .query_row(
                "SELECT queue_id, user_id, display_name, status, created_at, processed_at
                 FROM queue WHERE status = 'waiting'
                 ORDER BY created_at ASC, queue_id ASC
                 LIMIT 1",
                [],
                map_entry,
            )
            .optional()?;

        let Some(mut entry) = next else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE queue SET status = 'processing' WHERE queue_id = ?1 AND status = 'waiting'",
            params![entry.id],
        )?;
        tx.commit()?;

        entry.status = QueueStatus::Processing;
        info!("📋 Now serving {} (ticket {})", entry.display_name, entry.id);

        Ok(Some(entry))
    }

    /// Finish the entry currently being served.
    pub fn complete(&self, entry_id: i64) -> ServiceResult<QueueEntry> {
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = Utc::now().timestamp_micros();
        let changes = tx.execute(
            "UPDATE queue SET status = 'completed', processed_at = ?2
             WHERE queue_id = ?1 AND status = 'processing'",
            params![entry_id, now],
        )?;
        if changes == 0 {
            return Err(ServiceError::NotFound(format!(
                "ticket {} is not being processed",
                entry_id
            )));
        }

        let entry = tx.query_row(
            "SELECT queue_id, user_id, display_name, status, created_at, processed_at
             FROM queue WHERE queue_id = ?1",
            params![entry_id],
            map_entry,
        )?;
        tx.commit()?;

        info!("✅ Completed {} (ticket {})", entry.display_name, entry.id);

        Ok(entry)
    }

    /// Voluntary withdrawal. Only a waiting entry can be withdrawn; one
    /// already being served must be completed by the admin.
    pub fn leave(&self, user_id: &str) -> ServiceResult<bool> {
        let conn = self.db.conn();
        let deleted = conn.execute(
            "DELETE FROM queue WHERE user_id = ?1 AND status = 'waiting'",
            params![user_id],
        )?;

        Ok(deleted > 0)
    }

    /// All live entries in service order.
    pub fn list_active(&self) -> ServiceResult<Vec<QueueEntry>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT queue_id, user_id, display_name, status, created_at, processed_at
             FROM queue WHERE status IN ('waiting', 'processing')
             ORDER BY created_at ASC, queue_id ASC",
        )?;

        let entries = stmt
            .query_map([], map_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

fn waiting_position(tx: &Transaction<'_>, created_at: i64, entry_id: i64) -> ServiceResult<i64> {
    let ahead: i64 = tx.query_row(
        "SELECT COUNT(*) FROM queue
         WHERE status = 'waiting'
           AND (created_at < ?1 OR (created_at = ?1 AND queue_id < ?2))",
        params![created_at, entry_id],
        |row| row.get(0),
    )?;

    Ok(ahead + 1)
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let status: String = row.get(3)?;
    Ok(QueueEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        display_name: row.get(2)?,
        status: QueueStatus::from_str(&status).unwrap_or(QueueStatus::Waiting),
        created_at: from_micros(row.get(4)?),
        processed_at: row.get::<_, Option<i64>>(5)?.map(from_micros),
    })
}
