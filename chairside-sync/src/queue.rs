//! Durable FIFO queue of pending write intents
//!
//! Backed by SQLite so an offline session that is closed and reopened does
//! not lose pending writes. Ordering is strict insertion order via an
//! autoincrement sequence; no reordering or priority is permitted, since
//! later intents may depend on the state produced by earlier ones.

use crate::error::{SyncError, SyncResult};
use crate::intent::{WriteAction, WriteIntent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

/// Write queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteQueueConfig {
    /// Path to the queue database file
    pub db_path: String,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
    /// Whether to enable secure deletion (overwrites freed pages)
    pub enable_secure_delete: bool,
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self {
            db_path: "chairside_queue.db".to_string(),
            enable_wal: true,
            enable_secure_delete: true,
        }
    }
}

/// Durable, ordered queue of write intents
pub struct WriteQueue {
    pool: SqlitePool,
}

impl WriteQueue {
    /// Open (or create) the queue database
    pub async fn new(config: WriteQueueConfig) -> SyncResult<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", config.db_path);
        let pool = SqlitePool::connect(&db_url).await?;

        if config.enable_wal {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&pool)
                .await?;
        }

        if config.enable_secure_delete {
            sqlx::query("PRAGMA secure_delete = ON")
                .execute(&pool)
                .await?;
        }

        let queue = Self { pool };
        queue.initialize_schema().await?;

        Ok(queue)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS write_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                base_version INTEGER,
                enqueued_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_write_queue_entity ON write_queue(entity_type, entity_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append an intent at the back of the queue
    ///
    /// Fast, non-blocking append; safe to call while a flush is draining.
    pub async fn enqueue(&self, intent: &WriteIntent) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO write_queue (
                id, action, entity_type, entity_id,
                payload, base_version, enqueued_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(intent.id.to_string())
        .bind(intent.action.as_str())
        .bind(&intent.entity_type)
        .bind(&intent.entity_id)
        .bind(intent.payload.to_string())
        .bind(intent.base_version)
        .bind(intent.enqueued_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            intent_id = %intent.id,
            action = intent.action.as_str(),
            entity_type = %intent.entity_type,
            entity_id = %intent.entity_id,
            "Queued write intent"
        );

        Ok(())
    }

    /// Oldest intent without removing it
    pub async fn peek_front(&self) -> SyncResult<Option<WriteIntent>> {
        let row = sqlx::query(
            r#"
            SELECT id, action, entity_type, entity_id,
                   payload, base_version, enqueued_at
            FROM write_queue
            ORDER BY seq ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_intent).transpose()
    }

    /// Remove and return the oldest intent
    pub async fn dequeue(&self) -> SyncResult<Option<WriteIntent>> {
        let Some(intent) = self.peek_front().await? else {
            return Ok(None);
        };
        self.remove(intent.id).await?;
        Ok(Some(intent))
    }

    /// A queued intent by ID
    pub async fn get(&self, intent_id: Uuid) -> SyncResult<Option<WriteIntent>> {
        let row = sqlx::query(
            r#"
            SELECT id, action, entity_type, entity_id,
                   payload, base_version, enqueued_at
            FROM write_queue
            WHERE id = ?
            "#,
        )
        .bind(intent_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_intent).transpose()
    }

    /// Remove a specific intent, wherever it sits in the queue
    ///
    /// Used when an intent is accepted by the remote or discarded as part of
    /// an explicit conflict resolution.
    pub async fn remove(&self, intent_id: Uuid) -> SyncResult<bool> {
        let result = sqlx::query("DELETE FROM write_queue WHERE id = ?")
            .bind(intent_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All queued intents, oldest first
    pub async fn list(&self) -> SyncResult<Vec<WriteIntent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, entity_type, entity_id,
                   payload, base_version, enqueued_at
            FROM write_queue
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_intent).collect()
    }

    pub async fn len(&self) -> SyncResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM write_queue")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Rebase the remaining intents of an entity onto a new remote version
    ///
    /// Called after an earlier intent for the entity is applied: the later
    /// intents were computed against the state that intent produced, so
    /// their base version advances with it.
    pub async fn rebase_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        base_version: i64,
    ) -> SyncResult<()> {
        sqlx::query(
            r#"
            UPDATE write_queue
            SET base_version = ?
            WHERE entity_type = ? AND entity_id = ?
            "#,
        )
        .bind(base_version)
        .bind(entity_type)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Underlying pool, shared with the conflict log
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the queue
    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn row_to_intent(row: sqlx::sqlite::SqliteRow) -> SyncResult<WriteIntent> {
    let id: String = row.try_get("id")?;
    let action: String = row.try_get("action")?;
    let payload: String = row.try_get("payload")?;
    let enqueued_at: String = row.try_get("enqueued_at")?;

    Ok(WriteIntent {
        id: Uuid::parse_str(&id)
            .map_err(|e| SyncError::Internal(format!("Invalid UUID: {}", e)))?,
        action: WriteAction::from_str(&action)?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        payload: serde_json::from_str(&payload)?,
        base_version: row.try_get("base_version")?,
        enqueued_at: DateTime::parse_from_rfc3339(&enqueued_at)
            .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {}", e)))?
            .with_timezone(&Utc),
    })
}
