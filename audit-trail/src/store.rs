//! Durable SQLite backing for the audit chain
//!
//! The table is append-only: entries are inserted and read back, never
//! updated or deleted. On startup a recorder reloads the full sequence and
//! rebuilds its in-memory chain, so the trail survives process restarts.

use crate::entry::{Actor, AuditAction, AuditEntry};
use crate::error::{AuditError, AuditResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;
use uuid::Uuid;

/// Audit store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStoreConfig {
    /// Path to the audit database file
    pub db_path: String,
}

impl Default for AuditStoreConfig {
    fn default() -> Self {
        Self {
            db_path: "chairside_audit.db".to_string(),
        }
    }
}

/// SQLite-backed audit entry store
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    /// Open (or create) the audit database
    pub async fn new(config: AuditStoreConfig) -> AuditResult<Self> {
        // Restrict file permissions before the pool creates the database
        #[cfg(unix)]
        {
            use std::fs;
            use std::os::unix::fs::PermissionsExt;

            if !Path::new(&config.db_path).exists() {
                fs::File::create(&config.db_path).map_err(|e| {
                    AuditError::Internal(format!("Failed to create audit file: {}", e))
                })?;

                let permissions = fs::Permissions::from_mode(0o600);
                fs::set_permissions(&config.db_path, permissions).map_err(|e| {
                    AuditError::Internal(format!("Failed to set audit file permissions: {}", e))
                })?;
            }
        }

        let db_url = format!("sqlite:{}", config.db_path);
        let pool = SqlitePool::connect(&db_url).await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        Ok(store)
    }

    async fn initialize_schema(&self) -> AuditResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                actor_name TEXT NOT NULL,
                impersonated_by TEXT,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                details TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_log(actor_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Append a finalized entry
    pub async fn append(&self, entry: &AuditEntry) -> AuditResult<()> {
        let impersonated_by = entry
            .impersonated_by
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, timestamp, actor_id, actor_name, impersonated_by,
                action, entity_type, entity_id, details,
                previous_hash, hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.actor_id)
        .bind(&entry.actor_name)
        .bind(impersonated_by)
        .bind(entry.action.as_str())
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.details)
        .bind(&entry.previous_hash)
        .bind(&entry.hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the full trail in insertion order, oldest first
    pub async fn load_all(&self) -> AuditResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, actor_id, actor_name, impersonated_by,
                   action, entity_type, entity_id, details,
                   previous_hash, hash
            FROM audit_log
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let timestamp: String = row.try_get("timestamp")?;
            let action: String = row.try_get("action")?;
            let impersonated_by: Option<String> = row.try_get("impersonated_by")?;

            let impersonated_by: Option<Actor> = impersonated_by
                .map(|s| serde_json::from_str(&s))
                .transpose()?;

            entries.push(AuditEntry {
                id: Uuid::parse_str(&id)
                    .map_err(|e| AuditError::Internal(format!("Invalid UUID: {}", e)))?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| AuditError::Internal(format!("Invalid timestamp: {}", e)))?
                    .with_timezone(&Utc),
                actor_id: row.try_get("actor_id")?,
                actor_name: row.try_get("actor_name")?,
                impersonated_by,
                action: AuditAction::from_str(&action)?,
                entity_type: row.try_get("entity_type")?,
                entity_id: row.try_get("entity_id")?,
                details: row.try_get("details")?,
                previous_hash: row.try_get("previous_hash")?,
                hash: row.try_get("hash")?,
            });
        }

        Ok(entries)
    }

    /// Close the store
    pub async fn close(self) {
        self.pool.close().await;
    }
}
