//! Sync conflict records and their durable log
//!
//! A conflict is created when a queued intent's base version no longer
//! matches the remote store's current version. Conflicts are never resolved
//! by a default policy and never silently discarded: they stay in the log
//! until a human (or explicit caller policy) resolves them.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

/// Resolution status of a sync conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Unresolved,
    AcceptedLocal,
    AcceptedRemote,
    Merged,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::Unresolved => "unresolved",
            ConflictResolution::AcceptedLocal => "accepted_local",
            ConflictResolution::AcceptedRemote => "accepted_remote",
            ConflictResolution::Merged => "merged",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "unresolved" => Ok(ConflictResolution::Unresolved),
            "accepted_local" => Ok(ConflictResolution::AcceptedLocal),
            "accepted_remote" => Ok(ConflictResolution::AcceptedRemote),
            "merged" => Ok(ConflictResolution::Merged),
            _ => Err(SyncError::InvalidOperation(format!(
                "Unknown resolution: {}",
                s
            ))),
        }
    }
}

/// A detected divergence between a queued intent and the remote store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Unique conflict ID
    pub id: Uuid,

    /// The queued intent held pending resolution
    pub intent_id: Uuid,

    /// Entity type (e.g., "patient", "appointment")
    pub entity_type: String,

    /// Entity ID
    pub entity_id: String,

    /// Local payload from the held intent
    pub local_payload: serde_json::Value,

    /// Remote payload at detection time
    pub remote_payload: serde_json::Value,

    /// Remote version at detection time
    pub remote_version: i64,

    /// When the conflict was detected
    pub detected_at: DateTime<Utc>,

    /// Resolution status
    pub resolution: ConflictResolution,

    /// When it was resolved, if it has been
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    pub fn new(
        intent_id: Uuid,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        local_payload: serde_json::Value,
        remote_payload: serde_json::Value,
        remote_version: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent_id,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            local_payload,
            remote_payload,
            remote_version,
            detected_at: Utc::now(),
            resolution: ConflictResolution::Unresolved,
            resolved_at: None,
        }
    }
}

/// Durable log of sync conflicts
///
/// Shares the queue's SQLite pool. Rows are only ever inserted and marked
/// resolved, never deleted.
pub struct ConflictLog {
    pool: SqlitePool,
}

impl ConflictLog {
    /// Create the log over an existing pool
    pub async fn new(pool: SqlitePool) -> SyncResult<Self> {
        let log = Self { pool };
        log.initialize_schema().await?;
        Ok(log)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conflict_log (
                id TEXT PRIMARY KEY,
                intent_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                local_payload TEXT NOT NULL,
                remote_payload TEXT NOT NULL,
                remote_version INTEGER NOT NULL,
                detected_at TEXT NOT NULL,
                resolution TEXT NOT NULL,
                resolved_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conflict_resolution ON conflict_log(resolution)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conflict_entity ON conflict_log(entity_type, entity_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a newly detected conflict
    pub async fn record(&self, conflict: &SyncConflict) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conflict_log (
                id, intent_id, entity_type, entity_id,
                local_payload, remote_payload, remote_version,
                detected_at, resolution, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conflict.id.to_string())
        .bind(conflict.intent_id.to_string())
        .bind(&conflict.entity_type)
        .bind(&conflict.entity_id)
        .bind(conflict.local_payload.to_string())
        .bind(conflict.remote_payload.to_string())
        .bind(conflict.remote_version)
        .bind(conflict.detected_at.to_rfc3339())
        .bind(conflict.resolution.as_str())
        .bind(conflict.resolved_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            conflict_id = %conflict.id,
            entity_type = %conflict.entity_type,
            entity_id = %conflict.entity_id,
            remote_version = conflict.remote_version,
            "Sync conflict detected"
        );

        Ok(())
    }

    /// A conflict by ID
    pub async fn get(&self, conflict_id: Uuid) -> SyncResult<Option<SyncConflict>> {
        let row = sqlx::query(
            r#"
            SELECT id, intent_id, entity_type, entity_id,
                   local_payload, remote_payload, remote_version,
                   detected_at, resolution, resolved_at
            FROM conflict_log
            WHERE id = ?
            "#,
        )
        .bind(conflict_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_conflict).transpose()
    }

    /// All unresolved conflicts, oldest first
    pub async fn unresolved(&self) -> SyncResult<Vec<SyncConflict>> {
        let rows = sqlx::query(
            r#"
            SELECT id, intent_id, entity_type, entity_id,
                   local_payload, remote_payload, remote_version,
                   detected_at, resolution, resolved_at
            FROM conflict_log
            WHERE resolution = 'unresolved'
            ORDER BY detected_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_conflict).collect()
    }

    /// Mark a conflict resolved
    pub async fn mark_resolved(
        &self,
        conflict_id: Uuid,
        resolution: ConflictResolution,
    ) -> SyncResult<()> {
        if resolution == ConflictResolution::Unresolved {
            return Err(SyncError::InvalidOperation(
                "Cannot resolve a conflict to unresolved".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE conflict_log
            SET resolution = ?, resolved_at = ?
            WHERE id = ? AND resolution = 'unresolved'
            "#,
        )
        .bind(resolution.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(conflict_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!(
                "Unresolved conflict {}",
                conflict_id
            )));
        }

        Ok(())
    }
}

fn row_to_conflict(row: sqlx::sqlite::SqliteRow) -> SyncResult<SyncConflict> {
    let id: String = row.try_get("id")?;
    let intent_id: String = row.try_get("intent_id")?;
    let local_payload: String = row.try_get("local_payload")?;
    let remote_payload: String = row.try_get("remote_payload")?;
    let detected_at: String = row.try_get("detected_at")?;
    let resolution: String = row.try_get("resolution")?;
    let resolved_at: Option<String> = row.try_get("resolved_at")?;

    Ok(SyncConflict {
        id: Uuid::parse_str(&id)
            .map_err(|e| SyncError::Internal(format!("Invalid UUID: {}", e)))?,
        intent_id: Uuid::parse_str(&intent_id)
            .map_err(|e| SyncError::Internal(format!("Invalid UUID: {}", e)))?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        local_payload: serde_json::from_str(&local_payload)?,
        remote_payload: serde_json::from_str(&remote_payload)?,
        remote_version: row.try_get("remote_version")?,
        detected_at: DateTime::parse_from_rfc3339(&detected_at)
            .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {}", e)))?
            .with_timezone(&Utc),
        resolution: ConflictResolution::from_str(&resolution)?,
        resolved_at: resolved_at
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {}", e)))
            })
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    async fn create_test_log() -> (ConflictLog, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_url = format!("sqlite:{}", temp_file.path().to_str().unwrap());
        let pool = SqlitePool::connect(&db_url).await.unwrap();
        (ConflictLog::new(pool).await.unwrap(), temp_file)
    }

    fn sample_conflict() -> SyncConflict {
        SyncConflict::new(
            Uuid::new_v4(),
            "patient",
            "p1",
            json!({"phone": "local"}),
            json!({"phone": "remote"}),
            4,
        )
    }

    #[tokio::test]
    async fn test_record_and_get() {
        let (log, _file) = create_test_log().await;
        let conflict = sample_conflict();

        log.record(&conflict).await.unwrap();

        let loaded = log.get(conflict.id).await.unwrap().unwrap();
        assert_eq!(loaded.intent_id, conflict.intent_id);
        assert_eq!(loaded.resolution, ConflictResolution::Unresolved);
        assert_eq!(loaded.local_payload["phone"], "local");
        assert_eq!(loaded.remote_version, 4);
    }

    #[tokio::test]
    async fn test_unresolved_listing() {
        let (log, _file) = create_test_log().await;

        let first = sample_conflict();
        let second = sample_conflict();
        log.record(&first).await.unwrap();
        log.record(&second).await.unwrap();

        log.mark_resolved(first.id, ConflictResolution::AcceptedRemote)
            .await
            .unwrap();

        let unresolved = log.unresolved().await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id, second.id);
    }

    #[tokio::test]
    async fn test_mark_resolved_sets_timestamp() {
        let (log, _file) = create_test_log().await;
        let conflict = sample_conflict();
        log.record(&conflict).await.unwrap();

        log.mark_resolved(conflict.id, ConflictResolution::Merged)
            .await
            .unwrap();

        let loaded = log.get(conflict.id).await.unwrap().unwrap();
        assert_eq!(loaded.resolution, ConflictResolution::Merged);
        assert!(loaded.resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_cannot_resolve_twice() {
        let (log, _file) = create_test_log().await;
        let conflict = sample_conflict();
        log.record(&conflict).await.unwrap();

        log.mark_resolved(conflict.id, ConflictResolution::AcceptedLocal)
            .await
            .unwrap();

        let result = log
            .mark_resolved(conflict.id, ConflictResolution::AcceptedRemote)
            .await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cannot_resolve_to_unresolved() {
        let (log, _file) = create_test_log().await;
        let conflict = sample_conflict();
        log.record(&conflict).await.unwrap();

        let result = log
            .mark_resolved(conflict.id, ConflictResolution::Unresolved)
            .await;
        assert!(matches!(result, Err(SyncError::InvalidOperation(_))));
    }
}
