//! Write intents: durable representations of pending mutations

use crate::error::{SyncError, SyncResult};
use audit_trail::AuditAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutation kind carried by a write intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    CreateEntity,
    UpdateEntity,
    UpdateStatus,
    DeleteEntity,
}

impl WriteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteAction::CreateEntity => "create_entity",
            WriteAction::UpdateEntity => "update_entity",
            WriteAction::UpdateStatus => "update_status",
            WriteAction::DeleteEntity => "delete_entity",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "create_entity" => Ok(WriteAction::CreateEntity),
            "update_entity" => Ok(WriteAction::UpdateEntity),
            "update_status" => Ok(WriteAction::UpdateStatus),
            "delete_entity" => Ok(WriteAction::DeleteEntity),
            _ => Err(SyncError::InvalidOperation(format!(
                "Unknown write action: {}",
                s
            ))),
        }
    }

    /// Audit action recorded when an intent of this kind is applied
    pub fn audit_action(&self) -> AuditAction {
        match self {
            WriteAction::CreateEntity => AuditAction::Create,
            WriteAction::UpdateEntity => AuditAction::Update,
            WriteAction::UpdateStatus => AuditAction::UpdateStatus,
            WriteAction::DeleteEntity => AuditAction::Delete,
        }
    }

    /// Whether applying this intent requires a stale-base conflict check
    pub fn requires_version_check(&self) -> bool {
        matches!(self, WriteAction::UpdateEntity | WriteAction::UpdateStatus)
    }
}

/// A single pending mutation, queued while offline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteIntent {
    /// Unique intent ID, independent of the entity's own ID
    pub id: Uuid,

    /// Mutation kind
    pub action: WriteAction,

    /// Entity type (e.g., "patient", "appointment")
    pub entity_type: String,

    /// Entity ID
    pub entity_id: String,

    /// Full snapshot of the entity state at enqueue time
    pub payload: serde_json::Value,

    /// Remote version last known at enqueue time; `None` for new entities
    pub base_version: Option<i64>,

    /// When the intent was queued
    pub enqueued_at: DateTime<Utc>,
}

impl WriteIntent {
    pub fn new(
        action: WriteAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
        base_version: Option<i64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            base_version,
            enqueued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_round_trip() {
        assert_eq!(WriteAction::UpdateStatus.as_str(), "update_status");
        assert_eq!(
            WriteAction::from_str("create_entity").unwrap(),
            WriteAction::CreateEntity
        );
        assert!(WriteAction::from_str("upsert").is_err());
    }

    #[test]
    fn test_audit_action_mapping() {
        assert_eq!(
            WriteAction::DeleteEntity.audit_action(),
            AuditAction::Delete
        );
        assert_eq!(
            WriteAction::UpdateStatus.audit_action(),
            AuditAction::UpdateStatus
        );
    }

    #[test]
    fn test_version_check_applies_to_updates_only() {
        assert!(WriteAction::UpdateEntity.requires_version_check());
        assert!(WriteAction::UpdateStatus.requires_version_check());
        assert!(!WriteAction::CreateEntity.requires_version_check());
        assert!(!WriteAction::DeleteEntity.requires_version_check());
    }

    #[test]
    fn test_intent_snapshot() {
        let intent = WriteIntent::new(
            WriteAction::UpdateEntity,
            "patient",
            "p1",
            json!({"phone": "555-0100"}),
            Some(3),
        );

        assert_eq!(intent.entity_id, "p1");
        assert_eq!(intent.base_version, Some(3));
        assert!(!intent.id.is_nil());
    }
}
