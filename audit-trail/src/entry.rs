//! Audit entry types and hashing
//!
//! Every entry embeds a SHA-256 hash of its payload and the hash of the
//! entry before it, forming a chain where any retroactive edit breaks
//! verification.

use crate::error::{AuditError, AuditResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Previous-hash value of the first entry in a chain (64 zero characters).
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// A user on whose behalf actions are performed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Audit action type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Record was created
    Create,
    /// Record was updated
    Update,
    /// Record status changed (e.g., appointment confirmed)
    UpdateStatus,
    /// Record was deleted
    Delete,
    /// Document was signed
    Sign,
    /// User logged in
    Login,
    /// User logged out
    Logout,
    /// Security-relevant event (failed verification, lockout)
    SecurityAlert,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::UpdateStatus => "update_status",
            AuditAction::Delete => "delete",
            AuditAction::Sign => "sign",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::SecurityAlert => "security_alert",
        }
    }

    pub fn from_str(s: &str) -> AuditResult<Self> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "update_status" => Ok(AuditAction::UpdateStatus),
            "delete" => Ok(AuditAction::Delete),
            "sign" => Ok(AuditAction::Sign),
            "login" => Ok(AuditAction::Login),
            "logout" => Ok(AuditAction::Logout),
            "security_alert" => Ok(AuditAction::SecurityAlert),
            _ => Err(AuditError::InvalidAction(s.to_string())),
        }
    }
}

/// A single, immutable audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique audit entry ID
    pub id: Uuid,

    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,

    /// Effective user performing the action
    pub actor_id: String,

    /// Display name of the effective user
    pub actor_name: String,

    /// Real logged-in user, if this session impersonates `actor_id`
    pub impersonated_by: Option<Actor>,

    /// Action performed
    pub action: AuditAction,

    /// Entity type (e.g., "patient", "appointment")
    pub entity_type: String,

    /// Entity ID
    pub entity_id: String,

    /// Human-readable summary (e.g., field-level diff)
    pub details: String,

    /// Hash of the previous entry, or [`GENESIS_HASH`] for the first
    pub previous_hash: String,

    /// Hash of this entry
    pub hash: String,
}

impl AuditEntry {
    /// Create a new entry linked to `previous_hash`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        actor: &Actor,
        impersonated_by: Option<Actor>,
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        details: impl Into<String>,
        previous_hash: String,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            impersonated_by,
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            details: details.into(),
            previous_hash,
            hash: String::new(),
        };

        entry.hash = entry.compute_hash();
        entry
    }

    /// Compute the cryptographic hash of this entry's payload
    ///
    /// The payload is `timestamp|actor_id|action|entity_id|previous_hash`;
    /// changing any of those fields after the fact invalidates the chain.
    pub fn compute_hash(&self) -> String {
        let payload = format!(
            "{}|{}|{}|{}|{}",
            self.timestamp.to_rfc3339(),
            self.actor_id,
            self.action.as_str(),
            self.entity_id,
            self.previous_hash,
        );

        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
