//! Local entity cache with pending-sync flags
//!
//! Keyed cache of optimistically mutated entities. The `pending_sync` flag
//! is a purely local concern: it turns on at the moment of an offline
//! mutation and only the reconciliation engine turns it off, once the
//! matching intent is confirmed applied. A remote read never clears it.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A cached domain entity plus its local sync state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEntity {
    pub entity_type: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
    /// Remote version this payload is based on, if known
    pub version: Option<i64>,
    /// True from optimistic mutation until reconciliation confirms it
    pub pending_sync: bool,
}

type Key = (String, String);

/// In-memory keyed cache of domain entities
#[derive(Debug, Default)]
pub struct LocalEntityStore {
    entities: DashMap<Key, LocalEntity>,
}

impl LocalEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(entity_type: &str, entity_id: &str) -> Key {
        (entity_type.to_string(), entity_id.to_string())
    }

    /// Record an optimistic local mutation
    pub fn upsert_local(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: serde_json::Value,
        version: Option<i64>,
        pending_sync: bool,
    ) {
        self.entities.insert(
            Self::key(entity_type, entity_id),
            LocalEntity {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
                payload,
                version,
                pending_sync,
            },
        );
    }

    /// Merge state read back from the remote store
    ///
    /// Updates payload and version but preserves an existing
    /// `pending_sync = true`: only the reconciliation engine clears the
    /// flag, so a fetch racing a queued intent cannot hide pending work.
    pub fn apply_remote(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: serde_json::Value,
        version: i64,
    ) {
        let key = Self::key(entity_type, entity_id);
        let pending = self
            .entities
            .get(&key)
            .map(|e| e.pending_sync)
            .unwrap_or(false);

        self.entities.insert(
            key,
            LocalEntity {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
                payload,
                version: Some(version),
                pending_sync: pending,
            },
        );
    }

    /// Set or clear the pending flag
    pub fn mark_pending(&self, entity_type: &str, entity_id: &str, pending: bool) {
        if let Some(mut entity) = self.entities.get_mut(&Self::key(entity_type, entity_id)) {
            entity.pending_sync = pending;
        }
    }

    /// Update the known remote version without touching the payload
    pub fn set_version(&self, entity_type: &str, entity_id: &str, version: i64) {
        if let Some(mut entity) = self.entities.get_mut(&Self::key(entity_type, entity_id)) {
            entity.version = Some(version);
        }
    }

    pub fn get(&self, entity_type: &str, entity_id: &str) -> Option<LocalEntity> {
        self.entities
            .get(&Self::key(entity_type, entity_id))
            .map(|e| e.clone())
    }

    /// All cached entities of a type
    pub fn get_all(&self, entity_type: &str) -> Vec<LocalEntity> {
        self.entities
            .iter()
            .filter(|e| e.key().0 == entity_type)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn is_pending(&self, entity_type: &str, entity_id: &str) -> bool {
        self.entities
            .get(&Self::key(entity_type, entity_id))
            .map(|e| e.pending_sync)
            .unwrap_or(false)
    }

    /// Remove an entity from the cache (e.g., after a confirmed delete)
    pub fn remove(&self, entity_type: &str, entity_id: &str) {
        self.entities.remove(&Self::key(entity_type, entity_id));
    }
}
