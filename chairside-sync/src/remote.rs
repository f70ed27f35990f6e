//! Abstract remote store boundary
//!
//! The authoritative backend is modelled as a trait; transport (REST, RPC)
//! is the caller's concern. Versions are monotonically increasing per
//! entity and drive conflict detection during reconciliation.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Entity state as held by the remote store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub payload: serde_json::Value,
    pub version: i64,
}

/// The authoritative backend
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current record for an entity, or `None` if it does not exist
    async fn get(&self, entity_type: &str, entity_id: &str) -> SyncResult<Option<RemoteRecord>>;

    /// Persist an entity snapshot
    ///
    /// `base_version` is the version the write was computed against; a
    /// remote enforcing optimistic concurrency returns
    /// [`SyncError::RemoteConflict`] when it no longer matches.
    async fn save(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: serde_json::Value,
        base_version: Option<i64>,
    ) -> SyncResult<RemoteRecord>;

    /// Delete an entity
    async fn delete(&self, entity_type: &str, entity_id: &str) -> SyncResult<()>;
}

#[derive(Debug, Default)]
struct RemoteState {
    records: HashMap<(String, String), RemoteRecord>,
    save_order: Vec<(String, String, serde_json::Value)>,
    allow_saves: usize,
    fail_next_saves: usize,
}

impl RemoteState {
    fn take_failure(&mut self) -> bool {
        if self.allow_saves > 0 {
            self.allow_saves -= 1;
            return false;
        }
        if self.fail_next_saves > 0 {
            self.fail_next_saves -= 1;
            return true;
        }
        false
    }
}

/// In-memory remote store with optimistic version checks
///
/// Useful as a stand-in backend in tests and demos: it records the order in
/// which saves arrive and can inject transient failures.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    state: RwLock<RemoteState>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity at a given version, bypassing the save log
    pub async fn seed(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: serde_json::Value,
        version: i64,
    ) {
        let mut state = self.state.write().await;
        state.records.insert(
            (entity_type.to_string(), entity_id.to_string()),
            RemoteRecord { payload, version },
        );
    }

    /// Make the next `n` saves fail with a transient network error
    pub async fn fail_next_saves(&self, n: usize) {
        let mut state = self.state.write().await;
        state.allow_saves = 0;
        state.fail_next_saves = n;
    }

    /// Let `successes` saves through, then fail the following `failures`
    pub async fn fail_after_successes(&self, successes: usize, failures: usize) {
        let mut state = self.state.write().await;
        state.allow_saves = successes;
        state.fail_next_saves = failures;
    }

    /// Order in which saves were accepted: `(entity_type, entity_id, payload)`
    pub async fn save_order(&self) -> Vec<(String, String, serde_json::Value)> {
        self.state.read().await.save_order.clone()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, entity_type: &str, entity_id: &str) -> SyncResult<Option<RemoteRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned())
    }

    async fn save(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: serde_json::Value,
        base_version: Option<i64>,
    ) -> SyncResult<RemoteRecord> {
        let mut state = self.state.write().await;

        if state.take_failure() {
            return Err(SyncError::Network("simulated outage".to_string()));
        }

        let key = (entity_type.to_string(), entity_id.to_string());
        let current_version = state.records.get(&key).map(|r| r.version);

        // Optimistic concurrency: a supplied base version must match the
        // current one.
        if let (Some(base), Some(current)) = (base_version, current_version) {
            if base != current {
                return Err(SyncError::RemoteConflict(format!(
                    "{}/{}: base version {} but remote is at {}",
                    entity_type, entity_id, base, current
                )));
            }
        }

        let record = RemoteRecord {
            payload: payload.clone(),
            version: current_version.unwrap_or(0) + 1,
        };
        state.records.insert(key, record.clone());
        state
            .save_order
            .push((entity_type.to_string(), entity_id.to_string(), payload));

        Ok(record)
    }

    async fn delete(&self, entity_type: &str, entity_id: &str) -> SyncResult<()> {
        let mut state = self.state.write().await;

        if state.take_failure() {
            return Err(SyncError::Network("simulated outage".to_string()));
        }

        state
            .records
            .remove(&(entity_type.to_string(), entity_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_increments_version() {
        let remote = InMemoryRemoteStore::new();

        let first = remote
            .save("patient", "p1", json!({"v": 1}), None)
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        let second = remote
            .save("patient", "p1", json!({"v": 2}), Some(1))
            .await
            .unwrap();
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn test_stale_base_version_rejected() {
        let remote = InMemoryRemoteStore::new();
        remote.seed("patient", "p1", json!({"v": 1}), 3).await;

        let result = remote.save("patient", "p1", json!({"v": 2}), Some(2)).await;
        assert!(matches!(result, Err(SyncError::RemoteConflict(_))));
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let remote = InMemoryRemoteStore::new();
        remote.fail_next_saves(1).await;

        let err = remote
            .save("patient", "p1", json!({}), None)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        // Next save succeeds
        remote.save("patient", "p1", json!({}), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_after_successes() {
        let remote = InMemoryRemoteStore::new();
        remote.fail_after_successes(2, 1).await;

        remote.save("patient", "p1", json!({}), None).await.unwrap();
        remote.save("patient", "p2", json!({}), None).await.unwrap();
        assert!(remote.save("patient", "p3", json!({}), None).await.is_err());
        remote.save("patient", "p3", json!({}), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_order_recorded() {
        let remote = InMemoryRemoteStore::new();

        remote.save("patient", "p1", json!({"n": 1}), None).await.unwrap();
        remote
            .save("appointment", "a1", json!({"n": 2}), None)
            .await
            .unwrap();

        let order = remote.save_order().await;
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].1, "p1");
        assert_eq!(order[1].1, "a1");
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let remote = InMemoryRemoteStore::new();
        remote.seed("patient", "p1", json!({}), 1).await;

        remote.delete("patient", "p1").await.unwrap();
        assert!(remote.get("patient", "p1").await.unwrap().is_none());
    }
}
