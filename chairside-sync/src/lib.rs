//! Offline-first write reconciliation engine for Chairside
//!
//! Provides:
//! - Durable FIFO queue of pending write intents (SQLite)
//! - Optimistic local entity cache with pending-sync flags
//! - Connectivity monitoring with guaranteed transition delivery
//! - Reconciliation against an abstract remote store with explicit,
//!   human-resolved conflicts
//! - A tamper-evident audit entry for every reconciled write
//!   (via the `audit-trail` crate)

pub mod conflict;
pub mod connectivity;
pub mod error;
pub mod intent;
pub mod local_store;
pub mod queue;
pub mod reconcile;
pub mod remote;

pub use conflict::{ConflictLog, ConflictResolution, SyncConflict};
pub use connectivity::{ConnectivityConfig, ConnectivityMonitor};
pub use error::{SyncError, SyncResult};
pub use intent::{WriteAction, WriteIntent};
pub use local_store::{LocalEntity, LocalEntityStore};
pub use queue::{WriteQueue, WriteQueueConfig};
pub use reconcile::{ConflictChoice, FlushReport, ReconciliationEngine};
pub use remote::{InMemoryRemoteStore, RemoteRecord, RemoteStore};

use audit_trail::{AuditRecorder, AuditStore, AuditStoreConfig, SessionContext, VerificationResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Sync engine configuration
#[derive(Debug, Clone, Default)]
pub struct SyncEngineConfig {
    /// Write queue storage
    pub queue: WriteQueueConfig,
    /// Durable audit storage; `None` keeps the trail in memory
    pub audit_store: Option<AuditStoreConfig>,
    /// Connectivity monitoring
    pub connectivity: ConnectivityConfig,
}

/// What happened to a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Sent directly to the remote store
    Applied { version: Option<i64> },
    /// Queued for reconciliation; the entity is flagged `pending_sync`
    Queued { intent_id: Uuid },
}

/// Facade wiring the offline-first components together
///
/// A UI action calls [`SyncEngine::mutate`]: the local cache is updated
/// optimistically, then the write either goes straight to the remote store
/// (online) or into the durable queue (offline). Reporting the transition
/// back to online triggers a reconciliation flush.
pub struct SyncEngine {
    session: SessionContext,
    recorder: Arc<AuditRecorder>,
    queue: Arc<WriteQueue>,
    local: Arc<LocalEntityStore>,
    conflicts: Arc<ConflictLog>,
    monitor: Arc<ConnectivityMonitor>,
    remote: Arc<dyn RemoteStore>,
    engine: ReconciliationEngine,
    flush_requested: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Create a new sync engine
    pub async fn new(
        config: SyncEngineConfig,
        remote: Arc<dyn RemoteStore>,
        session: SessionContext,
    ) -> SyncResult<Self> {
        let recorder = match config.audit_store {
            Some(store_config) => {
                let store = AuditStore::new(store_config).await?;
                Arc::new(AuditRecorder::with_store(session.clone(), store).await?)
            }
            None => Arc::new(AuditRecorder::new(session.clone())),
        };

        let queue = Arc::new(WriteQueue::new(config.queue).await?);
        let conflicts = Arc::new(ConflictLog::new(queue.pool().clone()).await?);
        let local = Arc::new(LocalEntityStore::new());
        let monitor = Arc::new(ConnectivityMonitor::new(config.connectivity));

        // An online transition requests a flush; the request is drained by
        // set_online so the flush runs on the caller's task.
        let flush_requested = Arc::new(AtomicBool::new(false));
        let requested = Arc::clone(&flush_requested);
        monitor.on_change(move |online| {
            if online {
                requested.store(true, Ordering::SeqCst);
            }
        });

        let engine = ReconciliationEngine::new(
            Arc::clone(&queue),
            Arc::clone(&local),
            Arc::clone(&conflicts),
            Arc::clone(&remote),
            Arc::clone(&recorder),
            Arc::clone(&monitor),
        );

        Ok(Self {
            session,
            recorder,
            queue,
            local,
            conflicts,
            monitor,
            remote,
            engine,
            flush_requested,
        })
    }

    /// Apply a mutation optimistically, online or offline
    ///
    /// Refuses when no actor is authenticated: unauthenticated sessions
    /// perform no mutations. Online mutations go straight to the remote
    /// store and are audited immediately; offline mutations are flagged
    /// `pending_sync` and queued as durable write intents.
    pub async fn mutate(
        &self,
        action: WriteAction,
        entity_type: &str,
        entity_id: &str,
        payload: serde_json::Value,
        details: &str,
    ) -> SyncResult<MutationOutcome> {
        if !self.session.is_authenticated() {
            return Err(SyncError::InvalidOperation(
                "Mutation attempted with no authenticated actor".to_string(),
            ));
        }

        let base_version = self
            .local
            .get(entity_type, entity_id)
            .and_then(|e| e.version);

        if self.monitor.is_online() {
            let version = match action {
                WriteAction::DeleteEntity => {
                    self.remote.delete(entity_type, entity_id).await?;
                    self.local.remove(entity_type, entity_id);
                    None
                }
                _ => {
                    let record = self
                        .remote
                        .save(entity_type, entity_id, payload.clone(), base_version)
                        .await?;
                    self.local.upsert_local(
                        entity_type,
                        entity_id,
                        payload,
                        Some(record.version),
                        false,
                    );
                    Some(record.version)
                }
            };

            self.recorder
                .record(action.audit_action(), entity_type, entity_id, details)
                .await?;

            return Ok(MutationOutcome::Applied { version });
        }

        // Durably queue the intent before flagging the cache; a failed
        // enqueue must not leave a pending entity with nothing to flush.
        let intent = WriteIntent::new(
            action,
            entity_type,
            entity_id,
            payload.clone(),
            base_version,
        );
        self.queue.enqueue(&intent).await?;
        self.local
            .upsert_local(entity_type, entity_id, payload, base_version, true);

        Ok(MutationOutcome::Queued {
            intent_id: intent.id,
        })
    }

    /// Report a connectivity change
    ///
    /// A transition to online triggers a flush cycle and returns its report.
    pub async fn set_online(&self, online: bool) -> SyncResult<Option<FlushReport>> {
        self.monitor.set_online(online);

        if self.flush_requested.swap(false, Ordering::SeqCst) {
            return Ok(Some(self.engine.flush().await?));
        }
        Ok(None)
    }

    /// Manually trigger a flush cycle (e.g., a "retry sync" button)
    pub async fn flush(&self) -> SyncResult<FlushReport> {
        self.engine.flush().await
    }

    /// Resolve a sync conflict with an explicit choice
    pub async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        choice: ConflictChoice,
    ) -> SyncResult<()> {
        self.engine.resolve_conflict(conflict_id, choice).await
    }

    /// Conflicts awaiting resolution, oldest first
    pub async fn pending_conflicts(&self) -> SyncResult<Vec<SyncConflict>> {
        self.conflicts.unresolved().await
    }

    /// Verify the audit trail recorded so far
    pub async fn verify_audit_trail(&self) -> VerificationResult {
        self.recorder.verify().await
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    pub fn local(&self) -> &LocalEntityStore {
        &self.local
    }

    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_trail::{Actor, AuditAction};
    use serde_json::json;
    use tempfile::NamedTempFile;

    async fn create_test_engine() -> (SyncEngine, Arc<InMemoryRemoteStore>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let config = SyncEngineConfig {
            queue: WriteQueueConfig {
                db_path: temp_file.path().to_str().unwrap().to_string(),
                ..Default::default()
            },
            audit_store: None,
            connectivity: ConnectivityConfig {
                initially_online: true,
            },
        };

        let remote = Arc::new(InMemoryRemoteStore::new());
        let session = SessionContext::new();
        session.authenticate(Actor::new("u1", "Dr. Adams"));

        let engine = SyncEngine::new(config, Arc::clone(&remote) as Arc<dyn RemoteStore>, session)
            .await
            .unwrap();

        (engine, remote, temp_file)
    }

    #[tokio::test]
    async fn test_engine_creation() {
        let (engine, _remote, _file) = create_test_engine().await;
        assert!(engine.is_online());
        assert!(engine.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_unauthenticated_mutation_refused() {
        let (engine, _remote, _file) = create_test_engine().await;
        engine.session().clear();

        let result = engine
            .mutate(
                WriteAction::CreateEntity,
                "patient",
                "p1",
                json!({}),
                "created",
            )
            .await;

        assert!(matches!(result, Err(SyncError::InvalidOperation(_))));
        assert!(engine.recorder().is_empty().await);
    }

    #[tokio::test]
    async fn test_online_mutation_applies_directly() {
        let (engine, remote, _file) = create_test_engine().await;

        let outcome = engine
            .mutate(
                WriteAction::CreateEntity,
                "patient",
                "p1",
                json!({"name": "Ann"}),
                "created patient record",
            )
            .await
            .unwrap();

        assert_eq!(outcome, MutationOutcome::Applied { version: Some(1) });
        assert!(!engine.local().is_pending("patient", "p1"));
        assert!(engine.queue().is_empty().await.unwrap());
        assert_eq!(remote.save_order().await.len(), 1);
        assert_eq!(engine.recorder().len().await, 1);
    }

    #[tokio::test]
    async fn test_offline_mutation_queues() {
        let (engine, remote, _file) = create_test_engine().await;
        engine.set_online(false).await.unwrap();

        let outcome = engine
            .mutate(
                WriteAction::CreateEntity,
                "patient",
                "p1",
                json!({"name": "Ann"}),
                "created patient record",
            )
            .await
            .unwrap();

        assert!(matches!(outcome, MutationOutcome::Queued { .. }));
        assert!(engine.local().is_pending("patient", "p1"));
        assert_eq!(engine.queue().len().await.unwrap(), 1);
        assert!(remote.save_order().await.is_empty());
        // Audit entry is recorded when the intent is applied, not before
        assert!(engine.recorder().is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_enqueue_leaves_no_pending_flag() {
        let (engine, _remote, _file) = create_test_engine().await;
        engine.set_online(false).await.unwrap();

        // Force the enqueue to fail
        engine.queue().pool().close().await;

        let result = engine
            .mutate(
                WriteAction::UpdateEntity,
                "patient",
                "p1",
                json!({"phone": "555"}),
                "updated phone",
            )
            .await;

        assert!(result.is_err());
        // No orphaned pending entity: nothing is queued, so nothing may
        // claim to be awaiting sync.
        assert!(!engine.local().is_pending("patient", "p1"));
        assert!(engine.local().get("patient", "p1").is_none());
    }

    #[tokio::test]
    async fn test_reconnect_triggers_flush() {
        let (engine, remote, _file) = create_test_engine().await;

        engine.set_online(false).await.unwrap();
        engine
            .mutate(
                WriteAction::CreateEntity,
                "patient",
                "p1",
                json!({"name": "Ann"}),
                "created",
            )
            .await
            .unwrap();

        let report = engine.set_online(true).await.unwrap().unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(remote.save_order().await.len(), 1);
        assert!(!engine.local().is_pending("patient", "p1"));
    }

    #[tokio::test]
    async fn test_flush_triggered_after_rapid_blip() {
        let (engine, remote, _file) = create_test_engine().await;

        // First reconnect with nothing queued
        engine.set_online(false).await.unwrap();
        engine.set_online(true).await.unwrap();

        // Blip immediately afterwards, with a write queued while offline;
        // the second resume signal must still flush.
        engine.set_online(false).await.unwrap();
        engine
            .mutate(
                WriteAction::CreateEntity,
                "patient",
                "p1",
                json!({"name": "Ann"}),
                "created",
            )
            .await
            .unwrap();

        let report = engine.set_online(true).await.unwrap().unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(remote.save_order().await.len(), 1);
    }

    // Full walkthrough: create online, update offline, reconnect, verify.
    #[tokio::test]
    async fn test_offline_edit_round_trip() {
        let (engine, remote, _file) = create_test_engine().await;

        engine
            .mutate(
                WriteAction::CreateEntity,
                "patient",
                "p1",
                json!({"name": "Ann", "phone": "555-0100"}),
                "created patient record",
            )
            .await
            .unwrap();
        assert_eq!(engine.recorder().len().await, 1);

        engine.set_online(false).await.unwrap();
        engine
            .mutate(
                WriteAction::UpdateEntity,
                "patient",
                "p1",
                json!({"name": "Ann", "phone": "555-0199"}),
                "phone: 555-0100 -> 555-0199",
            )
            .await
            .unwrap();

        assert_eq!(engine.queue().len().await.unwrap(), 1);
        assert!(engine.local().is_pending("patient", "p1"));

        let report = engine.set_online(true).await.unwrap().unwrap();
        assert_eq!(report.applied.len(), 1);
        assert!(report.conflicts.is_empty());

        assert!(engine.queue().is_empty().await.unwrap());
        assert!(!engine.local().is_pending("patient", "p1"));

        let record = remote.get("patient", "p1").await.unwrap().unwrap();
        assert_eq!(record.payload["phone"], "555-0199");
        assert_eq!(record.version, 2);

        // Two audit entries, chained and verifying
        let entries = engine.recorder().entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Create);
        assert_eq!(entries[1].action, AuditAction::Update);
        assert_eq!(entries[1].previous_hash, entries[0].hash);
        assert!(engine.verify_audit_trail().await.valid);
    }

    #[tokio::test]
    async fn test_concurrent_remote_edit_surfaces_conflict() {
        let (engine, remote, _file) = create_test_engine().await;

        engine
            .mutate(
                WriteAction::CreateEntity,
                "patient",
                "p1",
                json!({"phone": "555-0100"}),
                "created",
            )
            .await
            .unwrap();

        engine.set_online(false).await.unwrap();
        engine
            .mutate(
                WriteAction::UpdateEntity,
                "patient",
                "p1",
                json!({"phone": "555-0199"}),
                "updated phone",
            )
            .await
            .unwrap();

        // Someone else edits the same patient while we are offline
        remote
            .save("patient", "p1", json!({"phone": "555-0777"}), Some(1))
            .await
            .unwrap();

        let report = engine.set_online(true).await.unwrap().unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.conflicts.len(), 1);

        // The stale payload was not applied and the conflict is actionable
        let record = remote.get("patient", "p1").await.unwrap().unwrap();
        assert_eq!(record.payload["phone"], "555-0777");

        let pending = engine.pending_conflicts().await.unwrap();
        assert_eq!(pending.len(), 1);

        engine
            .resolve_conflict(pending[0].id, ConflictChoice::AcceptLocal)
            .await
            .unwrap();
        let report = engine.flush().await.unwrap();
        assert_eq!(report.applied.len(), 1);

        let record = remote.get("patient", "p1").await.unwrap().unwrap();
        assert_eq!(record.payload["phone"], "555-0199");
    }
}
