//! Reconciliation engine: replays queued intents against the remote store
//!
//! Drains the write queue in FIFO order, detects version divergence, clears
//! pending flags as intents land, and records an audit entry for every
//! applied intent. Flush cycles are single-flight; a transient failure
//! aborts the cycle and leaves the queue untouched for the next one.

use crate::conflict::{ConflictLog, ConflictResolution, SyncConflict};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::intent::{WriteAction, WriteIntent};
use crate::local_store::LocalEntityStore;
use crate::queue::WriteQueue;
use crate::remote::RemoteStore;
use audit_trail::AuditRecorder;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Summary of one flush cycle
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Intents accepted by the remote store this cycle
    pub applied: Vec<WriteIntent>,
    /// Conflicts detected this cycle
    pub conflicts: Vec<SyncConflict>,
    /// Intents still queued after the cycle
    pub remaining: usize,
}

/// How a human (or explicit caller policy) resolves a conflict
#[derive(Debug, Clone)]
pub enum ConflictChoice {
    /// Re-enqueue the locally edited payload against the current remote version
    AcceptLocal,
    /// Discard the local change and pull the remote version into the cache
    AcceptRemote,
    /// Enqueue a caller-supplied merged payload
    AcceptMerged(serde_json::Value),
}

/// Replays queued write intents against the remote store
pub struct ReconciliationEngine {
    queue: Arc<WriteQueue>,
    local: Arc<LocalEntityStore>,
    conflicts: Arc<ConflictLog>,
    remote: Arc<dyn RemoteStore>,
    recorder: Arc<AuditRecorder>,
    monitor: Arc<ConnectivityMonitor>,
    flushing: AtomicBool,
}

impl ReconciliationEngine {
    pub fn new(
        queue: Arc<WriteQueue>,
        local: Arc<LocalEntityStore>,
        conflicts: Arc<ConflictLog>,
        remote: Arc<dyn RemoteStore>,
        recorder: Arc<AuditRecorder>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            queue,
            local,
            conflicts,
            remote,
            recorder,
            monitor,
            flushing: AtomicBool::new(false),
        }
    }

    /// Drain the queue against the remote store
    ///
    /// Re-entrant calls return an empty report immediately: there is never
    /// more than one flush cycle in flight.
    pub async fn flush(&self) -> SyncResult<FlushReport> {
        if self.flushing.swap(true, Ordering::SeqCst) {
            tracing::debug!("Flush already in progress, skipping");
            return Ok(FlushReport {
                remaining: self.queue.len().await?,
                ..Default::default()
            });
        }

        let result = self.flush_cycle().await;
        self.flushing.store(false, Ordering::SeqCst);
        result
    }

    async fn flush_cycle(&self) -> SyncResult<FlushReport> {
        let mut report = FlushReport::default();

        // Entities already held by an unresolved conflict stay held; later
        // intents for them must wait for resolution.
        let mut held: HashSet<(String, String)> = self
            .conflicts
            .unresolved()
            .await?
            .into_iter()
            .map(|c| (c.entity_type, c.entity_id))
            .collect();

        let intents = self.queue.list().await?;
        tracing::debug!(queued = intents.len(), "Starting flush cycle");

        // The queue snapshot above is taken once; versions produced by
        // earlier applies in this cycle live here so later intents for the
        // same entity replay against them, not against their enqueue-time
        // base.
        let mut rebased: HashMap<(String, String), i64> = HashMap::new();

        for intent in intents {
            // Connectivity may drop mid-flush; abort without dequeuing.
            if !self.monitor.is_online() {
                tracing::debug!("Connectivity lost mid-flush, aborting cycle");
                break;
            }

            let key = (intent.entity_type.clone(), intent.entity_id.clone());
            if held.contains(&key) {
                continue;
            }

            let base_version = rebased.get(&key).copied().or(intent.base_version);

            // Stale-base check for update intents.
            if intent.action.requires_version_check() {
                match self.remote.get(&intent.entity_type, &intent.entity_id).await {
                    Ok(Some(record)) => {
                        if record.version > base_version.unwrap_or(0) {
                            let conflict = self.hold_conflict(&intent, record.payload, record.version).await?;
                            report.conflicts.push(conflict);
                            held.insert(key);
                            continue;
                        }
                    }
                    Ok(None) => {}
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, "Transient failure during flush, will retry");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            match self.apply(&intent, base_version).await {
                Ok(new_version) => {
                    self.queue.remove(intent.id).await?;
                    if let Some(version) = new_version {
                        rebased.insert(key, version);
                        self.queue
                            .rebase_entity(&intent.entity_type, &intent.entity_id, version)
                            .await?;
                    }
                    self.recorder
                        .record(
                            intent.action.audit_action(),
                            &intent.entity_type,
                            &intent.entity_id,
                            &format!("applied queued write intent {}", intent.id),
                        )
                        .await?;

                    tracing::debug!(
                        intent_id = %intent.id,
                        entity_type = %intent.entity_type,
                        entity_id = %intent.entity_id,
                        "Applied queued intent"
                    );
                    report.applied.push(intent);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        intent_id = %intent.id,
                        error = %e,
                        "Transient failure during flush, will retry"
                    );
                    break;
                }
                Err(SyncError::RemoteConflict(reason)) => {
                    // The remote rejected the write on its own version check.
                    tracing::warn!(intent_id = %intent.id, reason = %reason, "Remote rejected write");
                    let record = self
                        .remote
                        .get(&intent.entity_type, &intent.entity_id)
                        .await?;
                    let (payload, version) = record
                        .map(|r| (r.payload, r.version))
                        .unwrap_or((serde_json::Value::Null, 0));
                    let conflict = self.hold_conflict(&intent, payload, version).await?;
                    report.conflicts.push(conflict);
                    held.insert(key);
                }
                Err(e) => return Err(e),
            }
        }

        report.remaining = self.queue.len().await?;
        tracing::info!(
            applied = report.applied.len(),
            conflicts = report.conflicts.len(),
            remaining = report.remaining,
            "Flush cycle finished"
        );

        Ok(report)
    }

    /// Apply one intent against `base_version` (the intent's own base, or
    /// the version an earlier apply in the same cycle produced); returns the
    /// new remote version for saves
    async fn apply(
        &self,
        intent: &WriteIntent,
        base_version: Option<i64>,
    ) -> SyncResult<Option<i64>> {
        match intent.action {
            WriteAction::DeleteEntity => {
                self.remote
                    .delete(&intent.entity_type, &intent.entity_id)
                    .await?;
                self.local.remove(&intent.entity_type, &intent.entity_id);
                Ok(None)
            }
            _ => {
                let record = self
                    .remote
                    .save(
                        &intent.entity_type,
                        &intent.entity_id,
                        intent.payload.clone(),
                        base_version,
                    )
                    .await?;
                self.local
                    .set_version(&intent.entity_type, &intent.entity_id, record.version);
                self.local
                    .mark_pending(&intent.entity_type, &intent.entity_id, false);
                Ok(Some(record.version))
            }
        }
    }

    /// Record a conflict and leave its intent queued
    async fn hold_conflict(
        &self,
        intent: &WriteIntent,
        remote_payload: serde_json::Value,
        remote_version: i64,
    ) -> SyncResult<SyncConflict> {
        let conflict = SyncConflict::new(
            intent.id,
            intent.entity_type.clone(),
            intent.entity_id.clone(),
            intent.payload.clone(),
            remote_payload,
            remote_version,
        );
        self.conflicts.record(&conflict).await?;
        Ok(conflict)
    }

    /// Resolve a detected conflict
    ///
    /// Never invoked automatically; this is the explicit human/policy path.
    /// The held intent is removed from the queue; depending on the choice a
    /// replacement intent is enqueued or the remote version is pulled into
    /// the local cache.
    pub async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        choice: ConflictChoice,
    ) -> SyncResult<()> {
        let conflict = self
            .conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Conflict {}", conflict_id)))?;

        if conflict.resolution != ConflictResolution::Unresolved {
            return Err(SyncError::InvalidOperation(format!(
                "Conflict {} already resolved",
                conflict_id
            )));
        }

        // Replacement intents keep the held intent's action so the eventual
        // audit entry records what the user actually did.
        let action = self
            .queue
            .get(conflict.intent_id)
            .await?
            .map(|i| i.action)
            .unwrap_or(WriteAction::UpdateEntity);

        self.queue.remove(conflict.intent_id).await?;

        match choice {
            ConflictChoice::AcceptLocal => {
                let intent = WriteIntent::new(
                    action,
                    conflict.entity_type.clone(),
                    conflict.entity_id.clone(),
                    conflict.local_payload.clone(),
                    Some(conflict.remote_version),
                );
                self.queue.enqueue(&intent).await?;
                self.local
                    .mark_pending(&conflict.entity_type, &conflict.entity_id, true);
                self.conflicts
                    .mark_resolved(conflict_id, ConflictResolution::AcceptedLocal)
                    .await?;
            }
            ConflictChoice::AcceptRemote => {
                self.local.apply_remote(
                    &conflict.entity_type,
                    &conflict.entity_id,
                    conflict.remote_payload.clone(),
                    conflict.remote_version,
                );
                self.local
                    .mark_pending(&conflict.entity_type, &conflict.entity_id, false);
                self.conflicts
                    .mark_resolved(conflict_id, ConflictResolution::AcceptedRemote)
                    .await?;
            }
            ConflictChoice::AcceptMerged(payload) => {
                let intent = WriteIntent::new(
                    action,
                    conflict.entity_type.clone(),
                    conflict.entity_id.clone(),
                    payload.clone(),
                    Some(conflict.remote_version),
                );
                self.queue.enqueue(&intent).await?;
                self.local.upsert_local(
                    &conflict.entity_type,
                    &conflict.entity_id,
                    payload,
                    Some(conflict.remote_version),
                    true,
                );
                self.conflicts
                    .mark_resolved(conflict_id, ConflictResolution::Merged)
                    .await?;
            }
        }

        tracing::info!(conflict_id = %conflict_id, "Conflict resolved");
        Ok(())
    }
}
