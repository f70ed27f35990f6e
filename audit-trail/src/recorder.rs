//! Single writer for the audit chain
//!
//! [`AuditRecorder`] is the only component allowed to append entries, which
//! guarantees one unambiguous chain with no forks. It knows the current
//! actor (including an impersonation context) and refuses to record when no
//! actor is authenticated: unauthenticated sessions perform no mutations,
//! so they leave no audit entries either.

use crate::chain::{HashChain, VerificationResult};
use crate::entry::{Actor, AuditAction, AuditEntry};
use crate::error::{AuditError, AuditResult};
use crate::store::AuditStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct SessionState {
    actor: Option<Actor>,
    impersonated_by: Option<Actor>,
}

/// Shared session/actor context
///
/// Cheap to clone; the sync engine and the recorder observe the same state.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    state: Arc<RwLock<SessionState>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the effective actor for this session
    pub fn authenticate(&self, actor: Actor) {
        let mut state = self.state.write();
        state.actor = Some(actor);
        state.impersonated_by = None;
    }

    /// Act as `actor` while `real_user` remains the logged-in user
    pub fn impersonate(&self, actor: Actor, real_user: Actor) {
        let mut state = self.state.write();
        state.actor = Some(actor);
        state.impersonated_by = Some(real_user);
    }

    /// Clear the session (logout)
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.actor = None;
        state.impersonated_by = None;
    }

    pub fn actor(&self) -> Option<Actor> {
        self.state.read().actor.clone()
    }

    pub fn impersonated_by(&self) -> Option<Actor> {
        self.state.read().impersonated_by.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().actor.is_some()
    }
}

/// The sole write path into the audit log
pub struct AuditRecorder {
    chain: Mutex<HashChain>,
    store: Option<AuditStore>,
    session: SessionContext,
}

impl AuditRecorder {
    /// Create an in-memory recorder (trail lives for the process lifetime)
    pub fn new(session: SessionContext) -> Self {
        Self {
            chain: Mutex::new(HashChain::new()),
            store: None,
            session,
        }
    }

    /// Create a recorder backed by a durable store
    ///
    /// Reloads the persisted trail and verifies it before accepting writes;
    /// a breach is surfaced as an error and never repaired.
    pub async fn with_store(session: SessionContext, store: AuditStore) -> AuditResult<Self> {
        let entries = store.load_all().await?;
        let chain = HashChain::from_entries(entries);

        let result = chain.verify();
        if let Some(index) = result.breach_index {
            tracing::error!(
                breach_index = index,
                "Audit trail integrity breach detected on load"
            );
            return Err(AuditError::IntegrityBreach { index });
        }

        Ok(Self {
            chain: Mutex::new(chain),
            store: Some(store),
            session,
        })
    }

    /// Record an audit entry for the current actor
    ///
    /// Returns `Ok(None)` when no actor is authenticated.
    pub async fn record(
        &self,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        details: &str,
    ) -> AuditResult<Option<AuditEntry>> {
        let Some(actor) = self.session.actor() else {
            tracing::warn!(
                action = action.as_str(),
                entity_type,
                entity_id,
                "Audit record skipped: no authenticated actor"
            );
            return Ok(None);
        };
        let impersonated_by = self.session.impersonated_by();

        let mut chain = self.chain.lock().await;
        let entry = chain.append(
            &actor,
            impersonated_by,
            action,
            entity_type,
            entity_id,
            details,
        );

        if let Some(ref store) = self.store {
            store.append(&entry).await?;
        }

        tracing::debug!(
            entry_id = %entry.id,
            actor_id = %entry.actor_id,
            action = action.as_str(),
            entity_type,
            entity_id,
            "Recorded audit entry"
        );

        Ok(Some(entry))
    }

    /// Verify the chain recorded so far
    ///
    /// Snapshots the current length, so it is safe to run while appends
    /// continue.
    pub async fn verify(&self) -> VerificationResult {
        let chain = self.chain.lock().await;
        let result = chain.verify_prefix(chain.len());
        if let Some(index) = result.breach_index {
            tracing::error!(breach_index = index, "Audit trail integrity breach");
        }
        result
    }

    /// Session context this recorder observes
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub async fn len(&self) -> usize {
        self.chain.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chain.lock().await.is_empty()
    }

    /// All entries, oldest first
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.chain.lock().await.entries().to_vec()
    }

    /// Entries recorded for a given effective actor
    pub async fn entries_by_actor(&self, actor_id: &str) -> Vec<AuditEntry> {
        self.chain
            .lock()
            .await
            .entries()
            .iter()
            .filter(|e| e.actor_id == actor_id)
            .cloned()
            .collect()
    }

    /// Entries recorded for a given action
    pub async fn entries_by_action(&self, action: AuditAction) -> Vec<AuditEntry> {
        self.chain
            .lock()
            .await
            .entries()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    /// Entries recorded in `[from, to)`
    pub async fn entries_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<AuditEntry> {
        self.chain
            .lock()
            .await
            .entries()
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp < to)
            .cloned()
            .collect()
    }
}
