//! Tamper-evident audit trail for Chairside Engine
//!
//! Provides:
//! - Hash-chained, append-only audit log (SHA-256 linkage)
//! - Integrity verification that pinpoints the first tampered entry
//! - Single-writer recorder with actor and impersonation context
//! - Optional SQLite persistence so the trail survives restarts
//! - Read accessors for audit review (by actor, action, date range)
//!
//! # Example
//!
//! ```no_run
//! use audit_trail::{Actor, AuditAction, AuditRecorder, SessionContext};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SessionContext::new();
//! session.authenticate(Actor::new("u1", "Dr. Adams"));
//!
//! let recorder = AuditRecorder::new(session);
//! recorder
//!     .record(AuditAction::Create, "patient", "p1", "created patient record")
//!     .await?;
//!
//! let result = recorder.verify().await;
//! assert!(result.valid);
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod entry;
pub mod error;
pub mod recorder;
pub mod store;

pub use chain::{HashChain, VerificationResult};
pub use entry::{Actor, AuditAction, AuditEntry, GENESIS_HASH};
pub use error::{AuditError, AuditResult};
pub use recorder::{AuditRecorder, SessionContext};
pub use store::{AuditStore, AuditStoreConfig};
