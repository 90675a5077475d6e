//! Tamper-evident audit ledger for Citadel
//!
//! Every mutating action is recorded as an [`AuditEntry`] in a per-tenant hash
//! chain: each entry's `contentHash` covers all of its fields, including the
//! `previousHash` of its predecessor, so editing or removing a committed entry
//! is detected by [`AuditLedger::verify_chain`].
//!
//! # Features
//!
//! - **Hash chain** - per-tenant sequencing under an append lock
//! - **Stores** - in-memory and append-only JSON-lines files
//! - **Data Masking** - secrets are masked before they are hashed
//! - **Retention** - prefix pruning with a chain checkpoint
//! - **Outbox** - deferred appends with exponential backoff
//!
//! # Quick Start
//!
//! ```
//! use citadel_audit::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let ledger = AuditLedger::new(Arc::new(MemoryLedgerStore::new()));
//!
//! let entry = ledger
//!     .append(
//!         AuditDraft::new("acme", AuditAction::Update, "Client")
//!             .actor("user-7")
//!             .entity_id("c-42")
//!             .old_values(json!({"name": "Old"}))
//!             .new_values(json!({"name": "New"})),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(entry.sequence, 1);
//!
//! let report = ledger.verify_chain("acme", None).await.unwrap();
//! assert!(report.valid);
//! # });
//! ```

pub mod entry;
pub mod error;
pub mod ledger;
pub mod masking;
pub mod outbox;
pub mod retention;
pub mod store;

pub use entry::{AuditAction, AuditDraft, AuditEntry, ChainCheckpoint, ChainHead, SEED_HASH};
pub use error::{LedgerError, OutboxError};
pub use ledger::{AuditLedger, AuditQuery, ChainBreak, ChainVerification, Clock, changed_fields};
pub use masking::MaskingConfig;
pub use outbox::{
    AUDIT_APPEND_EVENT, AppendDraftHandler, DispatchReport, MemoryOutbox, Outbox, OutboxDispatcher,
    OutboxHandler, OutboxMessage, OutboxState, OutboxStore,
};
pub use retention::{RetentionManager, RetentionPolicy, RetentionReport};
pub use store::{FileLedgerStore, LedgerStore, MemoryLedgerStore};
