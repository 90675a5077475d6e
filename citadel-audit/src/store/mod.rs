//! Ledger storage backends

mod file;
mod memory;

pub use file::FileLedgerStore;
pub use memory::MemoryLedgerStore;

use crate::entry::{AuditEntry, ChainCheckpoint, ChainHead};
use crate::error::Result;
use async_trait::async_trait;

/// Append-only persistence for audit chains.
///
/// Implementations must make `append` atomic and reject any entry whose
/// sequence is not exactly one past the current head.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist one entry at the end of its tenant's chain
    async fn append(&self, entry: &AuditEntry) -> Result<()>;

    /// Latest entry or, for a fully pruned chain, the checkpoint
    async fn head(&self, tenant_id: &str) -> Result<Option<ChainHead>>;

    /// Entries with `sequence >= from_sequence`, in sequence order
    async fn entries(&self, tenant_id: &str, from_sequence: u64) -> Result<Vec<AuditEntry>>;

    /// Where the retained chain starts, if anything was pruned
    async fn checkpoint(&self, tenant_id: &str) -> Result<Option<ChainCheckpoint>>;

    /// Delete entries with `sequence <= through_sequence` and record a
    /// checkpoint for the last one deleted. Returns the number deleted.
    async fn prune(&self, tenant_id: &str, through_sequence: u64) -> Result<usize>;

    /// Tenants with a chain in this store
    async fn tenants(&self) -> Result<Vec<String>>;
}
