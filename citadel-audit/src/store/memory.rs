use super::LedgerStore;
use crate::entry::{AuditEntry, ChainCheckpoint, ChainHead};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Chain {
    entries: BTreeMap<u64, AuditEntry>,
    checkpoint: Option<ChainCheckpoint>,
}

/// In-memory ledger store
#[derive(Default)]
pub struct MemoryLedgerStore {
    chains: RwLock<HashMap<String, Chain>>,
    unavailable: AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StorageUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total entries across tenants
    pub fn len(&self) -> usize {
        self.chains.read().values().map(|c| c.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::StorageUnavailable(
                "memory ledger store offline".to_string(),
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn overwrite(&self, entry: AuditEntry) {
        if let Some(chain) = self.chains.write().get_mut(&entry.tenant_id) {
            chain.entries.insert(entry.sequence, entry);
        }
    }

    #[cfg(test)]
    pub(crate) fn remove(&self, tenant_id: &str, sequence: u64) {
        if let Some(chain) = self.chains.write().get_mut(tenant_id) {
            chain.entries.remove(&sequence);
        }
    }
}

fn head_of(chain: &Chain) -> Option<ChainHead> {
    chain
        .entries
        .values()
        .next_back()
        .map(ChainHead::from)
        .or_else(|| chain.checkpoint.as_ref().map(ChainHead::from))
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.check_available()?;
        let mut chains = self.chains.write();
        let chain = chains.entry(entry.tenant_id.clone()).or_default();

        let expected = head_of(chain).map_or(1, |h| h.sequence + 1);
        if entry.sequence != expected {
            return Err(LedgerError::Conflict {
                tenant_id: entry.tenant_id.clone(),
                sequence: entry.sequence,
            });
        }

        chain.entries.insert(entry.sequence, entry.clone());
        Ok(())
    }

    async fn head(&self, tenant_id: &str) -> Result<Option<ChainHead>> {
        self.check_available()?;
        Ok(self.chains.read().get(tenant_id).and_then(head_of))
    }

    async fn entries(&self, tenant_id: &str, from_sequence: u64) -> Result<Vec<AuditEntry>> {
        self.check_available()?;
        Ok(self
            .chains
            .read()
            .get(tenant_id)
            .map(|chain| {
                chain
                    .entries
                    .range(from_sequence..)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn checkpoint(&self, tenant_id: &str) -> Result<Option<ChainCheckpoint>> {
        self.check_available()?;
        Ok(self
            .chains
            .read()
            .get(tenant_id)
            .and_then(|c| c.checkpoint.clone()))
    }

    async fn prune(&self, tenant_id: &str, through_sequence: u64) -> Result<usize> {
        self.check_available()?;
        let mut chains = self.chains.write();
        let Some(chain) = chains.get_mut(tenant_id) else {
            return Ok(0);
        };

        let retained = chain.entries.split_off(&(through_sequence + 1));
        let pruned = std::mem::replace(&mut chain.entries, retained);

        if let Some(last) = pruned.values().next_back() {
            chain.checkpoint = Some(ChainCheckpoint {
                tenant_id: tenant_id.to_string(),
                sequence: last.sequence,
                content_hash: last.content_hash.clone(),
            });
        }
        Ok(pruned.len())
    }

    async fn tenants(&self) -> Result<Vec<String>> {
        self.check_available()?;
        let mut tenants: Vec<String> = self.chains.read().keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }
}
