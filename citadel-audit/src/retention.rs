//! Retention policies for audit chains

use crate::error::Result;
use crate::ledger::AuditLedger;
use chrono::{DateTime, Duration, Utc};
use citadel_core::PeriodicTask;
use citadel_tenancy::{RetentionClass, TenantDirectory};
use std::sync::{Arc, Weak};

/// How long each retention class keeps its entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub standard_days: u32,
    pub compliance_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            standard_days: 365,
            compliance_days: 2555,
        }
    }
}

impl RetentionPolicy {
    pub fn new(standard_days: u32, compliance_days: u32) -> Self {
        Self {
            standard_days,
            compliance_days,
        }
    }

    pub fn max_age(&self, class: RetentionClass) -> Duration {
        let days = match class {
            RetentionClass::Standard => self.standard_days,
            RetentionClass::Compliance => self.compliance_days,
        };
        Duration::days(i64::from(days))
    }

    /// Entries stamped before this instant have expired
    pub fn cutoff(&self, class: RetentionClass, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.max_age(class)
    }
}

/// Outcome of one retention sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub tenants_swept: usize,
    pub entries_pruned: usize,
    pub failures: usize,
}

/// Retention manager
///
/// Periodically prunes expired entries from every tenant chain. A tenant the
/// directory doesn't know is kept for the compliance period.
pub struct RetentionManager {
    ledger: Arc<AuditLedger>,
    directory: Arc<dyn TenantDirectory>,
    policy: RetentionPolicy,
    task: PeriodicTask,
}

impl RetentionManager {
    pub fn new(
        ledger: Arc<AuditLedger>,
        directory: Arc<dyn TenantDirectory>,
        policy: RetentionPolicy,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            ledger,
            directory,
            policy,
            task: PeriodicTask::new("audit-retention", interval),
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    async fn retention_class(&self, tenant_id: &str) -> RetentionClass {
        match self.directory.lookup_tenant(tenant_id).await {
            Ok(Some(tenant)) => tenant.retention,
            Ok(None) => RetentionClass::Compliance,
            Err(e) => {
                tracing::warn!(tenant = %tenant_id, error = %e, "Retention class lookup failed, using compliance");
                RetentionClass::Compliance
            }
        }
    }

    /// Run one sweep over every tenant chain.
    ///
    /// A failure on one tenant is logged and counted; the sweep continues.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<RetentionReport> {
        let tenants = self.ledger.store().tenants().await?;
        let mut report = RetentionReport::default();

        for tenant_id in tenants {
            let class = self.retention_class(&tenant_id).await;
            let cutoff = self.policy.cutoff(class, now);

            match self.ledger.prune_before(&tenant_id, cutoff).await {
                Ok(pruned) => {
                    report.tenants_swept += 1;
                    report.entries_pruned += pruned;
                }
                Err(e) => {
                    report.failures += 1;
                    tracing::error!(tenant = %tenant_id, error = %e, "Retention sweep failed");
                }
            }
        }

        if report.entries_pruned > 0 || report.failures > 0 {
            tracing::info!(
                tenants = report.tenants_swept,
                pruned = report.entries_pruned,
                failures = report.failures,
                "Audit retention sweep finished"
            );
        }
        Ok(report)
    }

    /// Start automatic sweeps on the configured interval.
    pub fn start(self: &Arc<Self>) -> bool {
        let manager: Weak<Self> = Arc::downgrade(self);
        self.task.start(move || {
            let manager = manager.clone();
            async move {
                if let Some(manager) = manager.upgrade()
                    && let Err(e) = manager.sweep(Utc::now()).await
                {
                    tracing::error!(error = %e, "Retention sweep could not list tenants");
                }
            }
        })
    }

    pub async fn stop(&self) {
        self.task.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditAction, AuditDraft};
    use crate::ledger::tests::ManualClock;
    use crate::store::{LedgerStore, MemoryLedgerStore};
    use citadel_tenancy::{InMemoryTenantDirectory, Tenant};

    struct Fixture {
        ledger: Arc<AuditLedger>,
        manager: RetentionManager,
        clock: ManualClock,
    }

    impl Fixture {
        async fn seed(&self, tenant: &str, age_days: i64, count: usize) {
            self.clock.set(Utc::now() - Duration::days(age_days));
            for _ in 0..count {
                self.ledger
                    .append(AuditDraft::new(tenant, AuditAction::Login, "User"))
                    .await
                    .unwrap();
            }
        }
    }

    fn fixture(directory: InMemoryTenantDirectory) -> Fixture {
        let clock = ManualClock::new();
        let ledger = Arc::new(
            AuditLedger::new(Arc::new(MemoryLedgerStore::new())).with_clock(clock.clock()),
        );
        let manager = RetentionManager::new(
            ledger.clone(),
            Arc::new(directory),
            RetentionPolicy::default(),
            std::time::Duration::from_secs(3600),
        );
        Fixture {
            ledger,
            manager,
            clock,
        }
    }

    #[test]
    fn test_policy_days() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.max_age(RetentionClass::Standard).num_days(), 365);
        assert_eq!(policy.max_age(RetentionClass::Compliance).num_days(), 2555);
    }

    #[tokio::test]
    async fn test_sweep_respects_retention_class() {
        let directory = InMemoryTenantDirectory::new();
        directory.upsert(Tenant::new("acme"));
        directory.upsert(Tenant::new("bank").with_retention(RetentionClass::Compliance));
        let f = fixture(directory);

        f.seed("acme", 400, 2).await;
        f.seed("acme", 1, 1).await;
        f.seed("bank", 400, 2).await;

        let report = f.manager.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.tenants_swept, 2);
        assert_eq!(report.entries_pruned, 2);
        assert_eq!(f.ledger.store().entries("bank", 0).await.unwrap().len(), 2);
        assert!(f.ledger.verify_chain("acme", None).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_unknown_tenant_kept_for_compliance_period() {
        let f = fixture(InMemoryTenantDirectory::new());
        f.seed("ghost", 400, 3).await;

        let report = f.manager.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.entries_pruned, 0);

        let later = Utc::now() + Duration::days(2555);
        let report = f.manager.sweep(later).await.unwrap();
        assert_eq!(report.entries_pruned, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop() {
        let manager = Arc::new(fixture(InMemoryTenantDirectory::new()).manager);
        assert!(manager.start());
        assert!(manager.is_running());
        manager.stop().await;
        assert!(!manager.is_running());
    }
}
