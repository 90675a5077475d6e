use super::LedgerStore;
use crate::entry::{AuditEntry, ChainCheckpoint, ChainHead};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use citadel_tenancy::is_valid_tenant_id;
use dashmap::DashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

const CHAIN_EXT: &str = "jsonl";
const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// File-based ledger store
///
/// One JSON-lines file per tenant (`{tenant}.jsonl`), one entry per line, plus
/// a `{tenant}.checkpoint.json` sidecar once retention has pruned the chain.
///
/// An entry counts as written once its terminating newline is on disk. A
/// trailing fragment without one is left by an interrupted append; readers
/// skip it and the next append cuts it off.
pub struct FileLedgerStore {
    dir: PathBuf,
    heads: DashMap<String, ChainHead>,
    write_lock: Mutex<()>,
}

impl FileLedgerStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// ```no_run
    /// use citadel_audit::FileLedgerStore;
    ///
    /// # async fn example() -> Result<(), citadel_audit::LedgerError> {
    /// let store = FileLedgerStore::open("/var/lib/citadel/audit").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            heads: DashMap::new(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a tenant's chain file
    pub fn chain_path(&self, tenant_id: &str) -> Result<PathBuf> {
        check_tenant(tenant_id)?;
        Ok(self.dir.join(format!("{}.{}", tenant_id, CHAIN_EXT)))
    }

    fn checkpoint_path(&self, tenant_id: &str) -> Result<PathBuf> {
        check_tenant(tenant_id)?;
        Ok(self.dir.join(format!("{}{}", tenant_id, CHECKPOINT_SUFFIX)))
    }

    async fn read_chain(&self, tenant_id: &str) -> Result<Vec<AuditEntry>> {
        let path = self.chain_path(tenant_id)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let (body, torn) = match content.rfind('\n') {
            Some(end) => content.split_at(end + 1),
            None => ("", content.as_str()),
        };
        if !torn.is_empty() {
            tracing::warn!(tenant = %tenant_id, bytes = torn.len(), "Ignoring unterminated line at end of ledger file");
        }

        body.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<AuditEntry>(line).map_err(|e| {
                    LedgerError::ChainIntegrityViolation {
                        tenant_id: tenant_id.to_string(),
                        entry_id: None,
                        reason: format!("unreadable line {} in {}: {}", n + 1, path.display(), e),
                    }
                })
            })
            .collect()
    }

    async fn read_checkpoint(&self, tenant_id: &str) -> Result<Option<ChainCheckpoint>> {
        let path = self.checkpoint_path(tenant_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_head(&self, tenant_id: &str) -> Result<Option<ChainHead>> {
        if let Some(head) = self.heads.get(tenant_id) {
            return Ok(Some(head.clone()));
        }

        let head = match self.read_chain(tenant_id).await?.last() {
            Some(entry) => Some(ChainHead::from(entry)),
            None => self.read_checkpoint(tenant_id).await?.as_ref().map(ChainHead::from),
        };
        if let Some(head) = &head {
            self.heads.insert(tenant_id.to_string(), head.clone());
        }
        Ok(head)
    }
}

fn check_tenant(tenant_id: &str) -> Result<()> {
    if !is_valid_tenant_id(tenant_id) {
        return Err(LedgerError::Invalid(format!(
            "tenant id {:?} is not usable as a file name",
            tenant_id
        )));
    }
    Ok(())
}

/// Length of `file` up to and including its last newline.
async fn committed_len(file: &mut fs::File) -> Result<u64> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut content = Vec::new();
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut content).await?;
    Ok(content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |end| end as u64 + 1))
}

async fn write_line(file: &mut fs::File, offset: u64, line: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(line).await?;
    file.sync_data().await
}

/// Write to a temp file and rename over the target.
async fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let path = self.chain_path(&entry.tenant_id)?;
        let _guard = self.write_lock.lock().await;

        let expected = self
            .load_head(&entry.tenant_id)
            .await?
            .map_or(1, |h| h.sequence + 1);
        if entry.sequence != expected {
            return Err(LedgerError::Conflict {
                tenant_id: entry.tenant_id.clone(),
                sequence: entry.sequence,
            });
        }

        let mut line = entry.to_json()?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .await?;
        let committed = committed_len(&mut file).await?;
        if committed < file.metadata().await?.len() {
            tracing::warn!(tenant = %entry.tenant_id, path = %path.display(), "Truncating unterminated ledger line");
            file.set_len(committed).await?;
        }

        if let Err(e) = write_line(&mut file, committed, line.as_bytes()).await {
            // Leave no partial line for the next append to build on.
            if let Err(undo) = file.set_len(committed).await {
                tracing::error!(tenant = %entry.tenant_id, error = %undo, "Could not roll back partial ledger write");
            }
            return Err(e.into());
        }

        self.heads
            .insert(entry.tenant_id.clone(), ChainHead::from(entry));
        Ok(())
    }

    async fn head(&self, tenant_id: &str) -> Result<Option<ChainHead>> {
        let _guard = self.write_lock.lock().await;
        self.load_head(tenant_id).await
    }

    async fn entries(&self, tenant_id: &str, from_sequence: u64) -> Result<Vec<AuditEntry>> {
        // Lines at or below the checkpoint were pruned; a crash between
        // writing the checkpoint and rewriting the chain can leave them behind.
        let floor = self
            .read_checkpoint(tenant_id)
            .await?
            .map_or(0, |cp| cp.sequence + 1);
        let from = from_sequence.max(floor);

        Ok(self
            .read_chain(tenant_id)
            .await?
            .into_iter()
            .filter(|e| e.sequence >= from)
            .collect())
    }

    async fn checkpoint(&self, tenant_id: &str) -> Result<Option<ChainCheckpoint>> {
        self.read_checkpoint(tenant_id).await
    }

    async fn prune(&self, tenant_id: &str, through_sequence: u64) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let entries = self.read_chain(tenant_id).await?;

        let (pruned, retained): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| e.sequence <= through_sequence);

        let Some(last) = pruned.last() else {
            return Ok(0);
        };

        let checkpoint = ChainCheckpoint {
            tenant_id: tenant_id.to_string(),
            sequence: last.sequence,
            content_hash: last.content_hash.clone(),
        };
        replace_file(
            &self.checkpoint_path(tenant_id)?,
            &serde_json::to_vec_pretty(&checkpoint)?,
        )
        .await?;

        let mut body = String::new();
        for entry in &retained {
            body.push_str(&entry.to_json()?);
            body.push('\n');
        }
        replace_file(&self.chain_path(tenant_id)?, body.as_bytes()).await?;

        if retained.is_empty() {
            self.heads
                .insert(tenant_id.to_string(), ChainHead::from(&checkpoint));
        }

        tracing::debug!(tenant = %tenant_id, pruned = pruned.len(), through = through_sequence, "Pruned ledger file");
        Ok(pruned.len())
    }

    async fn tenants(&self) -> Result<Vec<String>> {
        let mut tenants = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some(CHAIN_EXT)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                tenants.push(stem.to_string());
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditAction, AuditDraft, SEED_HASH};

    fn entry(tenant: &str, sequence: u64, previous: &str) -> AuditEntry {
        AuditEntry::seal(
            AuditDraft::new(tenant, AuditAction::Create, "Case"),
            sequence,
            previous.to_string(),
            chrono::Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::open(dir.path()).await.unwrap();

        let first = entry("acme", 1, SEED_HASH);
        let second = entry("acme", 2, &first.content_hash);
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        let entries = store.entries("acme", 0).await.unwrap();
        assert_eq!(entries, vec![first, second.clone()]);
        assert_eq!(store.head("acme").await.unwrap(), Some(ChainHead::from(&second)));
        assert_eq!(store.tenants().await.unwrap(), vec!["acme".to_string()]);
    }

    #[tokio::test]
    async fn test_head_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = entry("acme", 1, SEED_HASH);
        {
            let store = FileLedgerStore::open(dir.path()).await.unwrap();
            store.append(&first).await.unwrap();
        }

        let store = FileLedgerStore::open(dir.path()).await.unwrap();
        assert_eq!(store.head("acme").await.unwrap().unwrap().sequence, 1);
        assert!(matches!(
            store.append(&entry("acme", 1, SEED_HASH)).await,
            Err(LedgerError::Conflict { sequence: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_prune_writes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::open(dir.path()).await.unwrap();

        let mut previous = SEED_HASH.to_string();
        for seq in 1..=4 {
            let e = entry("acme", seq, &previous);
            previous = e.content_hash.clone();
            store.append(&e).await.unwrap();
        }

        assert_eq!(store.prune("acme", 2).await.unwrap(), 2);
        let cp = store.checkpoint("acme").await.unwrap().unwrap();
        assert_eq!(cp.sequence, 2);

        let remaining = store.entries("acme", 0).await.unwrap();
        assert_eq!(remaining.first().unwrap().sequence, 3);
        assert_eq!(remaining.first().unwrap().previous_hash, cp.content_hash);

        assert_eq!(store.prune("acme", 4).await.unwrap(), 2);
        assert_eq!(store.head("acme").await.unwrap().unwrap().sequence, 4);
    }

    #[tokio::test]
    async fn test_rejects_path_like_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.entries("../etc", 0).await,
            Err(LedgerError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_skipped_then_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let first = entry("acme", 1, SEED_HASH);
        {
            let store = FileLedgerStore::open(dir.path()).await.unwrap();
            store.append(&first).await.unwrap();

            // An append interrupted halfway through its line
            let mut file = OpenOptions::new()
                .append(true)
                .open(store.chain_path("acme").unwrap())
                .await
                .unwrap();
            file.write_all(br#"{"id":"0b4c","tenantId":"ac"#).await.unwrap();
        }

        let store = FileLedgerStore::open(dir.path()).await.unwrap();
        assert_eq!(store.entries("acme", 0).await.unwrap(), vec![first.clone()]);
        assert_eq!(store.head("acme").await.unwrap().unwrap().sequence, 1);

        let second = entry("acme", 2, &first.content_hash);
        store.append(&second).await.unwrap();
        assert_eq!(store.entries("acme", 0).await.unwrap(), vec![first, second]);

        let raw = fs::read_to_string(store.chain_path("acme").unwrap()).await.unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_corrupt_committed_line_is_a_violation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::open(dir.path()).await.unwrap();
        fs::write(store.chain_path("acme").unwrap(), "not json\n").await.unwrap();

        assert!(matches!(
            store.entries("acme", 0).await,
            Err(LedgerError::ChainIntegrityViolation { .. })
        ));
    }
}
