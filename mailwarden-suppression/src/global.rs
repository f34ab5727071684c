//! Global suppression hub
//!
//! Single source of truth for cross-ISP permanent suppressions. The md5 of
//! the normalized email is the canonical identifier; the hub keeps hot sets
//! for both forms so record-path checks and import-time batch hygiene are
//! both O(1) per entry.

use crate::{Result, SuppressionError, normalize_email};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailwarden_core::{CancelToken, Isp};
use mailwarden_store::{GlobalSuppressionRow, GlobalSuppressionRowStore};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// MTA-facing file name for the global set.
const GLOBAL_FILE: &str = "global_suppression.txt";
/// How often the global file is fully rebuilt.
const FILE_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// md5 of the canonical (trimmed, lowercased) email, hex-encoded.
pub fn md5_hex(email: &str) -> String {
    format!("{:x}", md5::compute(normalize_email(email).as_bytes()))
}

/// Copies the rebuilt suppression file to the MTA host. Implemented by the
/// executor's shell channel; injected to keep this crate transport-free.
#[async_trait]
pub trait RemoteMirror: Send + Sync {
    async fn mirror(&self, local: &Path, file_name: &str) -> Result<()>;
}

/// Fan-out notification for each new global suppression.
#[derive(Debug, Clone)]
pub struct SuppressionEvent {
    pub email: String,
    pub md5_hash: String,
    pub reason: String,
    pub source: String,
    pub isp: Option<Isp>,
    pub at: DateTime<Utc>,
}

/// One global suppression request.
#[derive(Debug, Clone)]
pub struct GlobalSuppressRequest {
    pub email: String,
    pub reason: String,
    pub source: String,
    pub isp: Option<Isp>,
    pub dsn_code: String,
    pub dsn_diag: String,
    pub source_ip: String,
    pub campaign_id: String,
}

/// Org-wide suppression hub.
pub struct GlobalSuppressionHub {
    tenant: String,
    dir: PathBuf,
    store: Arc<dyn GlobalSuppressionRowStore>,
    emails: RwLock<HashSet<String>>,
    hashes: RwLock<HashSet<String>>,
    subscribers: RwLock<Vec<mpsc::Sender<SuppressionEvent>>>,
    remote: RwLock<Option<Arc<dyn RemoteMirror>>>,
}

impl GlobalSuppressionHub {
    pub fn new(
        tenant: impl Into<String>,
        dir: impl Into<PathBuf>,
        store: Arc<dyn GlobalSuppressionRowStore>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            dir: dir.into(),
            store,
            emails: RwLock::new(HashSet::new()),
            hashes: RwLock::new(HashSet::new()),
            subscribers: RwLock::new(Vec::new()),
            remote: RwLock::new(None),
        }
    }

    /// Wire the remote mirror; rebuilt files are then copied to the MTA.
    pub fn set_remote_mirror(&self, mirror: Arc<dyn RemoteMirror>) {
        *self.remote.write() = Some(mirror);
    }

    /// Subscribe to suppression events. Full channels drop events.
    pub fn subscribe(&self, buffer: usize) -> mpsc::Receiver<SuppressionEvent> {
        let (tx, rx) = mpsc::channel(buffer);
        self.subscribers.write().push(tx);
        rx
    }

    pub fn is_suppressed(&self, email: &str) -> bool {
        self.hashes.read().contains(&md5_hex(email))
    }

    pub fn is_suppressed_md5(&self, hash: &str) -> bool {
        self.hashes.read().contains(&hash.to_ascii_lowercase())
    }

    /// Suppress an email org-wide. `Ok(true)` when the entry is new.
    pub async fn suppress(&self, request: GlobalSuppressRequest) -> Result<bool> {
        let email = normalize_email(&request.email);
        if email.is_empty() {
            return Ok(false);
        }
        let hash = md5_hex(&email);
        if self.hashes.read().contains(&hash) {
            return Ok(false);
        }

        let now = Utc::now();
        let row = GlobalSuppressionRow {
            tenant: self.tenant.clone(),
            email: email.clone(),
            md5_hash: hash.clone(),
            reason: request.reason.clone(),
            source: request.source.clone(),
            isp: request.isp.map(|isp| isp.name().to_string()),
            dsn_code: request.dsn_code,
            dsn_diag: request.dsn_diag,
            source_ip: request.source_ip,
            campaign_id: request.campaign_id,
            created_at: now,
            updated_at: now,
        };
        let new = self.store.upsert_global_suppression(&row).await?;

        self.emails.write().insert(email.clone());
        self.hashes.write().insert(hash.clone());
        if !new {
            return Ok(false);
        }

        if let Err(err) = self.append_to_file(&email) {
            warn!(error = %err, "global suppression file append failed");
        }

        let event = SuppressionEvent {
            email,
            md5_hash: hash,
            reason: request.reason,
            source: request.source,
            isp: request.isp,
            at: now,
        };
        let subscribers = self.subscribers.read();
        for tx in subscribers.iter() {
            if tx.try_send(event.clone()).is_err() {
                debug!("suppression event subscriber full, dropping");
            }
        }
        Ok(true)
    }

    /// Which of `emails` are suppressed, in canonical form.
    pub fn check_batch(&self, emails: &[String]) -> Vec<String> {
        let hashes = self.hashes.read();
        emails
            .iter()
            .map(|email| normalize_email(email))
            .filter(|email| hashes.contains(&md5_hex(email)))
            .collect()
    }

    /// Which of `hashes` are suppressed.
    pub fn check_batch_md5(&self, hashes: &[String]) -> Vec<String> {
        let known = self.hashes.read();
        hashes
            .iter()
            .map(|hash| hash.to_ascii_lowercase())
            .filter(|hash| known.contains(hash))
            .collect()
    }

    /// Export every known md5 hash from the durable store.
    pub async fn export_md5_list(&self) -> Result<Vec<String>> {
        Ok(self.store.global_suppression_hashes(&self.tenant).await?)
    }

    fn file_path(&self) -> PathBuf {
        self.dir.join(GLOBAL_FILE)
    }

    fn append_to_file(&self, email: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())?;
        writeln!(file, "{}", email)?;
        Ok(())
    }

    /// Populate the hot sets from the durable store.
    pub async fn load_hot_sets(&self) -> Result<usize> {
        let emails = self.store.global_suppression_emails(&self.tenant).await?;
        let hashes = self.store.global_suppression_hashes(&self.tenant).await?;
        let count = emails.len();
        *self.emails.write() = emails.into_iter().map(|e| normalize_email(&e)).collect();
        *self.hashes.write() = hashes.into_iter().map(|h| h.to_ascii_lowercase()).collect();
        info!(entries = count, "global suppression hot sets loaded");
        Ok(count)
    }

    /// Full rebuild of the global file: ordered, deduplicated, atomic. When a
    /// remote mirror is wired, the rebuilt file is copied to the MTA host.
    pub async fn rebuild_file(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let emails: BTreeSet<String> = self
            .store
            .global_suppression_emails(&self.tenant)
            .await?
            .into_iter()
            .map(|e| normalize_email(&e))
            .collect();

        let path = self.file_path();
        let tmp = path.with_extension("txt.tmp");
        let mut content = String::with_capacity(emails.len() * 24);
        for email in &emails {
            content.push_str(email);
            content.push('\n');
        }
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        debug!(entries = emails.len(), "global suppression file rebuilt");

        let remote = self.remote.read().clone();
        if let Some(remote) = remote {
            remote
                .mirror(&path, GLOBAL_FILE)
                .await
                .map_err(|err| SuppressionError::Remote(err.to_string()))?;
        }
        Ok(())
    }

    /// Periodic file-sync task.
    pub fn spawn_file_sync(self: Arc<Self>, cancel: CancelToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FILE_SYNC_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.rebuild_file().await {
                            warn!(error = %err, "global suppression rebuild failed");
                        }
                    }
                }
            }
        })
    }
}
