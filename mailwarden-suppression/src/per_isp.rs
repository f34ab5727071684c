//! Per-ISP suppression sets with MTA file mirroring

use crate::global::{GlobalSuppressRequest, GlobalSuppressionHub, RemoteMirror};
use crate::{Result, normalize_email};
use chrono::{DateTime, Utc};
use mailwarden_core::{CancelToken, Isp};
use mailwarden_store::{SuppressionRow, SuppressionRowStore};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the MTA-facing files are fully rebuilt.
const FILE_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// One suppression request, as derived from an accounting record.
#[derive(Debug, Clone)]
pub struct SuppressRequest {
    pub isp: Isp,
    pub email: String,
    pub reason: String,
    pub dsn_code: String,
    pub dsn_diag: String,
    pub source_ip: String,
    pub vmta: String,
    pub campaign_id: String,
    pub at: DateTime<Utc>,
}

/// Per-ISP hot sets over the durable suppression table.
///
/// The hit path (`is_suppressed`) takes only the read half of the lock; the
/// mutation path inserts durably first, then updates the hot set, then
/// appends to the MTA-facing file, then forwards to the global hub.
pub struct IspSuppressionSet {
    tenant: String,
    dir: PathBuf,
    store: Arc<dyn SuppressionRowStore>,
    hot: RwLock<HashMap<Isp, HashSet<String>>>,
    global: RwLock<Option<Arc<GlobalSuppressionHub>>>,
    remote: RwLock<Option<Arc<dyn RemoteMirror>>>,
}

impl IspSuppressionSet {
    pub fn new(
        tenant: impl Into<String>,
        dir: impl Into<PathBuf>,
        store: Arc<dyn SuppressionRowStore>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            dir: dir.into(),
            store,
            hot: RwLock::new(HashMap::new()),
            global: RwLock::new(None),
            remote: RwLock::new(None),
        }
    }

    /// Wire the global hub; every new suppression is forwarded to it.
    pub fn set_global_hub(&self, hub: Arc<GlobalSuppressionHub>) {
        *self.global.write() = Some(hub);
    }

    /// Wire the remote mirror; rebuilt files are then copied to the MTA.
    pub fn set_remote_mirror(&self, mirror: Arc<dyn RemoteMirror>) {
        *self.remote.write() = Some(mirror);
    }

    /// Hot-set membership check.
    pub fn is_suppressed(&self, isp: Isp, email: &str) -> bool {
        let email = normalize_email(email);
        self.hot.read().get(&isp).is_some_and(|set| set.contains(&email))
    }

    /// Number of hot entries for an ISP.
    pub fn len(&self, isp: Isp) -> usize {
        self.hot.read().get(&isp).map_or(0, HashSet::len)
    }

    /// Suppress a recipient. Returns `Ok(true)` when the entry is new; a
    /// repeat suppression is a no-op returning `Ok(false)`.
    pub async fn suppress(&self, request: SuppressRequest) -> Result<bool> {
        let email = normalize_email(&request.email);
        if email.is_empty() {
            return Ok(false);
        }
        if self.is_suppressed(request.isp, &email) {
            return Ok(false);
        }

        let row = SuppressionRow {
            tenant: self.tenant.clone(),
            email: email.clone(),
            isp: request.isp.name().to_string(),
            reason: request.reason.clone(),
            dsn_code: request.dsn_code.clone(),
            dsn_diag: request.dsn_diag.clone(),
            source_ip: request.source_ip.clone(),
            vmta: request.vmta.clone(),
            campaign_id: request.campaign_id.clone(),
            suppressed_at: request.at,
            created_at: Utc::now(),
        };
        let new = self.store.insert_suppression(&row).await?;

        self.hot.write().entry(request.isp).or_default().insert(email.clone());
        if !new {
            return Ok(false);
        }

        if let Err(err) = self.append_to_file(request.isp, &email) {
            warn!(isp = %request.isp, error = %err, "suppression file append failed");
        }

        let hub = self.global.read().clone();
        if let Some(hub) = hub {
            let forwarded = GlobalSuppressRequest {
                email,
                reason: request.reason,
                source: format!("isp:{}", request.isp),
                isp: Some(request.isp),
                dsn_code: request.dsn_code,
                dsn_diag: request.dsn_diag,
                source_ip: request.source_ip,
                campaign_id: request.campaign_id,
            };
            if let Err(err) = hub.suppress(forwarded).await {
                warn!(error = %err, "global suppression forward failed");
            }
        }
        Ok(true)
    }

    fn file_path(&self, isp: Isp) -> PathBuf {
        self.dir.join(format!("{}.txt", isp.name()))
    }

    fn append_to_file(&self, isp: Isp, email: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(isp))?;
        writeln!(file, "{}", email)?;
        Ok(())
    }

    /// Populate the hot sets from the durable store.
    pub async fn load_hot_sets(&self) -> Result<usize> {
        let mut total = 0;
        for isp in Isp::ALL {
            let emails = self.store.suppressed_emails(&self.tenant, isp.name()).await?;
            total += emails.len();
            self.hot.write().insert(isp, emails.into_iter().collect());
        }
        info!(entries = total, "suppression hot sets loaded");
        Ok(total)
    }

    /// Full rebuild of every `<isp>.txt` from the durable store. Emails are
    /// collected into an ordered set first, so a rebuilt file never carries
    /// duplicate lines even if an append raced the rebuild.
    pub async fn rebuild_files(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        for isp in Isp::ALL {
            let emails: BTreeSet<String> = self
                .store
                .suppressed_emails(&self.tenant, isp.name())
                .await?
                .into_iter()
                .map(|e| normalize_email(&e))
                .collect();
            let path = self.file_path(isp);
            let tmp = path.with_extension("txt.tmp");
            let mut content = String::with_capacity(emails.len() * 24);
            for email in &emails {
                content.push_str(email);
                content.push('\n');
            }
            fs::write(&tmp, content)?;
            fs::rename(&tmp, &path)?;
            debug!(isp = %isp, entries = emails.len(), "suppression file rebuilt");

            let remote = self.remote.read().clone();
            if let Some(remote) = remote {
                if let Err(err) = remote.mirror(&path, &format!("{}.txt", isp.name())).await {
                    warn!(isp = %isp, error = %err, "suppression file mirror failed");
                }
            }
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
                        if let Err(err) = self.rebuild_files().await {
                            warn!(error = %err, "suppression file rebuild failed");
                        }
                    }
                }
            }
        })
    }
}
