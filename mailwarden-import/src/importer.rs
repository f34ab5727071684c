//! Poll-driven import driver

use crate::blob::BlobSource;
use crate::classify::{Classification, classify};
use crate::columns::{ColumnMap, map_columns, map_columns_headerless};
use crate::normalize::{NormalizedRecord, normalize_row};
use crate::{ImportError, Result};
use chrono::Utc;
use mailwarden_core::CancelToken;
use mailwarden_store::{ImportLogRow, ImportLogStore, ImportStatus, SubscriberRow, SubscriberStore, with_retry};
use mailwarden_suppression::{GlobalSuppressRequest, GlobalSuppressionHub};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Rows per upsert batch.
pub const BATCH_SIZE: usize = 5000;
/// Files processed concurrently per poll.
const MAX_CONCURRENT_FILES: usize = 4;

/// CSV import pipeline over a blob source.
#[derive(Clone)]
pub struct Importer {
    source: Arc<dyn BlobSource>,
    import_log: Arc<dyn ImportLogStore>,
    subscribers: Arc<dyn SubscriberStore>,
    hub: Arc<GlobalSuppressionHub>,
    tenant: String,
    list_id: i64,
    poll_interval: Duration,
    semaphore: Arc<Semaphore>,
}

impl Importer {
    pub fn new(
        source: Arc<dyn BlobSource>,
        import_log: Arc<dyn ImportLogStore>,
        subscribers: Arc<dyn SubscriberStore>,
        hub: Arc<GlobalSuppressionHub>,
        tenant: impl Into<String>,
        list_id: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            import_log,
            subscribers,
            hub,
            tenant: tenant.into(),
            list_id,
            poll_interval,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_FILES)),
        }
    }

    /// Crash recovery: rows stuck in `processing` are cleared so the next
    /// poll reprocesses their files.
    pub async fn recover(&self) -> Result<()> {
        let reset = self.import_log.reset_in_flight().await?;
        if !reset.is_empty() {
            info!(files = reset.len(), "imports reset for reprocessing");
        }
        Ok(())
    }

    /// One poll: list, filter, and process new drops (up to 4 concurrently).
    /// Returns how many files were attempted.
    pub async fn poll_once(&self) -> Result<usize> {
        let known = self.import_log.known_keys().await?;
        let mut candidates: Vec<_> = self
            .source
            .list()
            .await?
            .into_iter()
            .filter(|object| object.key.to_ascii_lowercase().ends_with(".csv"))
            .filter(|object| !object.key.starts_with("processed/"))
            .filter(|object| !known.contains(&object.key))
            .collect();
        candidates.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

        let attempted = candidates.len();
        let mut tasks = JoinSet::new();
        for object in candidates {
            let importer = self.clone();
            let semaphore = self.semaphore.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else { return };
                let key = object.key.clone();
                if let Err(err) = importer.process_file(&key).await {
                    warn!(key = %key, error = %err, "import failed");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
        Ok(attempted)
    }

    /// Import one CSV object through its full lifecycle.
    pub async fn process_file(&self, key: &str) -> Result<(u64, u64)> {
        let bytes = self.source.get(key).await?;
        // Strip a UTF-8 BOM; everything after it is kept either way.
        let content = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(&bytes);

        let rows = read_rows(content)?;

        let (map, headerless, header) = match rows.first() {
            None => (ColumnMap::default(), false, Vec::new()),
            Some(first) => match map_columns(first) {
                Some(map) => (map, false, first.clone()),
                None => match map_columns_headerless(first) {
                    Some(map) => (map, true, Vec::new()),
                    None => {
                        self.log_unusable(key).await?;
                        return Err(ImportError::Unusable(format!("no email column in {}", key)));
                    }
                },
            },
        };

        let classification = classify(key, &header);
        let log_row = ImportLogRow {
            original_key: key.to_string(),
            renamed_key: None,
            classification: classification.as_str().to_ascii_lowercase(),
            status: ImportStatus::Processing,
            record_count: 0,
            error_count: 0,
            error_message: None,
            original_exists: true,
            processed_at: None,
            created_at: Utc::now(),
        };
        if !self.import_log.begin_import(&log_row).await? {
            return Ok((0, 0));
        }

        // For headerless files the first row is data, not a header.
        let data_rows: &[Vec<String>] =
            if headerless { &rows[..] } else { rows.get(1..).unwrap_or(&[]) };

        let mut record_count: u64 = 0;
        let mut error_count: u64 = 0;
        for chunk in data_rows.chunks(BATCH_SIZE.max(1)) {
            let mut normalized = Vec::with_capacity(chunk.len());
            for row in chunk {
                match normalize_row(row, &map) {
                    Some(record) => normalized.push(record),
                    None => error_count += 1,
                }
            }

            match classification {
                Classification::Suppression => {
                    for record in &normalized {
                        match self.hub.suppress(suppression_request(record)).await {
                            Ok(_) => record_count += 1,
                            Err(err) => {
                                warn!(error = %err, "suppression import row failed");
                                error_count += 1;
                            }
                        }
                    }
                }
                Classification::Mailable | Classification::Warmup => {
                    let batch: Vec<SubscriberRow> = normalized
                        .iter()
                        .map(|record| subscriber_row(self.list_id, record))
                        .collect();
                    let inserted = batch.len() as u64;
                    let subscribers = self.subscribers.clone();
                    with_retry("subscriber batch upsert", || {
                        let batch = batch.clone();
                        let subscribers = subscribers.clone();
                        async move { subscribers.upsert_subscribers(batch).await }
                    })
                    .await?;
                    record_count += inserted;
                }
            }

            self.import_log.update_import_progress(key, record_count, error_count).await?;
        }

        self.finish_file(key, &bytes, classification, record_count, error_count).await?;
        Ok((record_count, error_count))
    }

    async fn finish_file(
        &self,
        key: &str,
        original: &[u8],
        classification: Classification,
        record_count: u64,
        error_count: u64,
    ) -> Result<()> {
        let sequence = self.import_log.next_import_sequence().await?;
        let renamed = format!(
            "processed/{:05}-{}-{}.csv",
            sequence,
            self.tenant,
            classification.as_str()
        );

        let copied = match self.source.put(&renamed, original).await {
            Ok(()) => true,
            Err(err) => {
                warn!(key = %key, error = %err, "processed copy failed, original kept");
                false
            }
        };

        let mut original_exists = true;
        if copied {
            match self.source.delete(key).await {
                Ok(()) => original_exists = false,
                Err(err) => warn!(key = %key, error = %err, "original delete failed"),
            }
        }

        self.import_log
            .complete_import(key, &renamed, record_count, error_count, original_exists)
            .await?;
        info!(key = %key, renamed = %renamed, records = record_count, errors = error_count, "import completed");
        Ok(())
    }

    async fn log_unusable(&self, key: &str) -> Result<()> {
        let row = ImportLogRow {
            original_key: key.to_string(),
            renamed_key: None,
            classification: "unknown".to_string(),
            status: ImportStatus::Processing,
            record_count: 0,
            error_count: 0,
            error_message: None,
            original_exists: true,
            processed_at: None,
            created_at: Utc::now(),
        };
        self.import_log.begin_import(&row).await?;
        self.import_log.fail_import(key, "no recognizable email column").await?;
        Ok(())
    }

    /// Poll loop honoring the cancellation token.
    pub fn spawn_poller(self, cancel: CancelToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.recover().await {
                warn!(error = %err, "import recovery failed");
            }
            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.poll_once().await {
                            Ok(0) => {}
                            Ok(n) => info!(files = n, "import poll finished"),
                            Err(err) => warn!(error = %err, "import poll failed"),
                        }
                    }
                }
            }
        })
    }
}

fn read_rows(content: &[u8]) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn suppression_request(record: &NormalizedRecord) -> GlobalSuppressRequest {
    let reason = if record.reason.is_empty() {
        if record.bounce_category.is_empty() {
            "imported-suppression".to_string()
        } else {
            record.bounce_category.clone()
        }
    } else {
        record.reason.clone()
    };
    GlobalSuppressRequest {
        email: record.email.clone(),
        reason,
        source: "import".to_string(),
        isp: None,
        dsn_code: record.dsn_code.clone(),
        dsn_diag: String::new(),
        source_ip: String::new(),
        campaign_id: String::new(),
    }
}

fn subscriber_row(list_id: i64, record: &NormalizedRecord) -> SubscriberRow {
    let now = Utc::now();
    SubscriberRow {
        list_id,
        email: record.email.clone(),
        first_name: record.first_name.clone(),
        last_name: record.last_name.clone(),
        city: record.city.clone(),
        state: record.state.clone(),
        country: record.country.clone(),
        zip: record.zip.clone(),
        phone: record.phone.clone(),
        verification_status: record.verification_status.as_str().to_string(),
        domain_group: record.domain_group.as_str().to_string(),
        quality_score: record.quality_score,
        is_role: record.is_role,
        is_disposable: record.is_disposable,
        is_bot: record.is_bot,
        engagement_behavior: record.engagement_behavior.clone(),
        bounce_category: record.bounce_category.clone(),
        dsn_code: record.dsn_code.clone(),
        custom_fields: Value::Object(record.extras.clone()),
        created_at: now,
        updated_at: now,
    }
}
