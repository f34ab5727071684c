//! Embedded `sled` implementation of the store contracts
//!
//! One tree per table, composite string keys, `serde_json` values. Unique
//! constraints map to key identity; insert-ignore uses compare-and-swap
//! against an absent key.

use crate::error::{Result, StoreError};
use crate::rows::{
    AgentStateRow, BatchOutcome, DecisionRow, GlobalSuppressionRow, ImportLogRow, ImportStatus,
    SubscriberRow, SuppressionRow,
};
use crate::traits::{
    AgentStateStore, DecisionStore, GlobalSuppressionRowStore, ImportLogStore, IspConfigStore,
    SubscriberStore, SuppressionRowStore,
};
use async_trait::async_trait;
use chrono::Utc;
use mailwarden_core::IspConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

const TREE_DECISIONS: &str = "decisions";
const TREE_AGENT_STATES: &str = "agent_states";
const TREE_SUPPRESSIONS: &str = "suppressions";
const TREE_GLOBAL_SUPPRESSIONS: &str = "global_suppressions";
const TREE_IMPORT_LOG: &str = "import_log";
const TREE_SUBSCRIBERS: &str = "subscribers";
const TREE_META: &str = "meta";
const TREE_ISP_CONFIGS: &str = "isp_configs";

/// Embedded store backed by a sled database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory database for tests; removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }

    fn put<T: Serialize>(tree: &sled::Tree, key: &str, value: &T) -> Result<()> {
        tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(tree: &sled::Tree, key: &str) -> Result<Option<T>> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert only when `key` is absent. `Ok(true)` when inserted.
    fn insert_if_absent<T: Serialize>(tree: &sled::Tree, key: &str, value: &T) -> Result<bool> {
        let bytes = serde_json::to_vec(value)?;
        let outcome = tree.compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(bytes))?;
        Ok(outcome.is_ok())
    }

    fn scan<T: DeserializeOwned>(tree: &sled::Tree, prefix: &str) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for entry in tree.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = entry?;
            rows.push(serde_json::from_slice(&bytes)?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl DecisionStore for SledStore {
    async fn insert_decision(&self, row: &DecisionRow) -> Result<()> {
        let tree = self.tree(TREE_DECISIONS)?;
        Self::put(&tree, &row.id, row)
    }

    async fn update_decision_result(&self, id: &str, result: &str) -> Result<()> {
        let tree = self.tree(TREE_DECISIONS)?;
        let Some(mut row) = Self::get::<DecisionRow>(&tree, id)? else {
            return Err(StoreError::Backend(format!("decision not found: {}", id)));
        };
        row.result = result.to_string();
        Self::put(&tree, id, &row)
    }

    async fn recent_decisions(&self, tenant: &str, limit: usize) -> Result<Vec<DecisionRow>> {
        let tree = self.tree(TREE_DECISIONS)?;
        let mut rows: Vec<DecisionRow> = Self::scan(&tree, "")?;
        rows.retain(|row| row.tenant == tenant);
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl AgentStateStore for SledStore {
    async fn upsert_agent_state(&self, row: &AgentStateRow) -> Result<()> {
        let tree = self.tree(TREE_AGENT_STATES)?;
        let key = format!("{}|{}|{}", row.tenant, row.isp, row.agent_type);
        let mut row = row.clone();
        if let Some(existing) = Self::get::<AgentStateRow>(&tree, &key)? {
            row.created_at = existing.created_at;
        }
        row.updated_at = Utc::now();
        Self::put(&tree, &key, &row)
    }

    async fn get_agent_state(
        &self,
        tenant: &str,
        isp: &str,
        agent_type: &str,
    ) -> Result<Option<AgentStateRow>> {
        let tree = self.tree(TREE_AGENT_STATES)?;
        Self::get(&tree, &format!("{}|{}|{}", tenant, isp, agent_type))
    }

    async fn list_agent_states(&self, tenant: &str) -> Result<Vec<AgentStateRow>> {
        let tree = self.tree(TREE_AGENT_STATES)?;
        Self::scan(&tree, &format!("{}|", tenant))
    }
}

#[async_trait]
impl SuppressionRowStore for SledStore {
    async fn insert_suppression(&self, row: &SuppressionRow) -> Result<bool> {
        let tree = self.tree(TREE_SUPPRESSIONS)?;
        let key = format!("{}|{}|{}", row.tenant, row.isp, row.email);
        Self::insert_if_absent(&tree, &key, row)
    }

    async fn suppressed_emails(&self, tenant: &str, isp: &str) -> Result<Vec<String>> {
        let tree = self.tree(TREE_SUPPRESSIONS)?;
        let rows: Vec<SuppressionRow> = Self::scan(&tree, &format!("{}|{}|", tenant, isp))?;
        Ok(rows.into_iter().map(|row| row.email).collect())
    }
}

#[async_trait]
impl GlobalSuppressionRowStore for SledStore {
    async fn upsert_global_suppression(&self, row: &GlobalSuppressionRow) -> Result<bool> {
        let tree = self.tree(TREE_GLOBAL_SUPPRESSIONS)?;
        let key = format!("{}|{}", row.tenant, row.md5_hash);
        if let Some(mut existing) = Self::get::<GlobalSuppressionRow>(&tree, &key)? {
            existing.updated_at = Utc::now();
            Self::put(&tree, &key, &existing)?;
            return Ok(false);
        }
        Self::put(&tree, &key, row)?;
        Ok(true)
    }

    async fn global_suppression_emails(&self, tenant: &str) -> Result<Vec<String>> {
        let tree = self.tree(TREE_GLOBAL_SUPPRESSIONS)?;
        let rows: Vec<GlobalSuppressionRow> = Self::scan(&tree, &format!("{}|", tenant))?;
        let mut emails: Vec<String> = rows.into_iter().map(|row| row.email).collect();
        emails.sort();
        Ok(emails)
    }

    async fn global_suppression_hashes(&self, tenant: &str) -> Result<Vec<String>> {
        let tree = self.tree(TREE_GLOBAL_SUPPRESSIONS)?;
        let rows: Vec<GlobalSuppressionRow> = Self::scan(&tree, &format!("{}|", tenant))?;
        Ok(rows.into_iter().map(|row| row.md5_hash).collect())
    }
}

#[async_trait]
impl ImportLogStore for SledStore {
    async fn begin_import(&self, row: &ImportLogRow) -> Result<bool> {
        let tree = self.tree(TREE_IMPORT_LOG)?;
        Self::insert_if_absent(&tree, &row.original_key, row)
    }

    async fn update_import_progress(
        &self,
        original_key: &str,
        record_count: u64,
        error_count: u64,
    ) -> Result<()> {
        let tree = self.tree(TREE_IMPORT_LOG)?;
        let Some(mut row) = Self::get::<ImportLogRow>(&tree, original_key)? else {
            return Err(StoreError::Backend(format!("import log missing: {}", original_key)));
        };
        row.record_count = record_count;
        row.error_count = error_count;
        Self::put(&tree, original_key, &row)
    }

    async fn complete_import(
        &self,
        original_key: &str,
        renamed_key: &str,
        record_count: u64,
        error_count: u64,
        original_exists: bool,
    ) -> Result<()> {
        let tree = self.tree(TREE_IMPORT_LOG)?;
        let Some(mut row) = Self::get::<ImportLogRow>(&tree, original_key)? else {
            return Err(StoreError::Backend(format!("import log missing: {}", original_key)));
        };
        row.status = ImportStatus::Completed;
        row.renamed_key = Some(renamed_key.to_string());
        row.record_count = record_count;
        row.error_count = error_count;
        row.original_exists = original_exists;
        row.processed_at = Some(Utc::now());
        Self::put(&tree, original_key, &row)
    }

    async fn fail_import(&self, original_key: &str, error: &str) -> Result<()> {
        let tree = self.tree(TREE_IMPORT_LOG)?;
        let Some(mut row) = Self::get::<ImportLogRow>(&tree, original_key)? else {
            return Err(StoreError::Backend(format!("import log missing: {}", original_key)));
        };
        row.status = ImportStatus::Failed;
        row.error_message = Some(error.to_string());
        row.processed_at = Some(Utc::now());
        Self::put(&tree, original_key, &row)
    }

    async fn known_keys(&self) -> Result<Vec<String>> {
        let tree = self.tree(TREE_IMPORT_LOG)?;
        let rows: Vec<ImportLogRow> = Self::scan(&tree, "")?;
        Ok(rows.into_iter().map(|row| row.original_key).collect())
    }

    async fn reset_in_flight(&self) -> Result<Vec<String>> {
        let tree = self.tree(TREE_IMPORT_LOG)?;
        let rows: Vec<ImportLogRow> = Self::scan(&tree, "")?;
        let mut reset = Vec::new();
        for row in rows {
            if row.status == ImportStatus::Processing {
                tree.remove(row.original_key.as_bytes())?;
                reset.push(row.original_key);
            }
        }
        if !reset.is_empty() {
            debug!(count = reset.len(), "reset in-flight imports");
        }
        Ok(reset)
    }

    async fn next_import_sequence(&self) -> Result<u64> {
        let tree = self.tree(TREE_META)?;
        let bytes = tree.update_and_fetch("import_seq", |current| {
            let next = current
                .and_then(|bytes| bytes.try_into().ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0)
                + 1;
            Some(next.to_be_bytes().to_vec())
        })?;
        let bytes = bytes.ok_or_else(|| StoreError::Backend("sequence update lost".into()))?;
        let array: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| StoreError::Backend("corrupt sequence value".into()))?;
        Ok(u64::from_be_bytes(array))
    }
}

#[async_trait]
impl IspConfigStore for SledStore {
    async fn load_isp_configs(&self, tenant: &str) -> Result<Vec<IspConfig>> {
        let tree = self.tree(TREE_ISP_CONFIGS)?;
        Self::scan(&tree, &format!("{}|", tenant))
    }

    async fn upsert_isp_config(&self, tenant: &str, config: &IspConfig) -> Result<()> {
        let tree = self.tree(TREE_ISP_CONFIGS)?;
        Self::put(&tree, &format!("{}|{}", tenant, config.isp.name()), config)
    }
}

/// Verification states that always win a merge.
fn is_definitive_verification(status: &str) -> bool {
    matches!(status, "verified" | "invalid")
}

/// Merge an incoming subscriber row into the stored one.
fn merge_subscriber(mut existing: SubscriberRow, incoming: &SubscriberRow) -> SubscriberRow {
    fn pick(new: &str, old: &str) -> String {
        if new.trim().is_empty() { old.to_string() } else { new.to_string() }
    }

    existing.first_name = pick(&incoming.first_name, &existing.first_name);
    existing.last_name = pick(&incoming.last_name, &existing.last_name);
    existing.city = pick(&incoming.city, &existing.city);
    existing.state = pick(&incoming.state, &existing.state);
    existing.country = pick(&incoming.country, &existing.country);
    existing.zip = pick(&incoming.zip, &existing.zip);
    existing.phone = pick(&incoming.phone, &existing.phone);
    existing.engagement_behavior = pick(&incoming.engagement_behavior, &existing.engagement_behavior);
    existing.bounce_category = pick(&incoming.bounce_category, &existing.bounce_category);
    existing.dsn_code = pick(&incoming.dsn_code, &existing.dsn_code);
    existing.domain_group = pick(&incoming.domain_group, &existing.domain_group);

    existing.quality_score = existing.quality_score.max(incoming.quality_score);
    existing.is_role = existing.is_role || incoming.is_role;
    existing.is_disposable = existing.is_disposable || incoming.is_disposable;
    existing.is_bot = existing.is_bot || incoming.is_bot;

    if is_definitive_verification(&incoming.verification_status)
        || (!is_definitive_verification(&existing.verification_status)
            && incoming.verification_status != "unknown")
    {
        existing.verification_status = incoming.verification_status.clone();
    }

    // Concatenate custom-fields objects; incoming keys win.
    if let (Value::Object(old), Value::Object(new)) =
        (&mut existing.custom_fields, &incoming.custom_fields)
    {
        for (key, value) in new {
            old.insert(key.clone(), value.clone());
        }
    } else if incoming.custom_fields.is_object() {
        existing.custom_fields = incoming.custom_fields.clone();
    }

    existing.updated_at = Utc::now();
    existing
}

#[async_trait]
impl SubscriberStore for SledStore {
    async fn upsert_subscribers(&self, rows: Vec<SubscriberRow>) -> Result<BatchOutcome> {
        let tree = self.tree(TREE_SUBSCRIBERS)?;
        let mut outcome = BatchOutcome::default();
        for row in rows {
            let key = format!("{}|{}", row.list_id, row.email);
            match Self::get::<SubscriberRow>(&tree, &key)? {
                Some(existing) => {
                    let merged = merge_subscriber(existing, &row);
                    Self::put(&tree, &key, &merged)?;
                    outcome.merged += 1;
                }
                None => {
                    Self::put(&tree, &key, &row)?;
                    outcome.inserted += 1;
                }
            }
        }
        tree.flush_async().await?;
        Ok(outcome)
    }

    async fn get_subscriber(&self, list_id: i64, email: &str) -> Result<Option<SubscriberRow>> {
        let tree = self.tree(TREE_SUBSCRIBERS)?;
        Self::get(&tree, &format!("{}|{}", list_id, email))
    }

    async fn count_subscribers(&self, list_id: i64) -> Result<u64> {
        let tree = self.tree(TREE_SUBSCRIBERS)?;
        Ok(tree.scan_prefix(format!("{}|", list_id).as_bytes()).count() as u64)
    }
}
