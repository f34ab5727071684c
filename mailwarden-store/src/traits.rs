//! Store trait contracts consumed by the engine core

use crate::error::Result;
use crate::rows::{
    AgentStateRow, BatchOutcome, DecisionRow, GlobalSuppressionRow, ImportLogRow, SubscriberRow,
    SuppressionRow,
};
use async_trait::async_trait;
use mailwarden_core::IspConfig;

/// Per-ISP governance configuration, unique on (tenant, isp).
#[async_trait]
pub trait IspConfigStore: Send + Sync {
    async fn load_isp_configs(&self, tenant: &str) -> Result<Vec<IspConfig>>;

    async fn upsert_isp_config(&self, tenant: &str, config: &IspConfig) -> Result<()>;
}

/// Load the tenant's ISP configurations, seeding the conservative defaults
/// on first boot. Stored entries that fail validation are replaced by the
/// default for their cluster.
pub async fn load_or_seed_isp_configs(
    store: &dyn IspConfigStore,
    tenant: &str,
) -> Result<Vec<IspConfig>> {
    let stored = store.load_isp_configs(tenant).await?;
    if stored.is_empty() {
        let defaults = IspConfig::default_set();
        for config in &defaults {
            store.upsert_isp_config(tenant, config).await?;
        }
        return Ok(defaults);
    }
    Ok(stored
        .into_iter()
        .map(|config| {
            if config.validate().is_ok() {
                config
            } else {
                IspConfig::default_for(config.isp)
            }
        })
        .collect())
}

/// Decision persistence.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn insert_decision(&self, row: &DecisionRow) -> Result<()>;

    /// Update the result column of an existing decision.
    async fn update_decision_result(&self, id: &str, result: &str) -> Result<()>;

    /// Most recent decisions for a tenant, newest first.
    async fn recent_decisions(&self, tenant: &str, limit: usize) -> Result<Vec<DecisionRow>>;
}

/// Agent state persistence, unique on (tenant, isp, agent_type).
#[async_trait]
pub trait AgentStateStore: Send + Sync {
    async fn upsert_agent_state(&self, row: &AgentStateRow) -> Result<()>;

    async fn get_agent_state(
        &self,
        tenant: &str,
        isp: &str,
        agent_type: &str,
    ) -> Result<Option<AgentStateRow>>;

    async fn list_agent_states(&self, tenant: &str) -> Result<Vec<AgentStateRow>>;
}

/// Per-ISP suppression rows, unique on (tenant, isp, email).
#[async_trait]
pub trait SuppressionRowStore: Send + Sync {
    /// Insert-ignore. `Ok(true)` when the row is new.
    async fn insert_suppression(&self, row: &SuppressionRow) -> Result<bool>;

    /// All suppressed emails for an ISP, for hot-set and file rebuilds.
    async fn suppressed_emails(&self, tenant: &str, isp: &str) -> Result<Vec<String>>;
}

/// Org-wide suppression rows, unique on (tenant, md5_hash).
#[async_trait]
pub trait GlobalSuppressionRowStore: Send + Sync {
    /// Upsert on the md5 conflict key. `Ok(true)` when the row is new.
    async fn upsert_global_suppression(&self, row: &GlobalSuppressionRow) -> Result<bool>;

    /// All suppressed emails, ordered, for file rebuilds.
    async fn global_suppression_emails(&self, tenant: &str) -> Result<Vec<String>>;

    /// All md5 hashes for export.
    async fn global_suppression_hashes(&self, tenant: &str) -> Result<Vec<String>>;
}

/// Import bookkeeping, unique on original_key.
#[async_trait]
pub trait ImportLogStore: Send + Sync {
    /// Register a file as processing. `Ok(false)` when the key is already
    /// known (dedup).
    async fn begin_import(&self, row: &ImportLogRow) -> Result<bool>;

    async fn update_import_progress(
        &self,
        original_key: &str,
        record_count: u64,
        error_count: u64,
    ) -> Result<()>;

    async fn complete_import(
        &self,
        original_key: &str,
        renamed_key: &str,
        record_count: u64,
        error_count: u64,
        original_exists: bool,
    ) -> Result<()>;

    async fn fail_import(&self, original_key: &str, error: &str) -> Result<()>;

    /// All keys ever logged, used to dedup the poll listing.
    async fn known_keys(&self) -> Result<Vec<String>>;

    /// Remove rows stuck in processing (crash recovery) and return their
    /// keys so the files get reprocessed.
    async fn reset_in_flight(&self) -> Result<Vec<String>>;

    /// Monotonic sequence for `processed/` object names.
    async fn next_import_sequence(&self) -> Result<u64>;
}

/// Subscriber upserts with merge-on-conflict semantics.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Upsert a batch. Conflicts on (list_id, email) merge: names keep the
    /// richer value, quality_score takes the greatest, verification prefers
    /// definitive states, custom_fields JSON objects are concatenated.
    async fn upsert_subscribers(&self, rows: Vec<SubscriberRow>) -> Result<BatchOutcome>;

    async fn get_subscriber(&self, list_id: i64, email: &str) -> Result<Option<SubscriberRow>>;

    async fn count_subscribers(&self, list_id: i64) -> Result<u64>;
}
