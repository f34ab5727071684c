//! Row models mirroring the relational collaborator's tables
//!
//! Cluster and agent names are carried as their stable string forms so the
//! store stays decoupled from the engine's enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `decisions` — one row per governance decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRow {
    pub id: String,
    pub tenant: String,
    pub isp: String,
    pub agent_type: String,
    pub signal_values: Value,
    pub action_taken: String,
    pub action_params: Value,
    pub target_type: String,
    pub target_value: String,
    pub result: String,
    pub reverted_at: Option<DateTime<Utc>>,
    pub revert_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `agent_states` — unique on (tenant, isp, agent_type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStateRow {
    pub tenant: String,
    pub isp: String,
    pub agent_type: String,
    pub status: String,
    pub last_eval_at: Option<DateTime<Utc>>,
    pub decisions_count: u64,
    pub current_actions: Value,
    pub error_message: Option<String>,
    pub state_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `suppressions` — unique on (tenant, isp, email).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionRow {
    pub tenant: String,
    pub email: String,
    pub isp: String,
    pub reason: String,
    pub dsn_code: String,
    pub dsn_diag: String,
    pub source_ip: String,
    pub vmta: String,
    pub campaign_id: String,
    pub suppressed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// `global_suppressions` — unique on (tenant, md5_hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSuppressionRow {
    pub tenant: String,
    pub email: String,
    pub md5_hash: String,
    pub reason: String,
    pub source: String,
    pub isp: Option<String>,
    pub dsn_code: String,
    pub dsn_diag: String,
    pub source_ip: String,
    pub campaign_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Import lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Processing,
    Completed,
    Failed,
}

/// `data_import_log` — unique on original_key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportLogRow {
    pub original_key: String,
    pub renamed_key: Option<String>,
    pub classification: String,
    pub status: ImportStatus,
    pub record_count: u64,
    pub error_count: u64,
    pub error_message: Option<String>,
    pub original_exists: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// `subscribers` — unique on (list_id, email).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberRow {
    pub list_id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip: String,
    pub phone: String,
    pub verification_status: String,
    pub domain_group: String,
    pub quality_score: f64,
    pub is_role: bool,
    pub is_disposable: bool,
    pub is_bot: bool,
    pub engagement_behavior: String,
    pub bounce_category: String,
    pub dsn_code: String,
    /// Vendor extras, a JSON object merged across imports.
    pub custom_fields: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one subscriber batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: u64,
    pub merged: u64,
}
