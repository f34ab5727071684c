//! # Mailwarden Orchestrator
//!
//! Owns the engine's task graph:
//!
//! - one record listener per ISP, each exclusively owning that cluster's
//!   suppression agent
//! - one snapshot consumer evaluating the other five agents per cluster,
//!   sequentially, to keep cross-ISP lock contention at zero
//! - one decision consumer persisting, executing and alerting
//! - the periodic tasks (signal tick/prune, reload drain, file syncs)
//!
//! Components are passed in explicitly at construction; the orchestrator
//! holds shared references and never reaches through globals.

pub mod alert;
pub mod orchestrator;
pub mod readiness;

use thiserror::Error;

pub use alert::{Alert, AlertSink, CollectingAlertSink, LogAlertSink};
pub use orchestrator::{AgentStatusInfo, Orchestrator, RECENT_DECISIONS_CAP, StatusBoard};
pub use readiness::{CampaignReadiness, IpInventory, IspReadiness, ReadyStatus, StaticIpInventory};

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors raised while wiring or driving the engine.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Store error: {0}")]
    Store(#[from] mailwarden_store::StoreError),

    #[error("Suppression error: {0}")]
    Suppression(#[from] mailwarden_suppression::SuppressionError),

    #[error("Setup error: {0}")]
    Setup(String),
}
