//! Governance decisions emitted by agents

use chrono::{DateTime, Utc};
use mailwarden_core::{AgentKind, Isp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Closed set of governance actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ReduceRate,
    IncreaseRate,
    BackoffMode,
    SnapToStableRate,
    DisableSourceIp,
    QuarantineIp,
    WarnBounceRate,
    WarnComplaintRate,
    PauseIspQueues,
    ReduceIpVolume,
    PauseWarmup,
    AdvanceWarmupDay,
    EmergencyHalt,
    VelocityAlertReputation,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::ReduceRate => "reduce_rate",
            Action::IncreaseRate => "increase_rate",
            Action::BackoffMode => "backoff_mode",
            Action::SnapToStableRate => "snap_to_stable_rate",
            Action::DisableSourceIp => "disable_source_ip",
            Action::QuarantineIp => "quarantine_ip",
            Action::WarnBounceRate => "warn_bounce_rate",
            Action::WarnComplaintRate => "warn_complaint_rate",
            Action::PauseIspQueues => "pause_isp_queues",
            Action::ReduceIpVolume => "reduce_ip_volume",
            Action::PauseWarmup => "pause_warmup",
            Action::AdvanceWarmupDay => "advance_warmup_day",
            Action::EmergencyHalt => "emergency_halt",
            Action::VelocityAlertReputation => "velocity_alert_reputation",
        }
    }

    /// Actions that fan out to the alert sender.
    pub fn is_significant(&self) -> bool {
        matches!(
            self,
            Action::EmergencyHalt
                | Action::DisableSourceIp
                | Action::QuarantineIp
                | Action::PauseIspQueues
                | Action::VelocityAlertReputation
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a decision targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Ip,
    Isp,
    Pool,
}

impl TargetType {
    pub fn name(&self) -> &'static str {
        match self {
            TargetType::Ip => "ip",
            TargetType::Isp => "isp",
            TargetType::Pool => "pool",
        }
    }
}

/// Decision lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionResult {
    Pending,
    Applied,
    Rejected,
    Failed,
    Reverted,
}

impl DecisionResult {
    pub fn name(&self) -> &'static str {
        match self {
            DecisionResult::Pending => "pending",
            DecisionResult::Applied => "applied",
            DecisionResult::Rejected => "rejected",
            DecisionResult::Failed => "failed",
            DecisionResult::Reverted => "reverted",
        }
    }
}

/// One governance decision, transferred by value over the decision channel.
/// Emission is at-least-once; the executor is idempotent on targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub isp: Isp,
    pub agent: AgentKind,
    pub action: Action,
    pub action_params: Value,
    pub target_type: TargetType,
    pub target_value: String,
    pub signal_values: Value,
    pub result: DecisionResult,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        isp: Isp,
        agent: AgentKind,
        action: Action,
        target_type: TargetType,
        target_value: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            isp,
            agent,
            action,
            action_params: Value::Null,
            target_type,
            target_value: target_value.into(),
            signal_values: Value::Null,
            result: DecisionResult::Pending,
            created_at,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.action_params = params;
        self
    }

    pub fn with_signals(mut self, signals: Value) -> Self {
        self.signal_values = signals;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_names_are_snake_case() {
        assert_eq!(Action::DisableSourceIp.name(), "disable_source_ip");
        assert_eq!(Action::VelocityAlertReputation.name(), "velocity_alert_reputation");
    }

    #[test]
    fn significant_actions_match_alert_set() {
        assert!(Action::EmergencyHalt.is_significant());
        assert!(Action::QuarantineIp.is_significant());
        assert!(!Action::IncreaseRate.is_significant());
        assert!(!Action::AdvanceWarmupDay.is_significant());
    }

    #[test]
    fn decision_builder() {
        let decision = Decision::new(
            Isp::Gmail,
            AgentKind::Reputation,
            Action::DisableSourceIp,
            TargetType::Ip,
            "1.2.3.4",
            Utc::now(),
        )
        .with_params(json!({"reason": "bounce threshold"}))
        .with_signals(json!({"bounce_rate_1h": 4.0}));

        assert_eq!(decision.result, DecisionResult::Pending);
        assert_eq!(decision.target_value, "1.2.3.4");
        assert_eq!(decision.action_params["reason"], "bounce threshold");
    }
}
