//! Emergency agent
//!
//! Spike detection that overrides everything else. A trigger moves the agent
//! to firing, writes an incident report to the durable incident log before
//! the halt decision goes out, and emits exactly one `emergency_halt` for the
//! cluster. Recovery is manual: the agent stays firing until an operator
//! resumes the ISP.

use crate::base::{AgentBase, AgentStatus, snapshot_context};
use crate::decision::{Action, Decision, TargetType};
use chrono::{DateTime, Utc};
use mailwarden_conviction::{Conviction, ConvictionStore, Verdict};
use mailwarden_core::{AgentKind, Isp, IspConfig};
use mailwarden_memory::MemoryStore;
use mailwarden_signals::SignalSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// Five-minute bounce rate that constitutes a spike.
const BOUNCE_SPIKE_PCT: f64 = 25.0;
/// Five-minute deferral rate that constitutes a spike.
const DEFERRAL_SPIKE_PCT: f64 = 50.0;
/// One-hour complaint rate that constitutes a spike.
const COMPLAINT_SPIKE_PCT: f64 = 1.0;
/// Degraded-IP count that reads as a coordinated reputation attack.
const ATTACK_IP_COUNT: usize = 3;
/// Score below which an IP counts as degraded for the attack trigger.
const ATTACK_SCORE: f64 = 50.0;

/// What fired the emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyTrigger {
    BounceSpike,
    DeferralSpike,
    ComplaintSpike,
    CoordinatedReputationAttack,
}

impl EmergencyTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            EmergencyTrigger::BounceSpike => "bounce_spike",
            EmergencyTrigger::DeferralSpike => "deferral_spike",
            EmergencyTrigger::ComplaintSpike => "complaint_spike",
            EmergencyTrigger::CoordinatedReputationAttack => "coordinated_reputation_attack",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Active,
    Resolved,
}

/// Incident record, one active per ISP at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentReport {
    pub isp: Isp,
    pub trigger: EmergencyTrigger,
    pub trigger_metrics: serde_json::Value,
    pub affected_ips: Vec<String>,
    pub affected_domains: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub actions_taken: Vec<String>,
    pub status: IncidentStatus,
}

pub struct EmergencyAgent {
    pub base: AgentBase,
    #[allow(dead_code)]
    config: IspConfig,
    convictions: Arc<ConvictionStore>,
    memory: Option<MemoryStore>,
    active_incident: Option<IncidentReport>,
}

impl EmergencyAgent {
    pub fn new(
        isp: Isp,
        config: IspConfig,
        convictions: Arc<ConvictionStore>,
        memory: Option<MemoryStore>,
    ) -> Self {
        Self {
            base: AgentBase::new(isp, AgentKind::Emergency),
            config,
            convictions,
            memory,
            active_incident: None,
        }
    }

    pub fn active_incident(&self) -> Option<&IncidentReport> {
        self.active_incident.as_ref()
    }

    /// Manual recovery: resolve the incident and rejoin the rotation.
    pub fn resolve_incident(&mut self) {
        if let Some(incident) = &mut self.active_incident {
            incident.status = IncidentStatus::Resolved;
        }
        self.active_incident = None;
        self.base.resume();
    }

    fn detect(&self, snapshot: &SignalSnapshot) -> Option<(EmergencyTrigger, serde_json::Value)> {
        if snapshot.bounce_rate_5m > BOUNCE_SPIKE_PCT {
            return Some((
                EmergencyTrigger::BounceSpike,
                json!({"bounce_rate_5m": snapshot.bounce_rate_5m, "threshold_pct": BOUNCE_SPIKE_PCT}),
            ));
        }
        if snapshot.deferral_rate_5m > DEFERRAL_SPIKE_PCT {
            return Some((
                EmergencyTrigger::DeferralSpike,
                json!({"deferral_rate_5m": snapshot.deferral_rate_5m, "threshold_pct": DEFERRAL_SPIKE_PCT}),
            ));
        }
        if snapshot.complaint_rate_1h > COMPLAINT_SPIKE_PCT {
            return Some((
                EmergencyTrigger::ComplaintSpike,
                json!({"complaint_rate_1h": snapshot.complaint_rate_1h, "threshold_pct": COMPLAINT_SPIKE_PCT}),
            ));
        }
        let degraded: Vec<&str> = snapshot
            .ip_metrics
            .iter()
            .filter(|m| m.score < ATTACK_SCORE)
            .map(|m| m.ip.as_str())
            .collect();
        if degraded.len() >= ATTACK_IP_COUNT {
            return Some((
                EmergencyTrigger::CoordinatedReputationAttack,
                json!({"degraded_ips": degraded, "threshold_count": ATTACK_IP_COUNT}),
            ));
        }
        None
    }

    /// Emergency evaluation ignores cooldown; only pause and an already
    /// firing state silence it.
    pub fn evaluate(&mut self, snapshot: &SignalSnapshot, now: DateTime<Utc>) -> Vec<Decision> {
        self.base.last_eval_at = Some(now);
        if matches!(self.base.status, AgentStatus::Paused | AgentStatus::Firing) {
            return Vec::new();
        }

        let Some((trigger, metrics)) = self.detect(snapshot) else {
            return Vec::new();
        };

        error!(isp = %self.base.isp, trigger = trigger.name(), "emergency trigger");
        self.base.status = AgentStatus::Firing;

        let incident = IncidentReport {
            isp: self.base.isp,
            trigger,
            trigger_metrics: metrics.clone(),
            affected_ips: snapshot.ip_metrics.iter().map(|m| m.ip.clone()).collect(),
            affected_domains: vec![self.base.isp.canonical_domain().to_string()],
            detected_at: now,
            actions_taken: vec![Action::EmergencyHalt.name().to_string()],
            status: IncidentStatus::Active,
        };

        // The incident must hit the durable log before the halt decision is
        // emitted.
        if let Some(memory) = &self.memory {
            let key = MemoryStore::agent_key(self.base.isp.name(), "emergency", "incidents.json");
            if let Err(err) = memory.append_line_now(&key, &incident) {
                warn!(error = %err, "incident flush failed");
            }
        }
        self.active_incident = Some(incident);

        let mut ctx = snapshot_context(snapshot, now);
        ctx.reason = Some(trigger.name().to_string());
        self.convictions.record(Conviction::new(
            self.base.isp,
            AgentKind::Emergency,
            Verdict::Wont,
            format!("emergency halt: {} on {}", trigger.name(), self.base.isp),
            ctx,
            now,
        ));

        let decision = Decision::new(
            self.base.isp,
            AgentKind::Emergency,
            Action::EmergencyHalt,
            TargetType::Isp,
            self.base.isp.name(),
            now,
        )
        .with_params(json!({"trigger": trigger.name()}))
        .with_signals(metrics);

        self.base.decisions_count += 1;
        vec![decision]
    }
}
