//! Suppression agent
//!
//! The only per-record agent. Hard bounces in the trigger category set,
//! feedback complaints, and repeated transient failures all convert into
//! permanent per-ISP suppressions, forwarded to the global hub by the
//! suppression store itself. A suppression-velocity spike raises a
//! reputation alert decision.

use crate::base::{AgentBase, AgentStatus};
use crate::decision::{Action, Decision, TargetType};
use chrono::{DateTime, Duration, Utc};
use mailwarden_conviction::{Conviction, ConvictionStore, MicroContext, Verdict};
use mailwarden_core::{AccountingRecord, AgentKind, Isp, IspConfig, RecordKind};
use mailwarden_signals::SignalSnapshot;
use mailwarden_suppression::{IspSuppressionSet, SuppressRequest};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

/// Bounce categories that trigger permanent suppression.
const TRIGGER_CATEGORIES: &[&str] = &[
    "bad-mailbox",
    "bad-domain",
    "inactive-mailbox",
    "quota-issues",
    "policy-related",
    "spam-related",
    "protocol-errors",
    "content-related",
    "bad-connection",
    "too-many-connections",
    "relaying-issues",
    "no-answer-from-host",
    "routing-errors",
];

/// Window for the repeated-transient rule.
const TRANSIENT_WINDOW: Duration = Duration::hours(24);
/// Transient failures within the window that force suppression.
const TRANSIENT_LIMIT: usize = 2;
/// Sliding window for suppression velocity.
const VELOCITY_WINDOW: Duration = Duration::minutes(5);
/// Suppressions within the window that raise a reputation alert.
const VELOCITY_LIMIT: usize = 100;
/// How often the transient cache is pruned.
const PRUNE_INTERVAL: Duration = Duration::hours(1);

pub struct SuppressionAgent {
    pub base: AgentBase,
    #[allow(dead_code)]
    config: IspConfig,
    convictions: Arc<ConvictionStore>,
    suppressions: Arc<IspSuppressionSet>,

    transients: HashMap<String, Vec<DateTime<Utc>>>,
    velocity: VecDeque<DateTime<Utc>>,
    last_prune: Option<DateTime<Utc>>,
}

impl SuppressionAgent {
    pub fn new(
        isp: Isp,
        config: IspConfig,
        convictions: Arc<ConvictionStore>,
        suppressions: Arc<IspSuppressionSet>,
    ) -> Self {
        Self {
            base: AgentBase::new(isp, AgentKind::Suppression),
            config,
            convictions,
            suppressions,
            transients: HashMap::new(),
            velocity: VecDeque::new(),
            last_prune: None,
        }
    }

    /// This agent does not operate on snapshots.
    pub fn evaluate(&mut self, _snapshot: &SignalSnapshot, now: DateTime<Utc>) -> Vec<Decision> {
        self.base.last_eval_at = Some(now);
        Vec::new()
    }

    /// Process one accounting record routed to this agent's cluster.
    pub async fn process_record(&mut self, record: &AccountingRecord, now: DateTime<Utc>) -> Vec<Decision> {
        if self.base.status == AgentStatus::Paused {
            return Vec::new();
        }
        self.maybe_prune(now);

        if self.suppressions.is_suppressed(self.base.isp, &record.recipient) {
            return Vec::new();
        }

        let reason = match record.kind {
            RecordKind::Bounce => {
                let category = record.bounce_category.to_ascii_lowercase();
                if TRIGGER_CATEGORIES.contains(&category.as_str()) {
                    Some(category)
                } else {
                    None
                }
            }
            RecordKind::Feedback => Some("fbl-complaint".to_string()),
            RecordKind::Transient | RecordKind::TransientQueued => {
                let email = record.recipient.clone();
                let cutoff = now - TRANSIENT_WINDOW;
                let times = self.transients.entry(email).or_default();
                times.retain(|t| *t >= cutoff);
                times.push(record.timestamp);
                if times.len() >= TRANSIENT_LIMIT {
                    self.transients.remove(&record.recipient);
                    Some("repeated-transient".to_string())
                } else {
                    None
                }
            }
            RecordKind::Delivery => None,
        };

        let Some(reason) = reason else {
            return Vec::new();
        };
        self.suppress(record, reason, now).await
    }

    async fn suppress(
        &mut self,
        record: &AccountingRecord,
        reason: String,
        now: DateTime<Utc>,
    ) -> Vec<Decision> {
        let request = SuppressRequest {
            isp: self.base.isp,
            email: record.recipient.clone(),
            reason: reason.clone(),
            dsn_code: record.dsn_code.clone(),
            dsn_diag: record.dsn_diag.clone(),
            source_ip: record.source_ip.clone(),
            vmta: record.vmta.clone(),
            campaign_id: record.job_id.clone(),
            at: record.timestamp,
        };

        let new = match self.suppressions.suppress(request).await {
            Ok(new) => new,
            Err(err) => {
                warn!(isp = %self.base.isp, error = %err, "suppression failed");
                return Vec::new();
            }
        };
        if !new {
            return Vec::new();
        }

        info!(isp = %self.base.isp, reason = %reason, "recipient suppressed");

        let mut ctx = MicroContext::temporal(now);
        ctx.email = Some(record.recipient.clone());
        ctx.domain = Some(record.domain.clone());
        ctx.ip = (!record.source_ip.is_empty()).then(|| record.source_ip.clone());
        ctx.vmta = (!record.vmta.is_empty()).then(|| record.vmta.clone());
        ctx.campaign_id = (!record.job_id.is_empty()).then(|| record.job_id.clone());
        ctx.reason = Some(reason.clone());
        ctx.dsn_codes = if record.dsn_code.is_empty() { Vec::new() } else { vec![record.dsn_code.clone()] };
        ctx.dsn_diagnostics =
            if record.dsn_diag.is_empty() { Vec::new() } else { vec![record.dsn_diag.clone()] };
        self.convictions.record(Conviction::new(
            self.base.isp,
            AgentKind::Suppression,
            Verdict::Wont,
            format!("suppressed {} ({})", record.recipient, reason),
            ctx,
            now,
        ));

        // Velocity tracking over the alert window.
        self.velocity.push_back(now);
        let cutoff = now - VELOCITY_WINDOW;
        while self.velocity.front().is_some_and(|t| *t < cutoff) {
            self.velocity.pop_front();
        }
        let mut decisions = Vec::new();
        if self.velocity.len() > VELOCITY_LIMIT {
            decisions.push(
                Decision::new(
                    self.base.isp,
                    AgentKind::Suppression,
                    Action::VelocityAlertReputation,
                    TargetType::Isp,
                    self.base.isp.name(),
                    now,
                )
                .with_params(json!({
                    "suppressions_5m": self.velocity.len(),
                    "limit": VELOCITY_LIMIT,
                }))
                .with_signals(json!({"last_reason": reason})),
            );
            self.base.decisions_count += 1;
        }
        decisions
    }

    fn maybe_prune(&mut self, now: DateTime<Utc>) {
        let due = self.last_prune.map_or(true, |last| now - last >= PRUNE_INTERVAL);
        if !due {
            return;
        }
        self.last_prune = Some(now);
        let cutoff = now - TRANSIENT_WINDOW;
        self.transients.retain(|_, times| {
            times.retain(|t| *t >= cutoff);
            !times.is_empty()
        });
    }
}
