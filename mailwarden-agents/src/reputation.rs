//! Reputation agent
//!
//! Two-tier thresholding (warn, action) of bounce and complaint rates, per
//! source IP and ISP-global. Healthy high-volume IPs produce WILL
//! convictions so the memory holds positive evidence, not just failures.

use crate::base::{AgentBase, snapshot_context};
use crate::decision::{Action, Decision, TargetType};
use chrono::{DateTime, Utc};
use mailwarden_conviction::{Conviction, ConvictionStore, Verdict};
use mailwarden_core::{AgentKind, Isp, IspConfig};
use mailwarden_signals::{IpMetric, SignalSnapshot};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Score at or above which a healthy IP earns a WILL conviction.
const HEALTHY_SCORE: f64 = 85.0;
/// Minimum hourly volume for a healthy-IP conviction.
const HEALTHY_MIN_SENT: u64 = 100;

pub struct ReputationAgent {
    pub base: AgentBase,
    config: IspConfig,
    convictions: Arc<ConvictionStore>,
}

impl ReputationAgent {
    pub fn new(isp: Isp, config: IspConfig, convictions: Arc<ConvictionStore>) -> Self {
        Self { base: AgentBase::new(isp, AgentKind::Reputation), config, convictions }
    }

    pub fn evaluate(&mut self, snapshot: &SignalSnapshot, now: DateTime<Utc>) -> Vec<Decision> {
        if !self.base.begin_evaluation(now) {
            return Vec::new();
        }

        let mut decisions = Vec::new();
        for metric in &snapshot.ip_metrics {
            self.evaluate_ip(snapshot, metric, now, &mut decisions);
        }

        // ISP-global escalation: past the action threshold the whole
        // cluster's queues pause, not just one source.
        if snapshot.bounce_rate_1h > self.config.bounce_action_pct {
            let decision = Decision::new(
                self.base.isp,
                AgentKind::Reputation,
                Action::PauseIspQueues,
                TargetType::Isp,
                self.base.isp.name(),
                now,
            )
            .with_params(json!({"pool": self.base.isp.pool_name()}))
            .with_signals(json!({
                "bounce_rate_1h": snapshot.bounce_rate_1h,
                "bounce_action_pct": self.config.bounce_action_pct,
                "sent_1h": snapshot.sent_1h,
            }));
            decisions.push(decision);

            let ctx = snapshot_context(snapshot, now);
            self.record(Conviction::new(
                self.base.isp,
                AgentKind::Reputation,
                Verdict::Wont,
                format!(
                    "cluster bounce rate {:.2}% breached action threshold {:.2}%, pausing queues",
                    snapshot.bounce_rate_1h, self.config.bounce_action_pct
                ),
                ctx,
                now,
            ));
        }

        self.base.decisions_count += decisions.len() as u64;
        decisions
    }

    fn evaluate_ip(
        &mut self,
        snapshot: &SignalSnapshot,
        metric: &IpMetric,
        now: DateTime<Utc>,
        decisions: &mut Vec<Decision>,
    ) {
        let cfg = &self.config;
        let mut ctx = snapshot_context(snapshot, now);
        ctx.ip = Some(metric.ip.clone());
        ctx.ip_score = Some(metric.score);

        let ip_signals = json!({
            "bounce_rate_1h": metric.bounce_rate_1h,
            "complaint_rate_24h": metric.complaint_rate_24h,
            "deferral_rate_5m": metric.deferral_rate_5m,
            "sent_1h": metric.sent_1h,
            "score": metric.score,
        });

        if metric.bounce_rate_1h > cfg.bounce_action_pct {
            decisions.push(
                Decision::new(
                    self.base.isp,
                    AgentKind::Reputation,
                    Action::DisableSourceIp,
                    TargetType::Ip,
                    &metric.ip,
                    now,
                )
                .with_params(json!({"threshold_pct": cfg.bounce_action_pct}))
                .with_signals(ip_signals.clone()),
            );
            self.record(Conviction::new(
                self.base.isp,
                AgentKind::Reputation,
                Verdict::Wont,
                format!(
                    "ip {} bounce rate {:.2}% above action threshold {:.2}%, disabling source",
                    metric.ip, metric.bounce_rate_1h, cfg.bounce_action_pct
                ),
                ctx.clone(),
                now,
            ));
        } else if metric.bounce_rate_1h > cfg.bounce_warn_pct {
            decisions.push(
                Decision::new(
                    self.base.isp,
                    AgentKind::Reputation,
                    Action::WarnBounceRate,
                    TargetType::Ip,
                    &metric.ip,
                    now,
                )
                .with_params(json!({"threshold_pct": cfg.bounce_warn_pct}))
                .with_signals(ip_signals.clone()),
            );
            self.record(Conviction::new(
                self.base.isp,
                AgentKind::Reputation,
                Verdict::Wont,
                format!(
                    "ip {} bounce rate {:.2}% above warning threshold {:.2}%",
                    metric.ip, metric.bounce_rate_1h, cfg.bounce_warn_pct
                ),
                ctx.clone(),
                now,
            ));
        }

        if metric.complaint_rate_24h > cfg.complaint_action_pct {
            decisions.push(
                Decision::new(
                    self.base.isp,
                    AgentKind::Reputation,
                    Action::QuarantineIp,
                    TargetType::Ip,
                    &metric.ip,
                    now,
                )
                .with_params(json!({
                    "from_pool": self.base.isp.pool_name(),
                    "to_pool": "quarantine-pool",
                }))
                .with_signals(ip_signals.clone()),
            );
            self.record(Conviction::new(
                self.base.isp,
                AgentKind::Reputation,
                Verdict::Wont,
                format!(
                    "ip {} complaint rate {:.3}% above action threshold {:.3}%, quarantining",
                    metric.ip, metric.complaint_rate_24h, cfg.complaint_action_pct
                ),
                ctx.clone(),
                now,
            ));
        } else if metric.complaint_rate_24h > cfg.complaint_warn_pct {
            decisions.push(
                Decision::new(
                    self.base.isp,
                    AgentKind::Reputation,
                    Action::WarnComplaintRate,
                    TargetType::Ip,
                    &metric.ip,
                    now,
                )
                .with_params(json!({"threshold_pct": cfg.complaint_warn_pct}))
                .with_signals(ip_signals),
            );
            self.record(Conviction::new(
                self.base.isp,
                AgentKind::Reputation,
                Verdict::Wont,
                format!(
                    "ip {} complaint rate {:.3}% above warning threshold {:.3}%",
                    metric.ip, metric.complaint_rate_24h, cfg.complaint_warn_pct
                ),
                ctx.clone(),
                now,
            ));
        }

        let healthy = metric.score >= HEALTHY_SCORE
            && metric.sent_1h >= HEALTHY_MIN_SENT
            && metric.bounce_rate_1h <= cfg.bounce_warn_pct
            && metric.complaint_rate_24h <= cfg.complaint_warn_pct;
        if healthy {
            self.record(Conviction::new(
                self.base.isp,
                AgentKind::Reputation,
                Verdict::Will,
                format!(
                    "ip {} healthy at score {:.0} with {} sent/h",
                    metric.ip, metric.score, metric.sent_1h
                ),
                ctx,
                now,
            ));
        }
    }

    fn record(&self, conviction: Conviction) {
        if conviction.statement.is_empty() {
            warn!("skipping empty conviction statement");
            return;
        }
        self.convictions.record(conviction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailwarden_signals::IpMetric;

    fn agent() -> ReputationAgent {
        let mut config = IspConfig::default_for(Isp::Gmail);
        config.bounce_warn_pct = 1.5;
        config.bounce_action_pct = 3.0;
        config.complaint_warn_pct = 0.05;
        config.complaint_action_pct = 0.1;
        ReputationAgent::new(Isp::Gmail, config, Arc::new(ConvictionStore::new(None)))
    }

    fn snapshot_with_ip(metric: IpMetric) -> SignalSnapshot {
        let mut snapshot = SignalSnapshot::empty(Isp::Gmail, Utc::now());
        snapshot.sent_1h = metric.sent_1h;
        snapshot.ip_metrics = vec![metric];
        snapshot
    }

    fn metric(bounce: f64, complaint: f64, score: f64) -> IpMetric {
        IpMetric {
            ip: "1.2.3.4".into(),
            bounce_rate_1h: bounce,
            complaint_rate_24h: complaint,
            deferral_rate_5m: 0.0,
            sent_1h: 1000,
            accepted_1h: 950,
            score,
        }
    }

    #[test]
    fn bounce_above_action_disables_source() {
        let mut agent = agent();
        let snapshot = snapshot_with_ip(metric(4.0, 0.0, 60.0));
        let decisions = agent.evaluate(&snapshot, Utc::now());

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, Action::DisableSourceIp);
        assert_eq!(decisions[0].target_value, "1.2.3.4");

        let wonts = agent.convictions.recall_by_verdict(Isp::Gmail, AgentKind::Reputation, Verdict::Wont);
        assert_eq!(wonts.len(), 1);
        assert_eq!(wonts[0].context.ip.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn bounce_between_tiers_warns() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot_with_ip(metric(2.0, 0.0, 80.0)), Utc::now());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, Action::WarnBounceRate);
    }

    #[test]
    fn complaint_above_action_quarantines() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot_with_ip(metric(0.5, 0.2, 70.0)), Utc::now());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, Action::QuarantineIp);
        assert_eq!(decisions[0].action_params["to_pool"], "quarantine-pool");
    }

    #[test]
    fn healthy_ip_records_will_without_decision() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot_with_ip(metric(0.5, 0.01, 92.0)), Utc::now());
        assert!(decisions.is_empty());

        let wills = agent.convictions.recall_by_verdict(Isp::Gmail, AgentKind::Reputation, Verdict::Will);
        assert_eq!(wills.len(), 1);
        assert_eq!(wills[0].context.ip_score, Some(92.0));
    }

    #[test]
    fn global_breach_pauses_queues() {
        let mut agent = agent();
        let mut snapshot = SignalSnapshot::empty(Isp::Gmail, Utc::now());
        snapshot.bounce_rate_1h = 5.0;
        snapshot.sent_1h = 10_000;

        let decisions = agent.evaluate(&snapshot, Utc::now());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, Action::PauseIspQueues);
        assert_eq!(decisions[0].target_type, TargetType::Isp);
    }

    #[test]
    fn paused_agent_is_silent() {
        let mut agent = agent();
        agent.base.pause();
        let decisions = agent.evaluate(&snapshot_with_ip(metric(50.0, 1.0, 0.0)), Utc::now());
        assert!(decisions.is_empty());
    }
}
