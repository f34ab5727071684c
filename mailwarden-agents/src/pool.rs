//! Pool agent
//!
//! Per-IP enforcement from the composite score: quarantine below 50, volume
//! reduction below 70, WILL convictions for healthy high-volume IPs.

use crate::base::{AgentBase, snapshot_context};
use crate::decision::{Action, Decision, TargetType};
use chrono::{DateTime, Utc};
use mailwarden_conviction::{Conviction, ConvictionStore, Verdict};
use mailwarden_core::{AgentKind, Isp, IspConfig};
use mailwarden_signals::SignalSnapshot;
use serde_json::json;
use std::sync::Arc;

/// Below this score an IP is quarantined.
const QUARANTINE_SCORE: f64 = 50.0;
/// Below this score an IP's volume is reduced.
const REDUCE_SCORE: f64 = 70.0;
/// At or above this score a high-volume IP earns a WILL conviction.
const HEALTHY_SCORE: f64 = 85.0;
const HEALTHY_MIN_SENT: u64 = 100;

pub struct PoolAgent {
    pub base: AgentBase,
    config: IspConfig,
    convictions: Arc<ConvictionStore>,
}

impl PoolAgent {
    pub fn new(isp: Isp, config: IspConfig, convictions: Arc<ConvictionStore>) -> Self {
        Self { base: AgentBase::new(isp, AgentKind::Pool), config, convictions }
    }

    pub fn evaluate(&mut self, snapshot: &SignalSnapshot, now: DateTime<Utc>) -> Vec<Decision> {
        if !self.base.begin_evaluation(now) {
            return Vec::new();
        }

        let mut decisions = Vec::new();
        for metric in &snapshot.ip_metrics {
            let mut ctx = snapshot_context(snapshot, now);
            ctx.ip = Some(metric.ip.clone());
            ctx.ip_score = Some(metric.score);
            ctx.pool = Some(self.config.pool_name.clone());

            let signals = json!({
                "score": metric.score,
                "bounce_rate_1h": metric.bounce_rate_1h,
                "complaint_rate_24h": metric.complaint_rate_24h,
                "deferral_rate_5m": metric.deferral_rate_5m,
                "sent_1h": metric.sent_1h,
            });

            if metric.score < QUARANTINE_SCORE {
                ctx.from_pool = Some(self.config.pool_name.clone());
                ctx.to_pool = Some("quarantine-pool".to_string());
                decisions.push(
                    Decision::new(
                        self.base.isp,
                        AgentKind::Pool,
                        Action::QuarantineIp,
                        TargetType::Ip,
                        &metric.ip,
                        now,
                    )
                    .with_params(json!({
                        "from_pool": self.config.pool_name,
                        "to_pool": "quarantine-pool",
                    }))
                    .with_signals(signals),
                );
                self.convictions.record(Conviction::new(
                    self.base.isp,
                    AgentKind::Pool,
                    Verdict::Wont,
                    format!("ip {} score {:.0} below quarantine line", metric.ip, metric.score),
                    ctx,
                    now,
                ));
            } else if metric.score < REDUCE_SCORE {
                decisions.push(
                    Decision::new(
                        self.base.isp,
                        AgentKind::Pool,
                        Action::ReduceIpVolume,
                        TargetType::Ip,
                        &metric.ip,
                        now,
                    )
                    .with_params(json!({"pool": self.config.pool_name}))
                    .with_signals(signals),
                );
                self.convictions.record(Conviction::new(
                    self.base.isp,
                    AgentKind::Pool,
                    Verdict::Wont,
                    format!("ip {} score {:.0} degraded, reducing volume", metric.ip, metric.score),
                    ctx,
                    now,
                ));
            } else if metric.score >= HEALTHY_SCORE && metric.sent_1h >= HEALTHY_MIN_SENT {
                self.convictions.record(Conviction::new(
                    self.base.isp,
                    AgentKind::Pool,
                    Verdict::Will,
                    format!("ip {} holding score {:.0} at {} sent/h", metric.ip, metric.score, metric.sent_1h),
                    ctx,
                    now,
                ));
            }
        }

        self.base.decisions_count += decisions.len() as u64;
        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailwarden_signals::IpMetric;

    fn agent() -> PoolAgent {
        PoolAgent::new(
            Isp::Yahoo,
            IspConfig::default_for(Isp::Yahoo),
            Arc::new(ConvictionStore::new(None)),
        )
    }

    fn snapshot(score: f64, sent_1h: u64) -> SignalSnapshot {
        let mut snapshot = SignalSnapshot::empty(Isp::Yahoo, Utc::now());
        snapshot.ip_metrics = vec![IpMetric {
            ip: "5.6.7.8".into(),
            bounce_rate_1h: 0.0,
            complaint_rate_24h: 0.0,
            deferral_rate_5m: 0.0,
            sent_1h,
            accepted_1h: sent_1h,
            score,
        }];
        snapshot
    }

    #[test]
    fn low_score_quarantines_with_pool_params() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot(42.0, 500), Utc::now());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, Action::QuarantineIp);
        assert_eq!(decisions[0].action_params["from_pool"], "yahoo-pool");

        let wonts = agent.convictions.recall_by_verdict(Isp::Yahoo, AgentKind::Pool, Verdict::Wont);
        assert_eq!(wonts[0].context.to_pool.as_deref(), Some("quarantine-pool"));
    }

    #[test]
    fn middling_score_reduces_volume() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot(62.0, 500), Utc::now());
        assert_eq!(decisions[0].action, Action::ReduceIpVolume);
    }

    #[test]
    fn healthy_score_records_will_only() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot(90.0, 500), Utc::now());
        assert!(decisions.is_empty());
        assert_eq!(
            agent.convictions.recall_by_verdict(Isp::Yahoo, AgentKind::Pool, Verdict::Will).len(),
            1
        );
    }

    #[test]
    fn healthy_low_volume_is_ignored() {
        let mut agent = agent();
        agent.evaluate(&snapshot(90.0, 50), Utc::now());
        assert!(agent.convictions.recall_all(Isp::Yahoo, AgentKind::Pool).is_empty());
    }

    #[test]
    fn boundary_scores() {
        let mut agent = agent();
        // Exactly 50 is not quarantined, exactly 70 is not reduced.
        let decisions = agent.evaluate(&snapshot(50.0, 500), Utc::now());
        assert_eq!(decisions[0].action, Action::ReduceIpVolume);
        let decisions = agent.evaluate(&snapshot(70.0, 500), Utc::now());
        assert!(decisions.is_empty());
    }
}
