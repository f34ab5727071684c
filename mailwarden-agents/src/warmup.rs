//! Warmup agent
//!
//! Guards the staged daily-volume ramp. Bad signal pauses the ramp with a
//! hold; clean signal advances it. Daily-volume enforcement itself lives in
//! the MTA config generator; this agent only emits the transitions.

use crate::base::{AgentBase, snapshot_context};
use crate::decision::{Action, Decision, TargetType};
use chrono::{DateTime, Utc};
use mailwarden_conviction::{Conviction, ConvictionStore, Verdict};
use mailwarden_core::{AgentKind, Isp, IspConfig};
use mailwarden_signals::SignalSnapshot;
use serde_json::json;
use std::sync::Arc;

/// Bounce rate above which the ramp pauses for 48 h.
const BOUNCE_PAUSE_PCT: f64 = 5.0;
/// Complaint rate above which the ramp pauses for 72 h.
const COMPLAINT_PAUSE_PCT: f64 = 0.06;
/// Clean-signal thresholds for advancing a day.
const BOUNCE_ADVANCE_PCT: f64 = 2.0;
const COMPLAINT_ADVANCE_PCT: f64 = 0.03;

const BOUNCE_HOLD_HOURS: u64 = 48;
const COMPLAINT_HOLD_HOURS: u64 = 72;

pub struct WarmupAgent {
    pub base: AgentBase,
    config: IspConfig,
    convictions: Arc<ConvictionStore>,
}

impl WarmupAgent {
    pub fn new(isp: Isp, config: IspConfig, convictions: Arc<ConvictionStore>) -> Self {
        Self { base: AgentBase::new(isp, AgentKind::Warmup), config, convictions }
    }

    pub fn evaluate(&mut self, snapshot: &SignalSnapshot, now: DateTime<Utc>) -> Vec<Decision> {
        if !self.base.begin_evaluation(now) {
            return Vec::new();
        }
        // An idle cluster has nothing to ramp; zero rates are not a signal.
        if snapshot.sent_1h == 0 {
            return Vec::new();
        }

        let mut decisions = Vec::new();
        let mut ctx = snapshot_context(snapshot, now);
        ctx.pool = Some(self.config.pool_name.clone());

        let signals = json!({
            "bounce_rate_1h": snapshot.bounce_rate_1h,
            "complaint_rate_1h": snapshot.complaint_rate_1h,
            "sent_1h": snapshot.sent_1h,
        });

        if snapshot.bounce_rate_1h > BOUNCE_PAUSE_PCT {
            decisions.push(
                Decision::new(
                    self.base.isp,
                    AgentKind::Warmup,
                    Action::PauseWarmup,
                    TargetType::Pool,
                    self.config.pool_name.clone(),
                    now,
                )
                .with_params(json!({"hold_hours": BOUNCE_HOLD_HOURS, "trigger": "bounce"}))
                .with_signals(signals),
            );
            self.convictions.record(Conviction::new(
                self.base.isp,
                AgentKind::Warmup,
                Verdict::Wont,
                format!(
                    "warmup paused {} h: bounce rate {:.2}% over {:.1}%",
                    BOUNCE_HOLD_HOURS, snapshot.bounce_rate_1h, BOUNCE_PAUSE_PCT
                ),
                ctx,
                now,
            ));
        } else if snapshot.complaint_rate_1h > COMPLAINT_PAUSE_PCT {
            decisions.push(
                Decision::new(
                    self.base.isp,
                    AgentKind::Warmup,
                    Action::PauseWarmup,
                    TargetType::Pool,
                    self.config.pool_name.clone(),
                    now,
                )
                .with_params(json!({"hold_hours": COMPLAINT_HOLD_HOURS, "trigger": "complaint"}))
                .with_signals(signals),
            );
            self.convictions.record(Conviction::new(
                self.base.isp,
                AgentKind::Warmup,
                Verdict::Wont,
                format!(
                    "warmup paused {} h: complaint rate {:.3}% over {:.2}%",
                    COMPLAINT_HOLD_HOURS, snapshot.complaint_rate_1h, COMPLAINT_PAUSE_PCT
                ),
                ctx,
                now,
            ));
        } else if snapshot.bounce_rate_1h < BOUNCE_ADVANCE_PCT
            && snapshot.complaint_rate_1h < COMPLAINT_ADVANCE_PCT
        {
            decisions.push(
                Decision::new(
                    self.base.isp,
                    AgentKind::Warmup,
                    Action::AdvanceWarmupDay,
                    TargetType::Pool,
                    self.config.pool_name.clone(),
                    now,
                )
                .with_params(json!({"schedule_days": self.config.warmup.len_days()}))
                .with_signals(signals),
            );
            self.convictions.record(Conviction::new(
                self.base.isp,
                AgentKind::Warmup,
                Verdict::Will,
                format!(
                    "clean warmup signal (bounce {:.2}%, complaint {:.3}%), advancing ramp",
                    snapshot.bounce_rate_1h, snapshot.complaint_rate_1h
                ),
                ctx,
                now,
            ));
        }

        self.base.decisions_count += decisions.len() as u64;
        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> WarmupAgent {
        WarmupAgent::new(
            Isp::Comcast,
            IspConfig::default_for(Isp::Comcast),
            Arc::new(ConvictionStore::new(None)),
        )
    }

    fn snapshot(bounce: f64, complaint: f64) -> SignalSnapshot {
        let mut snapshot = SignalSnapshot::empty(Isp::Comcast, Utc::now());
        snapshot.bounce_rate_1h = bounce;
        snapshot.complaint_rate_1h = complaint;
        snapshot.sent_1h = 1000;
        snapshot
    }

    #[test]
    fn high_bounce_pauses_for_48h() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot(6.0, 0.0), Utc::now());
        assert_eq!(decisions[0].action, Action::PauseWarmup);
        assert_eq!(decisions[0].action_params["hold_hours"], 48);
    }

    #[test]
    fn high_complaint_pauses_for_72h() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot(1.0, 0.08), Utc::now());
        assert_eq!(decisions[0].action, Action::PauseWarmup);
        assert_eq!(decisions[0].action_params["hold_hours"], 72);
    }

    #[test]
    fn clean_signal_advances() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot(1.0, 0.01), Utc::now());
        assert_eq!(decisions[0].action, Action::AdvanceWarmupDay);
        assert_eq!(
            agent.convictions.recall_by_verdict(Isp::Comcast, AgentKind::Warmup, Verdict::Will).len(),
            1
        );
    }

    #[test]
    fn idle_cluster_is_ignored() {
        let mut agent = agent();
        let mut s = snapshot(0.0, 0.0);
        s.sent_1h = 0;
        assert!(agent.evaluate(&s, Utc::now()).is_empty());
        assert!(agent.convictions.recall_all(Isp::Comcast, AgentKind::Warmup).is_empty());
    }

    #[test]
    fn ambiguous_signal_holds_position() {
        let mut agent = agent();
        // Not bad enough to pause, not clean enough to advance.
        let decisions = agent.evaluate(&snapshot(3.0, 0.04), Utc::now());
        assert!(decisions.is_empty());
    }
}
