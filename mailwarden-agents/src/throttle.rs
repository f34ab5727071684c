//! Throttle agent
//!
//! Geometric backoff (`0.95^step`) on deferral pressure, multiplicative
//! recovery (×1.10, capped at 1.0) once pressure clears, and a snap-back to
//! the last stable adjustment when a recovery attempt re-triggers deferrals.
//! Before each conviction the agent recalls up to three similar past
//! contexts and folds their synthesis into the statement as prior wisdom.

use crate::base::{AgentBase, snapshot_context};
use crate::decision::{Action, Decision, TargetType};
use chrono::{DateTime, Duration, Utc};
use mailwarden_conviction::{Conviction, ConvictionStore, MicroContext, Verdict, synthesize};
use mailwarden_core::{AgentKind, Isp, IspConfig};
use mailwarden_memory::MemoryStore;
use mailwarden_signals::SignalSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Deferral rate above which the agent backs off.
const DEFER_HIGH_PCT: f64 = 20.0;
/// Deferral rate above which the agent asks the MTA for backoff mode.
const DEFER_SEVERE_PCT: f64 = 40.0;
/// Deferral rate below which recovery may proceed.
const DEFER_LOW_PCT: f64 = 10.0;
/// Deferral rate at or below which a full-rate ISP is in steady state.
const DEFER_STEADY_PCT: f64 = 5.0;
/// Minimum 5-minute volume for a steady-state conviction.
const STEADY_MIN_SENT: u64 = 50;
/// Geometric backoff base.
const BACKOFF_BASE: f64 = 0.95;
/// Multiplicative recovery factor.
const RECOVERY_FACTOR: f64 = 1.10;
/// Cooldown after snapping back to the last stable rate.
const SNAP_COOLDOWN: Duration = Duration::minutes(30);
/// How many similar past contexts are recalled per evaluation.
const RECALL_LIMIT: usize = 3;

/// Rate-control state surviving restarts via the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ThrottleState {
    current_rate_adj: f64,
    last_stable_adj: f64,
    backoff_step: u32,
    in_recovery: bool,
    recovery_started: Option<DateTime<Utc>>,
}

pub struct ThrottleAgent {
    pub base: AgentBase,
    config: IspConfig,
    convictions: Arc<ConvictionStore>,
    memory: Option<MemoryStore>,

    current_rate_adj: f64,
    original_rate: f64,
    last_stable_adj: f64,
    backoff_step: u32,
    in_recovery: bool,
    recovery_started: Option<DateTime<Utc>>,
}

impl ThrottleAgent {
    pub fn new(
        isp: Isp,
        config: IspConfig,
        convictions: Arc<ConvictionStore>,
        memory: Option<MemoryStore>,
    ) -> Self {
        let original_rate = config.max_msgs_per_hour as f64;
        let mut agent = Self {
            base: AgentBase::new(isp, AgentKind::Throttle),
            config,
            convictions,
            memory,
            current_rate_adj: 1.0,
            original_rate,
            last_stable_adj: 1.0,
            backoff_step: 0,
            in_recovery: false,
            recovery_started: None,
        };
        agent.load_state();
        agent
    }

    fn state_key(&self) -> String {
        MemoryStore::agent_key(self.base.isp.name(), AgentKind::Throttle.name(), "state.json")
    }

    fn load_state(&mut self) {
        let Some(memory) = &self.memory else { return };
        match memory.read_blob::<ThrottleState>(&self.state_key()) {
            Ok(Some(state)) => {
                self.current_rate_adj = state.current_rate_adj.clamp(0.0, 1.0);
                self.last_stable_adj = state.last_stable_adj.clamp(0.0, 1.0);
                self.backoff_step = state.backoff_step;
                self.in_recovery = state.in_recovery;
                self.recovery_started = state.recovery_started;
            }
            Ok(None) => {}
            Err(err) => warn!(isp = %self.base.isp, error = %err, "throttle state load failed"),
        }
    }

    fn persist_state(&self) {
        let Some(memory) = &self.memory else { return };
        let state = ThrottleState {
            current_rate_adj: self.current_rate_adj,
            last_stable_adj: self.last_stable_adj,
            backoff_step: self.backoff_step,
            in_recovery: self.in_recovery,
            recovery_started: self.recovery_started,
        };
        if let Err(err) = memory.write_blob(&self.state_key(), &state) {
            warn!(isp = %self.base.isp, error = %err, "throttle state persist failed");
        }
    }

    pub fn current_rate_adj(&self) -> f64 {
        self.current_rate_adj
    }

    pub fn backoff_step(&self) -> u32 {
        self.backoff_step
    }

    /// Case-insensitive substring match against this ISP's configured
    /// deferral-code list.
    pub fn matches_deferral_code(&self, diagnostic: &str) -> bool {
        let diagnostic = diagnostic.to_ascii_lowercase();
        self.config
            .deferral_codes
            .iter()
            .any(|code| diagnostic.contains(&code.to_ascii_lowercase()))
    }

    fn build_context(&self, snapshot: &SignalSnapshot, now: DateTime<Utc>) -> MicroContext {
        let mut ctx = snapshot_context(snapshot, now);
        ctx.pool = Some(self.base.isp.pool_name());
        ctx.attempted_rate = Some(self.original_rate * self.current_rate_adj);
        ctx.attempted_volume = Some(snapshot.sent_1h);
        ctx.effective_rate = Some(self.original_rate * self.current_rate_adj);
        ctx.backoff_step = Some(self.backoff_step);
        ctx.prior_rate_adj = Some(self.current_rate_adj);
        // Keep only the diagnostics this cluster is known to throttle with.
        ctx.dsn_diagnostics = snapshot
            .recent_dsn_diags
            .iter()
            .filter(|diag| self.matches_deferral_code(diag))
            .cloned()
            .collect();
        ctx
    }

    /// Prior-wisdom suffix from similar past contexts, when any recall hits.
    fn prior_wisdom(&self, ctx: &MicroContext) -> Option<String> {
        let similar = self.convictions.recall_similar(self.base.isp, AgentKind::Throttle, ctx, RECALL_LIMIT);
        synthesize(&similar).map(|summary| format!(" | prior wisdom: {}", summary.render()))
    }

    fn statement(&self, body: String, wisdom: Option<String>) -> String {
        match wisdom {
            Some(suffix) => format!("{}{}", body, suffix),
            None => body,
        }
    }

    fn recovery_minutes(&self, now: DateTime<Utc>) -> f64 {
        self.recovery_started
            .map(|started| (now - started).num_seconds() as f64 / 60.0)
            .unwrap_or(0.0)
    }

    pub fn evaluate(&mut self, snapshot: &SignalSnapshot, now: DateTime<Utc>) -> Vec<Decision> {
        if !self.base.begin_evaluation(now) {
            return Vec::new();
        }

        let deferral = snapshot.deferral_rate_5m;
        let ctx = self.build_context(snapshot, now);
        let wisdom = self.prior_wisdom(&ctx);

        let signals = json!({
            "deferral_rate_5m": deferral,
            "bounce_rate_1h": snapshot.bounce_rate_1h,
            "sent_5m": snapshot.sent_5m,
            "rate_adj": self.current_rate_adj,
            "backoff_step": self.backoff_step,
        });

        let mut decisions = Vec::new();

        if deferral > DEFER_HIGH_PCT {
            if self.in_recovery {
                // The recovery attempt re-triggered pressure: snap back to
                // the last adjustment that held, and stop touching the rate
                // for a while.
                let elapsed = self.recovery_minutes(now);
                self.current_rate_adj = self.last_stable_adj;
                self.in_recovery = false;
                self.recovery_started = None;
                self.base.set_cooldown(now, SNAP_COOLDOWN);

                decisions.push(
                    Decision::new(
                        self.base.isp,
                        AgentKind::Throttle,
                        Action::SnapToStableRate,
                        TargetType::Pool,
                        self.base.isp.pool_name(),
                        now,
                    )
                    .with_params(json!({
                        "rate_adj": self.current_rate_adj,
                        "rate_per_hour": self.original_rate * self.current_rate_adj,
                    }))
                    .with_signals(signals),
                );

                let mut ctx = ctx;
                ctx.recovery_time_min = Some(elapsed);
                let body = format!(
                    "recovery failed after {:.0} min at deferral {:.1}%, snapping to stable adj {:.3}",
                    elapsed, deferral, self.current_rate_adj
                );
                self.record(Verdict::Wont, self.statement(body, wisdom), ctx, now);
            } else {
                self.backoff_step += 1;
                self.current_rate_adj = BACKOFF_BASE.powi(self.backoff_step as i32);

                let action =
                    if deferral > DEFER_SEVERE_PCT { Action::BackoffMode } else { Action::ReduceRate };
                decisions.push(
                    Decision::new(
                        self.base.isp,
                        AgentKind::Throttle,
                        action,
                        TargetType::Pool,
                        self.base.isp.pool_name(),
                        now,
                    )
                    .with_params(json!({
                        "rate_adj": self.current_rate_adj,
                        "backoff_step": self.backoff_step,
                        "rate_per_hour": self.original_rate * self.current_rate_adj,
                    }))
                    .with_signals(signals),
                );

                let body = format!(
                    "deferral {:.1}% forced backoff step {} (adj {:.3})",
                    deferral, self.backoff_step, self.current_rate_adj
                );
                self.record(Verdict::Wont, self.statement(body, wisdom), ctx, now);
            }
        } else if deferral < DEFER_LOW_PCT && self.current_rate_adj < 1.0 {
            if !self.in_recovery {
                self.last_stable_adj = self.current_rate_adj;
                self.in_recovery = true;
                self.recovery_started = Some(now);
            }

            self.current_rate_adj = (self.current_rate_adj * RECOVERY_FACTOR).min(1.0);
            let fully_recovered = self.current_rate_adj >= 1.0;
            let elapsed = self.recovery_minutes(now);
            if fully_recovered {
                self.backoff_step = 0;
                self.in_recovery = false;
                self.recovery_started = None;
            }

            decisions.push(
                Decision::new(
                    self.base.isp,
                    AgentKind::Throttle,
                    Action::IncreaseRate,
                    TargetType::Pool,
                    self.base.isp.pool_name(),
                    now,
                )
                .with_params(json!({
                    "rate_adj": self.current_rate_adj,
                    "rate_per_hour": self.original_rate * self.current_rate_adj,
                    "fully_recovered": fully_recovered,
                }))
                .with_signals(signals),
            );

            let mut ctx = ctx;
            ctx.recovery_time_min = Some(elapsed);
            let body = if fully_recovered {
                format!("fully recovered to adj 1.000 after {:.0} min", elapsed)
            } else {
                format!(
                    "deferral {:.1}% clear, raising adj to {:.3} ({:.0} min into recovery)",
                    deferral, self.current_rate_adj, elapsed
                )
            };
            self.record(Verdict::Will, self.statement(body, wisdom), ctx, now);
        } else if deferral <= DEFER_STEADY_PCT
            && self.current_rate_adj >= 1.0
            && snapshot.sent_5m >= STEADY_MIN_SENT
        {
            let body = format!(
                "steady state at full rate, deferral {:.1}% over {} sent",
                deferral, snapshot.sent_5m
            );
            self.record(Verdict::Will, self.statement(body, wisdom), ctx, now);
        }

        if !decisions.is_empty() {
            self.persist_state();
        }
        self.base.decisions_count += decisions.len() as u64;
        decisions
    }

    fn record(&self, verdict: Verdict, statement: String, ctx: MicroContext, now: DateTime<Utc>) {
        self.convictions
            .record(Conviction::new(self.base.isp, AgentKind::Throttle, verdict, statement, ctx, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::AgentStatus;

    fn agent() -> ThrottleAgent {
        ThrottleAgent::new(
            Isp::Gmail,
            IspConfig::default_for(Isp::Gmail),
            Arc::new(ConvictionStore::new(None)),
            None,
        )
    }

    fn snapshot(deferral: f64, sent_5m: u64) -> SignalSnapshot {
        let mut snapshot = SignalSnapshot::empty(Isp::Gmail, Utc::now());
        snapshot.deferral_rate_5m = deferral;
        snapshot.sent_5m = sent_5m;
        snapshot.sent_1h = sent_5m * 12;
        snapshot
    }

    #[test]
    fn high_deferral_backs_off_geometrically() {
        let mut agent = agent();
        let now = Utc::now();

        let decisions = agent.evaluate(&snapshot(25.0, 100), now);
        assert_eq!(decisions[0].action, Action::ReduceRate);
        assert!((agent.current_rate_adj() - 0.95).abs() < 1e-9);

        let decisions = agent.evaluate(&snapshot(25.0, 100), now + Duration::seconds(10));
        assert_eq!(decisions[0].action, Action::ReduceRate);
        assert!((agent.current_rate_adj() - 0.9025).abs() < 1e-9);
        assert_eq!(agent.backoff_step(), 2);
    }

    #[test]
    fn severe_deferral_requests_backoff_mode() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot(45.0, 100), Utc::now());
        assert_eq!(decisions[0].action, Action::BackoffMode);
    }

    #[test]
    fn recovery_sequence_converges_to_one() {
        let mut agent = agent();
        agent.current_rate_adj = 0.6;
        agent.backoff_step = 10;
        let mut now = Utc::now();

        let expected = [0.66, 0.726, 0.7986, 0.87846, 0.966306];
        for adj in expected {
            now += Duration::seconds(10);
            let decisions = agent.evaluate(&snapshot(8.0, 100), now);
            assert_eq!(decisions[0].action, Action::IncreaseRate);
            assert!((agent.current_rate_adj() - adj).abs() < 1e-6, "got {}", agent.current_rate_adj());
        }

        // Sixth tick caps at 1.0 and clears the backoff.
        now += Duration::seconds(10);
        let decisions = agent.evaluate(&snapshot(8.0, 100), now);
        assert_eq!(decisions[0].action_params["fully_recovered"], true);
        assert_eq!(agent.current_rate_adj(), 1.0);
        assert_eq!(agent.backoff_step(), 0);
        assert!(!agent.in_recovery);

        let wills = agent.convictions.recall_by_verdict(Isp::Gmail, AgentKind::Throttle, Verdict::Will);
        let last = wills.last().unwrap();
        assert!(last.statement.contains("fully recovered"));
        assert!(last.context.recovery_time_min.unwrap() > 0.0);
    }

    #[test]
    fn failed_recovery_snaps_to_stable_and_cools_down() {
        let mut agent = agent();
        agent.current_rate_adj = 0.6;
        agent.backoff_step = 10;
        let now = Utc::now();

        // One recovery step: last stable becomes 0.6, adj rises to 0.66.
        agent.evaluate(&snapshot(8.0, 100), now);
        assert!(agent.in_recovery);

        // Pressure returns: snap back to 0.6 and enter cooldown.
        let decisions = agent.evaluate(&snapshot(30.0, 100), now + Duration::minutes(5));
        assert_eq!(decisions[0].action, Action::SnapToStableRate);
        assert!((agent.current_rate_adj() - 0.6).abs() < 1e-9);
        assert_eq!(agent.base.status, AgentStatus::Cooldown);

        let wonts = agent.convictions.recall_by_verdict(Isp::Gmail, AgentKind::Throttle, Verdict::Wont);
        assert!((wonts.last().unwrap().context.recovery_time_min.unwrap() - 5.0).abs() < 0.1);

        // While cooling down the agent stays silent.
        let decisions = agent.evaluate(&snapshot(30.0, 100), now + Duration::minutes(6));
        assert!(decisions.is_empty());
    }

    #[test]
    fn steady_state_records_will_without_decision() {
        let mut agent = agent();
        let decisions = agent.evaluate(&snapshot(2.0, 100), Utc::now());
        assert!(decisions.is_empty());

        let wills = agent.convictions.recall_by_verdict(Isp::Gmail, AgentKind::Throttle, Verdict::Will);
        assert_eq!(wills.len(), 1);
        assert!(wills[0].statement.contains("steady state"));
    }

    #[test]
    fn low_volume_steady_state_is_not_recorded() {
        let mut agent = agent();
        agent.evaluate(&snapshot(2.0, 10), Utc::now());
        assert!(agent.convictions.recall_all(Isp::Gmail, AgentKind::Throttle).is_empty());
    }

    #[test]
    fn deferral_code_matching_is_case_insensitive() {
        let agent = agent();
        assert!(agent.matches_deferral_code("421-4.7.28 Our system has detected an UNUSUAL RATE of mail"));
        assert!(!agent.matches_deferral_code("550 5.1.1 user unknown"));
    }

    #[test]
    fn state_survives_restart_through_memory() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(dir.path()).unwrap();
        {
            let mut agent = ThrottleAgent::new(
                Isp::Gmail,
                IspConfig::default_for(Isp::Gmail),
                Arc::new(ConvictionStore::new(None)),
                Some(memory.clone()),
            );
            agent.evaluate(&snapshot(25.0, 100), Utc::now());
            assert!((agent.current_rate_adj() - 0.95).abs() < 1e-9);
        }

        let agent = ThrottleAgent::new(
            Isp::Gmail,
            IspConfig::default_for(Isp::Gmail),
            Arc::new(ConvictionStore::new(None)),
            Some(memory),
        );
        assert!((agent.current_rate_adj() - 0.95).abs() < 1e-9);
        assert_eq!(agent.backoff_step(), 1);
    }

    #[test]
    fn prior_wisdom_is_folded_into_statements() {
        let convictions = Arc::new(ConvictionStore::new(None));
        let mut agent = ThrottleAgent::new(
            Isp::Gmail,
            IspConfig::default_for(Isp::Gmail),
            convictions.clone(),
            None,
        );

        // Seed history, then trigger a comparable backoff.
        agent.evaluate(&snapshot(25.0, 100), Utc::now());
        agent.base.resume();
        agent.evaluate(&snapshot(25.0, 100), Utc::now() + Duration::seconds(10));

        let all = convictions.recall_all(Isp::Gmail, AgentKind::Throttle);
        assert!(all.last().unwrap().statement.contains("prior wisdom"));
    }
}
