//! Shared agent base: identity, status, cooldown

use chrono::{DateTime, Duration, Utc};
use mailwarden_conviction::MicroContext;
use mailwarden_core::{AgentKind, Isp};
use mailwarden_signals::SignalSnapshot;
use serde::{Deserialize, Serialize};

/// Agent lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Paused,
    Firing,
    Error,
    Cooldown,
}

impl AgentStatus {
    pub fn name(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
            AgentStatus::Firing => "firing",
            AgentStatus::Error => "error",
            AgentStatus::Cooldown => "cooldown",
        }
    }
}

/// Base record shared by every agent.
#[derive(Debug, Clone)]
pub struct AgentBase {
    pub isp: Isp,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_eval_at: Option<DateTime<Utc>>,
    pub decisions_count: u64,
}

impl AgentBase {
    pub fn new(isp: Isp, kind: AgentKind) -> Self {
        Self {
            isp,
            kind,
            status: AgentStatus::Active,
            cooldown_until: None,
            last_eval_at: None,
            decisions_count: 0,
        }
    }

    /// Enter cooldown until `now + duration`.
    pub fn set_cooldown(&mut self, now: DateTime<Utc>, duration: Duration) {
        self.cooldown_until = Some(now + duration);
        self.status = AgentStatus::Cooldown;
    }

    /// Whether this evaluation may proceed. Clears an expired cooldown as a
    /// side effect; a cooldown ending exactly at `now` still skips this tick.
    pub fn begin_evaluation(&mut self, now: DateTime<Utc>) -> bool {
        self.last_eval_at = Some(now);
        match self.status {
            AgentStatus::Paused | AgentStatus::Firing | AgentStatus::Error => false,
            AgentStatus::Cooldown => {
                if self.cooldown_until.is_some_and(|until| now > until) {
                    self.cooldown_until = None;
                    self.status = AgentStatus::Active;
                    true
                } else {
                    false
                }
            }
            AgentStatus::Active => true,
        }
    }

    pub fn pause(&mut self) {
        self.status = AgentStatus::Paused;
    }

    /// Manual resume: clears cooldown, firing and error states.
    pub fn resume(&mut self) {
        self.status = AgentStatus::Active;
        self.cooldown_until = None;
    }
}

/// Micro-context with the temporal and signal fields populated from a
/// snapshot. Agents extend it with their own infra/volume fields.
pub fn snapshot_context(snapshot: &SignalSnapshot, now: DateTime<Utc>) -> MicroContext {
    let mut ctx = MicroContext::temporal(now);
    ctx.domain = Some(snapshot.isp.canonical_domain().to_string());
    ctx.bounce_rate_1h = Some(snapshot.bounce_rate_1h);
    ctx.complaint_rate_1h = Some(snapshot.complaint_rate_1h);
    ctx.deferral_rate_5m = Some(snapshot.deferral_rate_5m);
    ctx.sent_5m = Some(snapshot.sent_5m);
    ctx.sent_1h = Some(snapshot.sent_1h);
    ctx.dsn_codes = snapshot.recent_dsn_codes.clone();
    ctx.dsn_diagnostics = snapshot.recent_dsn_diags.clone();
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_skips_until_strictly_past() {
        let now = Utc::now();
        let mut base = AgentBase::new(Isp::Gmail, AgentKind::Throttle);
        base.set_cooldown(now, Duration::minutes(30));

        assert!(!base.begin_evaluation(now));
        // Exactly at the boundary the evaluator still skips.
        assert!(!base.begin_evaluation(now + Duration::minutes(30)));
        // One tick later the cooldown clears.
        assert!(base.begin_evaluation(now + Duration::minutes(30) + Duration::seconds(10)));
        assert_eq!(base.status, AgentStatus::Active);
    }

    #[test]
    fn paused_never_evaluates() {
        let now = Utc::now();
        let mut base = AgentBase::new(Isp::Gmail, AgentKind::Pool);
        base.pause();
        assert!(!base.begin_evaluation(now));
        base.resume();
        assert!(base.begin_evaluation(now));
    }

    #[test]
    fn firing_blocks_until_resume() {
        let now = Utc::now();
        let mut base = AgentBase::new(Isp::Gmail, AgentKind::Emergency);
        base.status = AgentStatus::Firing;
        assert!(!base.begin_evaluation(now));
        base.resume();
        assert!(base.begin_evaluation(now));
    }
}
