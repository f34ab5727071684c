//! Conviction and micro-context models

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use mailwarden_core::{AgentKind, Isp, holiday_on};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Binary verdict of a micro-observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The observed configuration worked (healthy state, successful ramp).
    Will,
    /// The observed configuration failed (deferrals, actions forced).
    Wont,
}

/// Structured context captured with each conviction. Any subset of fields may
/// be populated; the context is never mutated after recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MicroContext {
    // Temporal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour_utc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_holiday: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holiday_name: Option<String>,

    // Infrastructure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vmta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_pool: Option<String>,

    // Volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_volume: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_rate_adj: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_time_min: Option<f64>,

    // Signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounce_rate_1h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complaint_rate_1h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferral_rate_5m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_5m: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_1h: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dsn_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dsn_diagnostics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_score: Option<f64>,

    // Suppression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MicroContext {
    /// Context with the temporal fields filled in for `now`, including the
    /// holiday calendar lookup.
    pub fn temporal(now: DateTime<Utc>) -> Self {
        let date = now.date_naive();
        let holiday = holiday_on(date);
        Self {
            date: Some(date),
            day_of_week: Some(format!("{}", date.format("%A"))),
            hour_utc: Some(now.hour()),
            is_holiday: Some(holiday.is_some()),
            holiday_name: holiday.map(str::to_string),
            ..Self::default()
        }
    }
}

/// One micro-observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conviction {
    pub id: Uuid,
    pub isp: Isp,
    pub agent: AgentKind,
    pub verdict: Verdict,
    /// Free-text statement of what was observed.
    pub statement: String,
    pub context: MicroContext,
    pub confidence: f64,
    pub corroborations: u32,
    pub created_at: DateTime<Utc>,
}

impl Conviction {
    pub fn new(
        isp: Isp,
        agent: AgentKind,
        verdict: Verdict,
        statement: impl Into<String>,
        context: MicroContext,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            isp,
            agent,
            verdict,
            statement: statement.into(),
            context,
            confidence: 0.5,
            corroborations: 0,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn temporal_context_captures_holiday() {
        // 2026-11-27 is Black Friday.
        let now = Utc.with_ymd_and_hms(2026, 11, 27, 14, 30, 0).unwrap();
        let ctx = MicroContext::temporal(now);
        assert_eq!(ctx.day_of_week.as_deref(), Some("Friday"));
        assert_eq!(ctx.hour_utc, Some(14));
        assert_eq!(ctx.is_holiday, Some(true));
        assert_eq!(ctx.holiday_name.as_deref(), Some("Black Friday"));
    }

    #[test]
    fn context_serializes_sparsely() {
        let ctx = MicroContext { ip: Some("1.2.3.4".into()), ..Default::default() };
        let json = serde_json::to_string(&ctx).unwrap();
        assert_eq!(json, r#"{"ip":"1.2.3.4"}"#);
    }
}
