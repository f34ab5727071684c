//! Snapshot types and the rate/score arithmetic

use chrono::{DateTime, Utc};
use mailwarden_core::Isp;
use serde::{Deserialize, Serialize};

/// `count ÷ sent × 100`, zero when nothing was sent in the window.
pub fn rate(count: u64, sent: u64) -> f64 {
    if sent == 0 { 0.0 } else { count as f64 / sent as f64 * 100.0 }
}

/// Composite IP health score:
/// `clamp(100 − 10·bounce − 100·complaint − 2·deferral, 0, 100)`.
pub fn ip_score(bounce_rate: f64, complaint_rate: f64, deferral_rate: f64) -> f64 {
    (100.0 - 10.0 * bounce_rate - 100.0 * complaint_rate - 2.0 * deferral_rate).clamp(0.0, 100.0)
}

/// Derived per-IP metrics. Only IPs with at least one sent event in the last
/// hour appear in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpMetric {
    pub ip: String,
    pub bounce_rate_1h: f64,
    pub complaint_rate_24h: f64,
    pub deferral_rate_5m: f64,
    pub sent_1h: u64,
    pub accepted_1h: u64,
    pub score: f64,
}

/// Immutable per-ISP metrics emitted on each tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub isp: Isp,
    pub timestamp: DateTime<Utc>,

    pub bounce_rate_1m: f64,
    pub bounce_rate_5m: f64,
    pub bounce_rate_1h: f64,
    pub complaint_rate_1h: f64,
    pub complaint_rate_24h: f64,
    pub deferral_rate_5m: f64,
    pub deferral_rate_1h: f64,

    pub sent_1m: u64,
    pub sent_5m: u64,
    pub sent_1h: u64,
    pub sent_24h: u64,
    pub bounced_1h: u64,
    pub deferred_5m: u64,
    pub complaints_1h: u64,
    /// `sent_1h − bounced_1h`
    pub accepted_1h: u64,

    pub ip_metrics: Vec<IpMetric>,
    /// DSN codes seen in the last five minutes, deduplicated, capped at 10.
    pub recent_dsn_codes: Vec<String>,
    /// Recent DSN diagnostic strings, capped at 10.
    pub recent_dsn_diags: Vec<String>,
}

impl SignalSnapshot {
    pub fn empty(isp: Isp, timestamp: DateTime<Utc>) -> Self {
        Self {
            isp,
            timestamp,
            bounce_rate_1m: 0.0,
            bounce_rate_5m: 0.0,
            bounce_rate_1h: 0.0,
            complaint_rate_1h: 0.0,
            complaint_rate_24h: 0.0,
            deferral_rate_5m: 0.0,
            deferral_rate_1h: 0.0,
            sent_1m: 0,
            sent_5m: 0,
            sent_1h: 0,
            sent_24h: 0,
            bounced_1h: 0,
            deferred_5m: 0,
            complaints_1h: 0,
            accepted_1h: 0,
            ip_metrics: Vec::new(),
            recent_dsn_codes: Vec::new(),
            recent_dsn_diags: Vec::new(),
        }
    }

    /// Metric for one IP, when present.
    pub fn ip_metric(&self, ip: &str) -> Option<&IpMetric> {
        self.ip_metrics.iter().find(|m| m.ip == ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_handles_zero_sent() {
        assert_eq!(rate(10, 0), 0.0);
        assert_eq!(rate(40, 1000), 4.0);
    }

    #[test]
    fn score_is_clamped() {
        assert_eq!(ip_score(4.0, 0.0, 0.0), 60.0);
        assert_eq!(ip_score(0.0, 0.0, 0.0), 100.0);
        assert_eq!(ip_score(50.0, 5.0, 50.0), 0.0);
    }

    #[test]
    fn score_weighting_matches_contract() {
        // 100 − 10·2 − 100·0.1 − 2·5 = 60
        assert_eq!(ip_score(2.0, 0.1, 5.0), 60.0);
    }
}
