//! Campaign readiness aggregation

use chrono::{DateTime, Utc};
use mailwarden_core::Isp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-ISP and overall readiness verdict. Ordering is worst-last so
/// `max` picks the most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyStatus {
    Ready,
    Caution,
    Blocked,
}

/// Per-cluster IP inventory counts. IP provisioning lives with a
/// collaborator; readiness only consumes the counts, the same inversion the
/// ISP registry uses for MX resolution.
pub trait IpInventory: Send + Sync {
    /// IPs currently on the warmup ramp for `isp`.
    fn warmup_ip_count(&self, isp: Isp) -> usize;

    /// IPs at full production volume for `isp`.
    fn active_ip_count(&self, isp: Isp) -> usize;
}

/// Fixed inventory counts, for deployments with static provisioning and for
/// tests.
#[derive(Default)]
pub struct StaticIpInventory {
    counts: RwLock<HashMap<Isp, (usize, usize)>>,
}

impl StaticIpInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, isp: Isp, warmup: usize, active: usize) {
        self.counts.write().insert(isp, (warmup, active));
    }
}

impl IpInventory for StaticIpInventory {
    fn warmup_ip_count(&self, isp: Isp) -> usize {
        self.counts.read().get(&isp).map_or(0, |(warmup, _)| *warmup)
    }

    fn active_ip_count(&self, isp: Isp) -> usize {
        self.counts.read().get(&isp).map_or(0, |(_, active)| *active)
    }
}

/// One cluster's readiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IspReadiness {
    pub isp: Isp,
    /// `clamp(100 − 10·bounce_1h − 100·complaint_1h − 2·deferral_5m, 0, 100)`
    pub health: f64,
    pub status: ReadyStatus,
    pub bounce_rate_1h: f64,
    pub complaint_rate_1h: f64,
    pub deferral_rate_5m: f64,
    pub firing: bool,
    pub warmup_ip_count: usize,
    pub active_ip_count: usize,
}

/// Whole-tenant readiness; overall is the worst cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReadiness {
    pub overall: ReadyStatus,
    pub isps: Vec<IspReadiness>,
    pub generated_at: DateTime<Utc>,
}

/// Health score from the three readiness signals.
pub fn health_score(bounce_1h: f64, complaint_1h: f64, deferral_5m: f64) -> f64 {
    (100.0 - 10.0 * bounce_1h - 100.0 * complaint_1h - 2.0 * deferral_5m).clamp(0.0, 100.0)
}

/// Health below this reads as caution.
pub const CAUTION_HEALTH: f64 = 60.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_status_wins() {
        assert_eq!(ReadyStatus::Ready.max(ReadyStatus::Caution), ReadyStatus::Caution);
        assert_eq!(ReadyStatus::Caution.max(ReadyStatus::Blocked), ReadyStatus::Blocked);
    }

    #[test]
    fn health_is_clamped() {
        assert_eq!(health_score(0.0, 0.0, 0.0), 100.0);
        assert_eq!(health_score(20.0, 5.0, 50.0), 0.0);
        assert_eq!(health_score(2.0, 0.1, 5.0), 60.0);
    }

    #[test]
    fn static_inventory_defaults_to_zero() {
        let inventory = StaticIpInventory::new();
        assert_eq!(inventory.warmup_ip_count(Isp::Gmail), 0);
        assert_eq!(inventory.active_ip_count(Isp::Gmail), 0);

        inventory.set(Isp::Gmail, 3, 1);
        assert_eq!(inventory.warmup_ip_count(Isp::Gmail), 3);
        assert_eq!(inventory.active_ip_count(Isp::Gmail), 1);
        // Other clusters are untouched.
        assert_eq!(inventory.warmup_ip_count(Isp::Yahoo), 0);
    }
}
