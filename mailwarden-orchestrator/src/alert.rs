//! Alert fan-out
//!
//! Message formatting and SMTP delivery are a collaborator's concern; the
//! engine only decides *when* an alert goes out. Significant actions
//! (emergency halts, source disables, quarantines, queue pauses, velocity
//! alerts) fan out here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailwarden_agents::Action;
use mailwarden_core::Isp;
use parking_lot::Mutex;
use tracing::warn;

/// One outbound alert.
#[derive(Debug, Clone)]
pub struct Alert {
    pub isp: Isp,
    pub action: Action,
    pub target: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Delivery sink for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: Alert);
}

/// Default sink: structured warning logs.
#[derive(Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: Alert) {
        warn!(
            isp = %alert.isp,
            action = %alert.action,
            target = %alert.target,
            detail = %alert.detail,
            "governance alert"
        );
    }
}

/// Test sink collecting alerts in memory.
#[derive(Default)]
pub struct CollectingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl CollectingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl AlertSink for CollectingAlertSink {
    async fn send(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}
