//! Engine and per-ISP configuration
//!
//! Loading hierarchy: environment > file > defaults. Per-ISP governance
//! thresholds are seeded with conservative defaults on first boot and
//! normally live in the durable store.

use crate::error::{CoreError, Result};
use crate::isp::Isp;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Staged daily-volume ramp for a warming IP. Monotonically increasing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarmupSchedule {
    pub daily_volumes: Vec<u64>,
}

impl Default for WarmupSchedule {
    fn default() -> Self {
        // 30-day ramp from a cold start to full volume.
        Self {
            daily_volumes: vec![
                50, 100, 200, 400, 800, 1_500, 2_500, 4_000, 6_000, 9_000, 13_000, 18_000,
                25_000, 34_000, 45_000, 58_000, 74_000, 93_000, 115_000, 140_000, 170_000,
                205_000, 245_000, 290_000, 340_000, 400_000, 465_000, 535_000, 615_000, 700_000,
            ],
        }
    }
}

impl WarmupSchedule {
    /// Daily cap for `day` (1-based); days past the ramp get the final cap.
    pub fn volume_for_day(&self, day: usize) -> u64 {
        if self.daily_volumes.is_empty() {
            return 0;
        }
        let index = day.saturating_sub(1).min(self.daily_volumes.len() - 1);
        self.daily_volumes[index]
    }

    pub fn len_days(&self) -> usize {
        self.daily_volumes.len()
    }

    fn is_monotonic(&self) -> bool {
        self.daily_volumes.windows(2).all(|pair| pair[0] <= pair[1])
    }
}

/// Per-ISP governance thresholds and caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IspConfig {
    pub isp: Isp,
    /// Bounce-rate warning threshold, percent.
    pub bounce_warn_pct: f64,
    /// Bounce-rate action threshold, percent.
    pub bounce_action_pct: f64,
    /// Complaint-rate warning threshold, percent.
    pub complaint_warn_pct: f64,
    /// Complaint-rate action threshold, percent.
    pub complaint_action_pct: f64,
    /// Concurrent-connection cap at the MTA.
    pub max_connections: u32,
    /// Hourly message cap at full rate.
    pub max_msgs_per_hour: u64,
    /// Case-insensitive substrings identifying this ISP's deferral responses.
    pub deferral_codes: Vec<String>,
    pub pool_name: String,
    pub warmup: WarmupSchedule,
}

impl IspConfig {
    /// Conservative first-boot defaults, tuned per cluster.
    pub fn default_for(isp: Isp) -> Self {
        let (bounce_warn, bounce_action, complaint_warn, complaint_action) = match isp {
            Isp::Gmail => (1.5, 3.0, 0.05, 0.1),
            Isp::Yahoo => (2.0, 4.0, 0.08, 0.15),
            Isp::Microsoft => (2.0, 4.0, 0.08, 0.15),
            Isp::Apple => (1.5, 3.0, 0.05, 0.1),
            Isp::Att => (2.5, 5.0, 0.1, 0.2),
            Isp::Comcast => (2.5, 5.0, 0.1, 0.2),
            Isp::Verizon => (2.5, 5.0, 0.1, 0.2),
            Isp::Charter => (2.5, 5.0, 0.1, 0.2),
        };
        let deferral_codes = match isp {
            Isp::Gmail => vec!["4.7.28", "unusual rate", "rate limited", "421-4.7.0"],
            Isp::Yahoo => vec!["TSS04", "TSS09", "4.7.1", "deferred due to user complaints"],
            Isp::Microsoft => vec!["4.3.2", "S3150", "namespace blocked", "too many connections"],
            Isp::Apple => vec!["4.7.1", "polite", "try again later"],
            Isp::Att => vec!["421 RLY", "DYN", "connections from your host"],
            Isp::Comcast => vec!["RL000001", "421", "too many sessions"],
            Isp::Verizon => vec!["4.7.1", "try later", "ratelimit"],
            Isp::Charter => vec!["AUP#", "421", "rate limited"],
        }
        .into_iter()
        .map(str::to_string)
        .collect();
        let (max_connections, max_msgs_per_hour) = match isp {
            Isp::Gmail | Isp::Microsoft => (20, 500_000),
            Isp::Yahoo | Isp::Apple => (10, 250_000),
            _ => (5, 100_000),
        };

        Self {
            isp,
            bounce_warn_pct: bounce_warn,
            bounce_action_pct: bounce_action,
            complaint_warn_pct: complaint_warn,
            complaint_action_pct: complaint_action,
            max_connections,
            max_msgs_per_hour,
            deferral_codes,
            pool_name: isp.pool_name(),
            warmup: WarmupSchedule::default(),
        }
    }

    /// Default configuration set for all clusters.
    pub fn default_set() -> Vec<IspConfig> {
        Isp::ALL.iter().map(|isp| IspConfig::default_for(*isp)).collect()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("bounce_warn_pct", self.bounce_warn_pct),
            ("bounce_action_pct", self.bounce_action_pct),
            ("complaint_warn_pct", self.complaint_warn_pct),
            ("complaint_action_pct", self.complaint_action_pct),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(CoreError::Config(format!(
                    "{}: {} outside [0, 100] for {}",
                    name, value, self.isp
                )));
            }
        }
        if self.bounce_warn_pct > self.bounce_action_pct {
            return Err(CoreError::Config(format!(
                "bounce warn above action threshold for {}",
                self.isp
            )));
        }
        if self.complaint_warn_pct > self.complaint_action_pct {
            return Err(CoreError::Config(format!(
                "complaint warn above action threshold for {}",
                self.isp
            )));
        }
        if !self.warmup.is_monotonic() {
            return Err(CoreError::Config(format!(
                "warmup schedule not monotonically increasing for {}",
                self.isp
            )));
        }
        Ok(())
    }
}

/// Engine-wide startup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tenant_id: String,
    pub list_id: i64,

    /// Import source bucket (blob-store collaborator).
    pub bucket: String,
    pub region: String,
    pub credentials_profile: String,
    /// Import poll interval, minutes.
    pub poll_interval: u64,

    /// MTA control host; empty selects dry-run mode.
    pub mta_host: String,
    pub mta_port: u16,
    pub mta_user: String,
    pub mta_ssh_key_path: String,

    /// Local directory for MTA-facing suppression files.
    pub suppression_dir: String,
    /// Remote directory the files are mirrored to.
    pub remote_suppression_dir: String,

    /// Root of the durable blob memory store.
    pub data_dir: String,

    pub alert_sender_host: String,
    pub alert_sender_port: u16,
    pub alert_from: String,
    pub alert_recipients: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tenant_id: "default".to_string(),
            list_id: 1,
            bucket: String::new(),
            region: "us-east-1".to_string(),
            credentials_profile: "default".to_string(),
            poll_interval: 5,
            mta_host: String::new(),
            mta_port: 22,
            mta_user: "pmta".to_string(),
            mta_ssh_key_path: String::new(),
            suppression_dir: "./suppressions".to_string(),
            remote_suppression_dir: "/etc/pmta/suppressions".to_string(),
            data_dir: "./data".to_string(),
            alert_sender_host: String::new(),
            alert_sender_port: 587,
            alert_from: "mailwarden@localhost".to_string(),
            alert_recipients: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration: file (when present), then environment overrides,
    /// then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Apply `MAILWARDEN_`-prefixed environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("MAILWARDEN_TENANT_ID") {
            self.tenant_id = v;
        }
        if let Ok(v) = env::var("MAILWARDEN_LIST_ID") {
            if let Ok(parsed) = v.parse() {
                self.list_id = parsed;
            }
        }
        if let Ok(v) = env::var("MAILWARDEN_BUCKET") {
            self.bucket = v;
        }
        if let Ok(v) = env::var("MAILWARDEN_REGION") {
            self.region = v;
        }
        if let Ok(v) = env::var("MAILWARDEN_POLL_INTERVAL") {
            if let Ok(parsed) = v.parse() {
                self.poll_interval = parsed;
            }
        }
        if let Ok(v) = env::var("MAILWARDEN_MTA_HOST") {
            self.mta_host = v;
        }
        if let Ok(v) = env::var("MAILWARDEN_MTA_PORT") {
            if let Ok(parsed) = v.parse() {
                self.mta_port = parsed;
            }
        }
        if let Ok(v) = env::var("MAILWARDEN_MTA_USER") {
            self.mta_user = v;
        }
        if let Ok(v) = env::var("MAILWARDEN_MTA_SSH_KEY_PATH") {
            self.mta_ssh_key_path = v;
        }
        if let Ok(v) = env::var("MAILWARDEN_SUPPRESSION_DIR") {
            self.suppression_dir = v;
        }
        if let Ok(v) = env::var("MAILWARDEN_REMOTE_SUPPRESSION_DIR") {
            self.remote_suppression_dir = v;
        }
        if let Ok(v) = env::var("MAILWARDEN_DATA_DIR") {
            self.data_dir = v;
        }
        if let Ok(v) = env::var("MAILWARDEN_ALERT_RECIPIENTS") {
            self.alert_recipients = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(CoreError::Config("tenant_id must not be empty".into()));
        }
        if self.poll_interval == 0 {
            return Err(CoreError::Config("poll_interval must be at least 1 minute".into()));
        }
        if !self.mta_host.is_empty() && self.mta_user.trim().is_empty() {
            return Err(CoreError::Config("mta_user required when mta_host is set".into()));
        }
        Ok(())
    }

    /// Whether the executor should run in dry-run mode.
    pub fn dry_run(&self) -> bool {
        self.mta_host.is_empty()
    }
}
