//! Decision-to-command translation and reload debouncing

use crate::channel::{DryRunChannel, ShellChannel};
use crate::commands::MtaCommand;
use crate::Result;
use async_trait::async_trait;
use mailwarden_agents::{Action, Decision};
use mailwarden_core::{CancelToken, Isp};
use mailwarden_suppression::{RemoteMirror, SuppressionError};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Minimum gap between full reloads.
pub const RELOAD_MIN_GAP: Duration = Duration::from_secs(30);
/// How often a pending reload is drained.
const DRAIN_INTERVAL: Duration = Duration::from_secs(10);

struct ReloadState {
    last_reload: Option<Instant>,
    pending: bool,
}

/// Sends MTA control commands for decisions and owns the reload debounce.
pub struct Executor {
    channel: Arc<dyn ShellChannel>,
    remote_suppression_dir: String,
    reload_min_gap: Duration,
    reload: Mutex<ReloadState>,
}

impl Executor {
    pub fn new(channel: Arc<dyn ShellChannel>, remote_suppression_dir: impl Into<String>) -> Self {
        Self {
            channel,
            remote_suppression_dir: remote_suppression_dir.into(),
            reload_min_gap: RELOAD_MIN_GAP,
            reload: Mutex::new(ReloadState { last_reload: None, pending: false }),
        }
    }

    /// Dry-run executor plus a handle to its recorded command log.
    pub fn dry_run(remote_suppression_dir: impl Into<String>) -> (Self, Arc<DryRunChannel>) {
        let channel = Arc::new(DryRunChannel::new());
        (Self::new(channel.clone(), remote_suppression_dir), channel)
    }

    /// Tighter gap for tests.
    pub fn with_reload_min_gap(mut self, gap: Duration) -> Self {
        self.reload_min_gap = gap;
        self
    }

    /// Commands for one decision. Advisory actions translate to none; rate
    /// adjustments are realized through config generation, so they only
    /// request a debounced reload.
    fn commands_for(decision: &Decision) -> (Vec<MtaCommand>, bool) {
        let isp = decision.isp;
        match decision.action {
            Action::DisableSourceIp | Action::QuarantineIp => (
                vec![MtaCommand::DisableSource { ip: decision.target_value.clone(), isp }],
                false,
            ),
            Action::PauseIspQueues => (vec![MtaCommand::PauseQueue { isp }], false),
            Action::EmergencyHalt => (
                vec![MtaCommand::PauseQueue { isp }, MtaCommand::DisablePoolSources { isp }],
                false,
            ),
            Action::BackoffMode => (vec![MtaCommand::SetQueueBackoff { isp }], false),
            Action::ReduceRate
            | Action::IncreaseRate
            | Action::SnapToStableRate
            | Action::ReduceIpVolume => (Vec::new(), true),
            Action::WarnBounceRate
            | Action::WarnComplaintRate
            | Action::PauseWarmup
            | Action::AdvanceWarmupDay
            | Action::VelocityAlertReputation => (Vec::new(), false),
        }
    }

    /// Execute one decision. Command errors propagate; the caller marks the
    /// decision failed and continues.
    pub async fn execute(&self, decision: &Decision) -> Result<()> {
        let (commands, wants_reload) = Self::commands_for(decision);
        if commands.is_empty() && !wants_reload {
            debug!(action = %decision.action, "advisory action, no mta command");
            return Ok(());
        }
        for command in commands {
            self.channel.run(&command.render()).await?;
        }
        if wants_reload {
            self.trigger_reload().await?;
        }
        Ok(())
    }

    /// Re-enable a halted cluster: normal mode, resume queue, enable sources.
    pub async fn resume_isp(&self, isp: Isp) -> Result<()> {
        for command in [
            MtaCommand::SetQueueNormal { isp },
            MtaCommand::ResumeQueue { isp },
            MtaCommand::EnablePoolSources { isp },
        ] {
            self.channel.run(&command.render()).await?;
        }
        info!(isp = %isp, "cluster resumed");
        Ok(())
    }

    pub async fn resume_all(&self) -> Result<()> {
        for isp in Isp::ALL {
            self.resume_isp(isp).await?;
        }
        Ok(())
    }

    /// Request a full reload. Within the minimum gap the request is marked
    /// pending instead of dispatched; the drain ticker sends it later.
    pub async fn trigger_reload(&self) -> Result<()> {
        {
            let mut state = self.reload.lock();
            let in_gap = state
                .last_reload
                .is_some_and(|last| last.elapsed() < self.reload_min_gap);
            if in_gap {
                state.pending = true;
                debug!("reload inside minimum gap, marked pending");
                return Ok(());
            }
            state.last_reload = Some(Instant::now());
            state.pending = false;
        }
        self.channel.run(&MtaCommand::Reload.render()).await?;
        Ok(())
    }

    /// Dispatch a pending reload once the gap has elapsed.
    pub async fn drain_pending_reload(&self) -> Result<()> {
        {
            let mut state = self.reload.lock();
            let gap_elapsed = state
                .last_reload
                .map_or(true, |last| last.elapsed() >= self.reload_min_gap);
            if !state.pending || !gap_elapsed {
                return Ok(());
            }
            state.last_reload = Some(Instant::now());
            state.pending = false;
        }
        self.channel.run(&MtaCommand::Reload.render()).await?;
        Ok(())
    }

    pub fn has_pending_reload(&self) -> bool {
        self.reload.lock().pending
    }

    /// Push a suppression file to the MTA's suppression directory.
    pub async fn push_suppression_file(&self, local: &Path, file_name: &str) -> Result<()> {
        let remote = format!("{}/{}", self.remote_suppression_dir.trim_end_matches('/'), file_name);
        self.channel.upload(local, &remote).await
    }

    /// Background ticker draining pending reloads.
    pub fn spawn_reload_drain(self: Arc<Self>, cancel: CancelToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.drain_pending_reload().await {
                            warn!(error = %err, "pending reload failed");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl RemoteMirror for Executor {
    async fn mirror(
        &self,
        local: &Path,
        file_name: &str,
    ) -> std::result::Result<(), SuppressionError> {
        self.push_suppression_file(local, file_name)
            .await
            .map_err(|err| SuppressionError::Remote(err.to_string()))
    }
}
