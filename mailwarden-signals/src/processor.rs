//! Signal processor: ingestion, tick/prune loops, listener fan-out

use crate::snapshot::SignalSnapshot;
use crate::window::IspWindow;
use mailwarden_core::{AccountingRecord, CancelToken, Clock, Isp, SystemClock};
use mailwarden_memory::MemoryStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Snapshot emission interval.
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);
/// Window pruning interval.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Per-ISP windowed aggregation with snapshot fan-out.
///
/// One mutex per ISP window: ingestion for different clusters never
/// contends, and snapshot computation copies values out under the same lock.
pub struct SignalProcessor {
    windows: HashMap<Isp, Mutex<IspWindow>>,
    listeners: RwLock<Vec<mpsc::Sender<SignalSnapshot>>>,
    memory: Option<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl SignalProcessor {
    pub fn new(memory: Option<MemoryStore>) -> Self {
        Self::with_clock(memory, Arc::new(SystemClock))
    }

    pub fn with_clock(memory: Option<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        let windows = Isp::ALL
            .iter()
            .map(|isp| (*isp, Mutex::new(IspWindow::default())))
            .collect();
        Self { windows, listeners: RwLock::new(Vec::new()), memory, clock }
    }

    /// O(1) append of one record to its ISP window.
    pub fn ingest(&self, isp: Isp, record: &AccountingRecord) {
        if let Some(window) = self.windows.get(&isp) {
            window.lock().ingest(record);
        }
    }

    /// Register a snapshot listener. Sends are non-blocking; full channels
    /// drop the snapshot.
    pub fn subscribe(&self, listener: mpsc::Sender<SignalSnapshot>) {
        self.listeners.write().push(listener);
    }

    /// Compute and fan out one snapshot per ISP, then persist each as a
    /// `signals.jsonl` line. Persistence failures are logged and swallowed.
    pub fn tick(&self) {
        let now = self.clock.now();
        for (isp, window) in &self.windows {
            let snapshot = window.lock().snapshot(*isp, now);

            {
                let listeners = self.listeners.read();
                for listener in listeners.iter() {
                    if listener.try_send(snapshot.clone()).is_err() {
                        debug!(isp = %isp, "snapshot listener full, dropping");
                    }
                }
            }

            if let Some(memory) = &self.memory {
                let key = MemoryStore::agent_key(isp.name(), "signals", "signals.jsonl");
                if let Err(err) = memory.append_line(&key, &snapshot) {
                    warn!(isp = %isp, error = %err, "signal persistence failed");
                }
            }
        }
    }

    /// Drop events past retention from every window.
    pub fn prune(&self) {
        let now = self.clock.now();
        for window in self.windows.values() {
            window.lock().prune(now);
        }
        debug!("signal windows pruned");
    }

    /// On-demand partial snapshot (rates and counts only).
    pub fn snapshot_now(&self, isp: Isp) -> SignalSnapshot {
        let now = self.clock.now();
        match self.windows.get(&isp) {
            Some(window) => window.lock().rates_snapshot(isp, now),
            None => SignalSnapshot::empty(isp, now),
        }
    }

    /// Run the tick and prune timers until cancellation.
    pub fn spawn(self: Arc<Self>, cancel: CancelToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK_INTERVAL);
            let mut prune = tokio::time::interval(PRUNE_INTERVAL);
            // The first interval tick fires immediately; skip it so startup
            // does not emit an empty snapshot burst.
            tick.tick().await;
            prune.tick().await;
            info!("signal processor started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => self.tick(),
                    _ = prune.tick() => self.prune(),
                }
            }
            info!("signal processor stopped");
        })
    }
}

impl Default for SignalProcessor {
    fn default() -> Self {
        Self::new(None)
    }
}
