//! Engine wiring and the three consumer loops

use crate::alert::{Alert, AlertSink};
use crate::readiness::{
    CAUTION_HEALTH, CampaignReadiness, IpInventory, IspReadiness, ReadyStatus, health_score,
};
use crate::{OrchestratorError, Result};
use chrono::Utc;
use mailwarden_agents::{
    Action, Agent, AgentFactory, AgentStatus, Decision, DecisionResult, IspAgents,
    SuppressionAgent,
};
use mailwarden_conviction::ConvictionStore;
use mailwarden_core::{
    AccountingRecord, AgentKind, CancelToken, Clock, Isp, IspRegistry, decode_batch,
};
use mailwarden_executor::Executor;
use mailwarden_memory::MemoryStore;
use mailwarden_signals::SignalProcessor;
use mailwarden_store::{AgentStateRow, AgentStateStore, DecisionRow, DecisionStore};
use mailwarden_suppression::{GlobalSuppressionHub, IspSuppressionSet};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-ISP record channel capacity.
const RECORD_CHANNEL_CAP: usize = 5000;
/// Snapshot channel capacity.
const SNAPSHOT_CHANNEL_CAP: usize = 100;
/// Control channel capacity.
const CONTROL_CHANNEL_CAP: usize = 64;
/// Bounded ring of recent decisions kept for readiness checks.
pub const RECENT_DECISIONS_CAP: usize = 200;

/// Last observed status of one agent, published by the owning loop.
#[derive(Debug, Clone)]
pub struct AgentStatusInfo {
    pub status: AgentStatus,
    pub last_eval_at: Option<chrono::DateTime<Utc>>,
    pub decisions_count: u64,
}

/// Shared read model of agent statuses across the owning tasks.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<HashMap<(Isp, AgentKind), AgentStatusInfo>>>,
}

impl StatusBoard {
    pub fn publish(&self, base: &mailwarden_agents::AgentBase) {
        self.inner.write().insert(
            (base.isp, base.kind),
            AgentStatusInfo {
                status: base.status,
                last_eval_at: base.last_eval_at,
                decisions_count: base.decisions_count,
            },
        );
    }

    pub fn set_status(&self, isp: Isp, kind: AgentKind, status: AgentStatus) {
        let mut inner = self.inner.write();
        let entry = inner.entry((isp, kind)).or_insert(AgentStatusInfo {
            status,
            last_eval_at: None,
            decisions_count: 0,
        });
        entry.status = status;
    }

    pub fn get(&self, isp: Isp, kind: AgentKind) -> Option<AgentStatusInfo> {
        self.inner.read().get(&(isp, kind)).cloned()
    }

    pub fn any_firing(&self, isp: Isp) -> bool {
        self.inner
            .read()
            .iter()
            .any(|((i, _), info)| *i == isp && info.status == AgentStatus::Firing)
    }
}

enum ControlMsg {
    ResumeAgent(Isp, AgentKind),
    ResumeIsp(Isp),
    ResumeAll,
}

/// The engine's task graph owner.
pub struct Orchestrator {
    tenant: String,
    registry: Arc<IspRegistry>,
    processor: Arc<SignalProcessor>,
    convictions: Arc<ConvictionStore>,
    suppressions: Arc<IspSuppressionSet>,
    global_hub: Arc<GlobalSuppressionHub>,
    executor: Arc<Executor>,
    memory: MemoryStore,
    decision_store: Arc<dyn DecisionStore>,
    agent_states: Arc<dyn AgentStateStore>,
    alert_sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,

    paused: Arc<RwLock<HashSet<(Isp, AgentKind)>>>,
    board: StatusBoard,
    recent: Arc<Mutex<VecDeque<Decision>>>,
    ip_inventory: RwLock<Option<Arc<dyn IpInventory>>>,
    record_txs: HashMap<Isp, mpsc::Sender<AccountingRecord>>,
    control_tx: Option<mpsc::Sender<ControlMsg>>,
    handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant: impl Into<String>,
        registry: Arc<IspRegistry>,
        processor: Arc<SignalProcessor>,
        convictions: Arc<ConvictionStore>,
        suppressions: Arc<IspSuppressionSet>,
        global_hub: Arc<GlobalSuppressionHub>,
        executor: Arc<Executor>,
        memory: MemoryStore,
        decision_store: Arc<dyn DecisionStore>,
        agent_states: Arc<dyn AgentStateStore>,
        alert_sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            registry,
            processor,
            convictions,
            suppressions,
            global_hub,
            executor,
            memory,
            decision_store,
            agent_states,
            alert_sink,
            clock,
            paused: Arc::new(RwLock::new(HashSet::new())),
            board: StatusBoard::default(),
            recent: Arc::new(Mutex::new(VecDeque::new())),
            ip_inventory: RwLock::new(None),
            record_txs: HashMap::new(),
            control_tx: None,
            handles: Vec::new(),
        }
    }

    pub fn status_board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// Wire the IP provisioning inventory; readiness then compares warmup
    /// against active IP counts per cluster.
    pub fn set_ip_inventory(&self, inventory: Arc<dyn IpInventory>) {
        *self.ip_inventory.write() = Some(inventory);
    }

    /// Wire and spawn every loop. Idempotent state loads happen first so the
    /// engine never emits actions from a cold cache.
    pub async fn start(&mut self, mut factory: AgentFactory, cancel: CancelToken) -> Result<()> {
        let loaded = self.convictions.load_from_memory();
        info!(convictions = loaded, "conviction memory loaded");
        self.suppressions.load_hot_sets().await?;
        self.global_hub.load_hot_sets().await?;

        let decision_tx = factory.decision_sender();
        let decision_rx = factory
            .take_decision_receiver()
            .ok_or_else(|| OrchestratorError::Setup("decision channel already taken".into()))?;

        let mut fleet = factory.build_fleet();

        // Per-ISP record listeners, each owning its suppression agent.
        for isp in Isp::ALL {
            let Some(agents) = fleet.get_mut(&isp) else {
                return Err(OrchestratorError::Setup(format!("fleet missing {}", isp)));
            };
            let suppression = take_suppression_agent(agents)
                .ok_or_else(|| OrchestratorError::Setup(format!("no suppression agent for {}", isp)))?;
            let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAP);
            self.record_txs.insert(isp, tx);
            self.handles.push(self.spawn_record_listener(
                isp,
                suppression,
                rx,
                decision_tx.clone(),
                cancel.child_token(),
            ));
        }

        // Snapshot consumer across all ISPs.
        let (snapshot_tx, snapshot_rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAP);
        self.processor.subscribe(snapshot_tx);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAP);
        self.control_tx = Some(control_tx);
        self.handles.push(self.spawn_eval_loop(
            fleet,
            snapshot_rx,
            control_rx,
            decision_tx,
            cancel.child_token(),
        ));

        // Decision consumer.
        self.handles.push(self.spawn_decision_loop(decision_rx, cancel.child_token()));

        // Periodic tasks.
        self.handles.push(self.processor.clone().spawn(cancel.child_token()));
        self.handles.push(self.executor.clone().spawn_reload_drain(cancel.child_token()));
        self.handles.push(self.suppressions.clone().spawn_file_sync(cancel.child_token()));
        self.handles.push(self.global_hub.clone().spawn_file_sync(cancel.child_token()));
        self.handles.push(self.memory.spawn_flusher(cancel.child_token()));

        let state = json!({
            "tenant": self.tenant,
            "started_at": self.clock.now(),
            "isps": Isp::ALL.iter().map(|isp| isp.name()).collect::<Vec<_>>(),
        });
        if let Err(err) = self.memory.write_blob("global/orchestrator/state.json", &state) {
            warn!(error = %err, "orchestrator state persist failed");
        }

        info!(tenant = %self.tenant, "orchestrator started");
        Ok(())
    }

    /// Decode and route one submission payload. Returns `(received,
    /// processed)`; records for unknown clusters are dropped after signal
    /// ingestion is skipped.
    pub fn submit(&self, payload: &[u8]) -> (usize, usize) {
        let now = self.clock.now();
        let (received, records) = decode_batch(payload, now);
        let mut processed = 0;
        for record in records {
            if self.route_record(record) {
                processed += 1;
            }
        }
        (received, processed)
    }

    /// Route one record: signal ingestion plus the cluster's record channel.
    pub fn route_record(&self, record: AccountingRecord) -> bool {
        let Some(isp) = self.registry.classify(&record.domain, self.clock.now()) else {
            debug!(domain = %record.domain, "record for unmanaged cluster dropped");
            return false;
        };
        self.processor.ingest(isp, &record);
        if let Some(tx) = self.record_txs.get(&isp) {
            if tx.try_send(record).is_err() {
                warn!(isp = %isp, "record channel full, suppression processing dropped");
            }
        }
        true
    }

    fn spawn_record_listener(
        &self,
        isp: Isp,
        mut agent: SuppressionAgent,
        mut rx: mpsc::Receiver<AccountingRecord>,
        decision_tx: mpsc::Sender<Decision>,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let paused = self.paused.clone();
        let board = self.board.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_record = rx.recv() => {
                        let Some(record) = maybe_record else { break };
                        if paused.read().contains(&(isp, AgentKind::Suppression)) {
                            continue;
                        }
                        let now = clock.now();
                        let decisions = agent.process_record(&record, now).await;
                        board.publish(&agent.base);
                        for decision in decisions {
                            if decision_tx.try_send(decision).is_err() {
                                warn!(isp = %isp, "decision channel full, dropping");
                            }
                        }
                    }
                }
            }
            debug!(isp = %isp, "record listener stopped");
        })
    }

    fn spawn_eval_loop(
        &self,
        mut fleet: HashMap<Isp, IspAgents>,
        mut snapshot_rx: mpsc::Receiver<mailwarden_signals::SignalSnapshot>,
        mut control_rx: mpsc::Receiver<ControlMsg>,
        decision_tx: mpsc::Sender<Decision>,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let paused = self.paused.clone();
        let board = self.board.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_msg = control_rx.recv() => {
                        let Some(msg) = maybe_msg else { break };
                        apply_control(&mut fleet, msg, &board);
                    }
                    maybe_snapshot = snapshot_rx.recv() => {
                        let Some(snapshot) = maybe_snapshot else { break };
                        let now = clock.now();
                        let Some(agents) = fleet.get_mut(&snapshot.isp) else { continue };
                        for agent in agents.agents.iter_mut() {
                            let key = (snapshot.isp, agent.kind());
                            if paused.read().contains(&key) {
                                continue;
                            }
                            let decisions = agent.evaluate(&snapshot, now);
                            board.publish(agent.base());
                            for decision in decisions {
                                if decision_tx.try_send(decision).is_err() {
                                    warn!(isp = %snapshot.isp, "decision channel full, dropping");
                                }
                            }
                        }
                    }
                }
            }
            debug!("agent evaluation loop stopped");
        })
    }

    fn spawn_decision_loop(
        &self,
        mut rx: mpsc::Receiver<Decision>,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let tenant = self.tenant.clone();
        let decision_store = self.decision_store.clone();
        let agent_states = self.agent_states.clone();
        let board = self.board.clone();
        let recent = self.recent.clone();
        let executor = self.executor.clone();
        let alert_sink = self.alert_sink.clone();
        let memory = self.memory.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_decision = rx.recv() => {
                        let Some(decision) = maybe_decision else { break };
                        handle_decision(
                            decision,
                            &tenant,
                            decision_store.as_ref(),
                            agent_states.as_ref(),
                            &board,
                            &recent,
                            &executor,
                            alert_sink.as_ref(),
                            &memory,
                        )
                        .await;
                    }
                }
            }
            debug!("decision loop stopped");
        })
    }

    /// Pause one agent: the owning loop skips it from the next delivery on.
    pub async fn pause_agent(&self, isp: Isp, kind: AgentKind) {
        self.paused.write().insert((isp, kind));
        self.board.set_status(isp, kind, AgentStatus::Paused);
        self.persist_agent_state(isp, kind).await;
        info!(isp = %isp, agent = %kind, "agent paused");
    }

    /// Resume one agent, clearing cooldown/firing/error state.
    pub async fn resume_agent(&self, isp: Isp, kind: AgentKind) {
        self.paused.write().remove(&(isp, kind));
        self.board.set_status(isp, kind, AgentStatus::Active);
        self.send_control(ControlMsg::ResumeAgent(isp, kind)).await;
        self.persist_agent_state(isp, kind).await;
        info!(isp = %isp, agent = %kind, "agent resumed");
    }

    /// Manual override: re-enable one cluster and resume its MTA queues.
    pub async fn resume_isp(&self, isp: Isp) -> Result<()> {
        self.paused.write().retain(|(i, _)| *i != isp);
        for kind in AgentKind::ALL {
            self.board.set_status(isp, kind, AgentStatus::Active);
        }
        self.send_control(ControlMsg::ResumeIsp(isp)).await;
        if let Err(err) = self.executor.resume_isp(isp).await {
            warn!(isp = %isp, error = %err, "executor resume failed");
        }
        Ok(())
    }

    /// Manual override: re-enable everything.
    pub async fn resume_all(&self) -> Result<()> {
        self.paused.write().clear();
        for isp in Isp::ALL {
            for kind in AgentKind::ALL {
                self.board.set_status(isp, kind, AgentStatus::Active);
            }
        }
        self.send_control(ControlMsg::ResumeAll).await;
        if let Err(err) = self.executor.resume_all().await {
            warn!(error = %err, "executor resume-all failed");
        }
        Ok(())
    }

    async fn send_control(&self, msg: ControlMsg) {
        if let Some(tx) = &self.control_tx {
            if tx.send(msg).await.is_err() {
                warn!("evaluation loop unavailable for control message");
            }
        }
    }

    async fn persist_agent_state(&self, isp: Isp, kind: AgentKind) {
        let Some(info) = self.board.get(isp, kind) else { return };
        let now = Utc::now();
        let row = AgentStateRow {
            tenant: self.tenant.clone(),
            isp: isp.name().to_string(),
            agent_type: kind.name().to_string(),
            status: info.status.name().to_string(),
            last_eval_at: info.last_eval_at,
            decisions_count: info.decisions_count,
            current_actions: json!([]),
            error_message: None,
            state_key: Some(MemoryStore::agent_key(isp.name(), kind.name(), "state.json")),
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = self.agent_states.upsert_agent_state(&row).await {
            warn!(isp = %isp, agent = %kind, error = %err, "agent state persist failed");
        }
    }

    /// Recent decisions, newest last, bounded at [`RECENT_DECISIONS_CAP`].
    pub fn recent_decisions(&self) -> Vec<Decision> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Aggregate per-ISP health into a campaign readiness verdict.
    pub fn campaign_readiness(&self) -> CampaignReadiness {
        let recent = self.recent.lock();
        let inventory = self.ip_inventory.read().clone();
        let mut isps = Vec::with_capacity(Isp::ALL.len());
        let mut overall = ReadyStatus::Ready;

        for isp in Isp::ALL {
            let snapshot = self.processor.snapshot_now(isp);
            let health = health_score(
                snapshot.bounce_rate_1h,
                snapshot.complaint_rate_1h,
                snapshot.deferral_rate_5m,
            );
            let firing = self.board.any_firing(isp);

            let (warmup_ip_count, active_ip_count) = inventory
                .as_ref()
                .map(|inv| (inv.warmup_ip_count(isp), inv.active_ip_count(isp)))
                .unwrap_or((0, 0));
            let warmup_heavy = warmup_ip_count > active_ip_count;

            let recent_flags = recent.iter().any(|d| {
                d.isp == isp && matches!(d.action, Action::EmergencyHalt | Action::QuarantineIp)
            });

            let status = if firing {
                ReadyStatus::Blocked
            } else if health < CAUTION_HEALTH || warmup_heavy || recent_flags {
                ReadyStatus::Caution
            } else {
                ReadyStatus::Ready
            };
            overall = overall.max(status);
            isps.push(IspReadiness {
                isp,
                health,
                status,
                bounce_rate_1h: snapshot.bounce_rate_1h,
                complaint_rate_1h: snapshot.complaint_rate_1h,
                deferral_rate_5m: snapshot.deferral_rate_5m,
                firing,
                warmup_ip_count,
                active_ip_count,
            });
        }

        CampaignReadiness { overall, isps, generated_at: self.clock.now() }
    }

    /// Task handles, for shutdown joins.
    pub fn handles(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.handles)
    }
}

fn take_suppression_agent(agents: &mut IspAgents) -> Option<SuppressionAgent> {
    let index = agents.agents.iter().position(|a| a.kind() == AgentKind::Suppression)?;
    match agents.agents.remove(index) {
        Agent::Suppression(agent) => Some(agent),
        other => {
            // Kind and variant always agree; put it back if they ever don't.
            agents.agents.push(other);
            None
        }
    }
}

fn apply_control(fleet: &mut HashMap<Isp, IspAgents>, msg: ControlMsg, board: &StatusBoard) {
    match msg {
        ControlMsg::ResumeAgent(isp, kind) => {
            if let Some(agent) = fleet.get_mut(&isp).and_then(|agents| agents.get_mut(kind)) {
                agent.resume();
                board.publish(agent.base());
            }
        }
        ControlMsg::ResumeIsp(isp) => {
            if let Some(agents) = fleet.get_mut(&isp) {
                for agent in agents.agents.iter_mut() {
                    agent.resume();
                    board.publish(agent.base());
                }
            }
        }
        ControlMsg::ResumeAll => {
            for agents in fleet.values_mut() {
                for agent in agents.agents.iter_mut() {
                    agent.resume();
                    board.publish(agent.base());
                }
            }
        }
    }
}

fn decision_row(tenant: &str, decision: &Decision) -> DecisionRow {
    DecisionRow {
        id: decision.id.to_string(),
        tenant: tenant.to_string(),
        isp: decision.isp.name().to_string(),
        agent_type: decision.agent.name().to_string(),
        signal_values: decision.signal_values.clone(),
        action_taken: decision.action.name().to_string(),
        action_params: decision.action_params.clone(),
        target_type: decision.target_type.name().to_string(),
        target_value: decision.target_value.clone(),
        result: decision.result.name().to_string(),
        reverted_at: None,
        revert_reason: None,
        created_at: decision.created_at,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_decision(
    mut decision: Decision,
    tenant: &str,
    decision_store: &dyn DecisionStore,
    agent_states: &dyn AgentStateStore,
    board: &StatusBoard,
    recent: &Mutex<VecDeque<Decision>>,
    executor: &Executor,
    alert_sink: &dyn AlertSink,
    memory: &MemoryStore,
) {
    // Normalize empty JSON payloads before persistence.
    if decision.action_params.is_null() {
        decision.action_params = json!({});
    }
    if decision.signal_values.is_null() {
        decision.signal_values = json!({});
    }

    let row = decision_row(tenant, &decision);
    if let Err(err) = decision_store.insert_decision(&row).await {
        warn!(error = %err, "decision persist failed");
    }

    if let Some(info) = board.get(decision.isp, decision.agent) {
        let now = Utc::now();
        let state_row = AgentStateRow {
            tenant: tenant.to_string(),
            isp: decision.isp.name().to_string(),
            agent_type: decision.agent.name().to_string(),
            status: info.status.name().to_string(),
            last_eval_at: info.last_eval_at,
            decisions_count: info.decisions_count,
            current_actions: json!([decision.action.name()]),
            error_message: None,
            state_key: Some(MemoryStore::agent_key(
                decision.isp.name(),
                decision.agent.name(),
                "state.json",
            )),
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = agent_states.upsert_agent_state(&state_row).await {
            warn!(error = %err, "agent state persist failed");
        }
    }

    {
        let mut ring = recent.lock();
        if ring.len() >= RECENT_DECISIONS_CAP {
            ring.pop_front();
        }
        ring.push_back(decision.clone());
    }

    if decision.result == DecisionResult::Pending {
        match executor.execute(&decision).await {
            Ok(()) => {
                decision.result = DecisionResult::Applied;
            }
            Err(err) => {
                warn!(action = %decision.action, error = %err, "decision execution failed");
                decision.result = DecisionResult::Failed;
            }
        }
        let result = decision.result.name();
        if let Err(err) = decision_store.update_decision_result(&row.id, result).await {
            warn!(error = %err, "decision result update failed");
        }
    }

    if decision.action.is_significant() {
        alert_sink
            .send(Alert {
                isp: decision.isp,
                action: decision.action,
                target: decision.target_value.clone(),
                detail: decision.action_params.to_string(),
                at: decision.created_at,
            })
            .await;
    }

    let key = MemoryStore::agent_key(decision.isp.name(), decision.agent.name(), "decisions.jsonl");
    if let Err(err) = memory.append_line(&key, &decision) {
        warn!(error = %err, "decision memory append failed");
    }
}
