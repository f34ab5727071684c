//! Agent factory and the tagged-variant dispatch wrapper

use crate::base::{AgentBase, AgentStatus};
use crate::decision::Decision;
use crate::emergency::EmergencyAgent;
use crate::pool::PoolAgent;
use crate::reputation::ReputationAgent;
use crate::suppression::SuppressionAgent;
use crate::throttle::ThrottleAgent;
use crate::warmup::WarmupAgent;
use chrono::{DateTime, Utc};
use mailwarden_conviction::ConvictionStore;
use mailwarden_core::{AccountingRecord, AgentKind, Isp, IspConfig};
use mailwarden_memory::MemoryStore;
use mailwarden_signals::SignalSnapshot;
use mailwarden_suppression::IspSuppressionSet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Capacity of the global decision channel.
pub const DECISION_CHANNEL_CAP: usize = 1000;

/// Closed dispatch over the six archetypes.
pub enum Agent {
    Reputation(ReputationAgent),
    Throttle(ThrottleAgent),
    Pool(PoolAgent),
    Warmup(WarmupAgent),
    Emergency(EmergencyAgent),
    Suppression(SuppressionAgent),
}

impl Agent {
    pub fn base(&self) -> &AgentBase {
        match self {
            Agent::Reputation(a) => &a.base,
            Agent::Throttle(a) => &a.base,
            Agent::Pool(a) => &a.base,
            Agent::Warmup(a) => &a.base,
            Agent::Emergency(a) => &a.base,
            Agent::Suppression(a) => &a.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut AgentBase {
        match self {
            Agent::Reputation(a) => &mut a.base,
            Agent::Throttle(a) => &mut a.base,
            Agent::Pool(a) => &mut a.base,
            Agent::Warmup(a) => &mut a.base,
            Agent::Emergency(a) => &mut a.base,
            Agent::Suppression(a) => &mut a.base,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.base().kind
    }

    /// Evaluate one snapshot. The suppression variant is a no-op here.
    pub fn evaluate(&mut self, snapshot: &SignalSnapshot, now: DateTime<Utc>) -> Vec<Decision> {
        match self {
            Agent::Reputation(a) => a.evaluate(snapshot, now),
            Agent::Throttle(a) => a.evaluate(snapshot, now),
            Agent::Pool(a) => a.evaluate(snapshot, now),
            Agent::Warmup(a) => a.evaluate(snapshot, now),
            Agent::Emergency(a) => a.evaluate(snapshot, now),
            Agent::Suppression(a) => a.evaluate(snapshot, now),
        }
    }

    /// Per-record processing; only the suppression variant does work.
    pub async fn process_record(&mut self, record: &AccountingRecord, now: DateTime<Utc>) -> Vec<Decision> {
        match self {
            Agent::Suppression(a) => a.process_record(record, now).await,
            _ => Vec::new(),
        }
    }

    /// Manual resume, resolving any active incident on the emergency agent.
    pub fn resume(&mut self) {
        if let Agent::Emergency(a) = self {
            a.resolve_incident();
        } else {
            self.base_mut().resume();
        }
    }

    pub fn is_firing(&self) -> bool {
        self.base().status == AgentStatus::Firing
    }
}

/// One ISP's six agents, in evaluation order.
pub struct IspAgents {
    pub agents: Vec<Agent>,
}

impl IspAgents {
    pub fn get_mut(&mut self, kind: AgentKind) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|agent| agent.kind() == kind)
    }

    pub fn get(&self, kind: AgentKind) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.kind() == kind)
    }
}

/// Builds six agents per ISP from per-ISP configuration and owns the global
/// decision channel.
pub struct AgentFactory {
    configs: HashMap<Isp, IspConfig>,
    convictions: Arc<ConvictionStore>,
    suppressions: Arc<IspSuppressionSet>,
    memory: Option<MemoryStore>,
    decision_tx: mpsc::Sender<Decision>,
    decision_rx: Option<mpsc::Receiver<Decision>>,
}

impl AgentFactory {
    pub fn new(
        configs: Vec<IspConfig>,
        convictions: Arc<ConvictionStore>,
        suppressions: Arc<IspSuppressionSet>,
        memory: Option<MemoryStore>,
    ) -> Self {
        let configs: HashMap<Isp, IspConfig> =
            configs.into_iter().map(|config| (config.isp, config)).collect();
        let (decision_tx, decision_rx) = mpsc::channel(DECISION_CHANNEL_CAP);
        Self {
            configs,
            convictions,
            suppressions,
            memory,
            decision_tx,
            decision_rx: Some(decision_rx),
        }
    }

    pub fn decision_sender(&self) -> mpsc::Sender<Decision> {
        self.decision_tx.clone()
    }

    /// The single consumer end of the decision channel.
    pub fn take_decision_receiver(&mut self) -> Option<mpsc::Receiver<Decision>> {
        self.decision_rx.take()
    }

    fn config_for(&self, isp: Isp) -> IspConfig {
        self.configs.get(&isp).cloned().unwrap_or_else(|| IspConfig::default_for(isp))
    }

    /// Build the six agents for one cluster.
    pub fn build(&self, isp: Isp) -> IspAgents {
        let config = self.config_for(isp);
        let agents = vec![
            Agent::Reputation(ReputationAgent::new(isp, config.clone(), self.convictions.clone())),
            Agent::Throttle(ThrottleAgent::new(
                isp,
                config.clone(),
                self.convictions.clone(),
                self.memory.clone(),
            )),
            Agent::Pool(PoolAgent::new(isp, config.clone(), self.convictions.clone())),
            Agent::Warmup(WarmupAgent::new(isp, config.clone(), self.convictions.clone())),
            Agent::Emergency(EmergencyAgent::new(
                isp,
                config.clone(),
                self.convictions.clone(),
                self.memory.clone(),
            )),
            Agent::Suppression(SuppressionAgent::new(
                isp,
                config,
                self.convictions.clone(),
                self.suppressions.clone(),
            )),
        ];
        IspAgents { agents }
    }

    /// Build the whole fleet.
    pub fn build_fleet(&self) -> HashMap<Isp, IspAgents> {
        let fleet = Isp::ALL.iter().map(|isp| (*isp, self.build(*isp))).collect();
        info!(isps = Isp::ALL.len(), agents_per_isp = AgentKind::ALL.len(), "agent fleet built");
        fleet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailwarden_store::SledStore;

    fn factory() -> AgentFactory {
        let store = Arc::new(SledStore::temporary().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let suppressions = Arc::new(IspSuppressionSet::new("default", dir.keep(), store));
        AgentFactory::new(
            IspConfig::default_set(),
            Arc::new(ConvictionStore::new(None)),
            suppressions,
            None,
        )
    }

    #[test]
    fn builds_six_agents_per_isp_in_order() {
        let factory = factory();
        let agents = factory.build(Isp::Gmail);
        let kinds: Vec<AgentKind> = agents.agents.iter().map(Agent::kind).collect();
        assert_eq!(kinds, AgentKind::ALL.to_vec());
    }

    #[test]
    fn fleet_covers_all_isps() {
        let factory = factory();
        let fleet = factory.build_fleet();
        assert_eq!(fleet.len(), Isp::ALL.len());
    }

    #[test]
    fn decision_receiver_is_single_take() {
        let mut factory = factory();
        assert!(factory.take_decision_receiver().is_some());
        assert!(factory.take_decision_receiver().is_none());
    }

    #[tokio::test]
    async fn non_suppression_agents_ignore_records() {
        let factory = factory();
        let mut agents = factory.build(Isp::Gmail);
        let record = AccountingRecord {
            kind: mailwarden_core::RecordKind::Bounce,
            recipient: "a@gmail.com".into(),
            sender: String::new(),
            source_ip: String::new(),
            vmta: String::new(),
            pool: String::new(),
            domain: "gmail.com".into(),
            bounce_category: "bad-mailbox".into(),
            dsn_code: String::new(),
            dsn_diag: String::new(),
            feedback_type: String::new(),
            job_id: String::new(),
            size: 0,
            timestamp: Utc::now(),
        };
        let reputation = agents.get_mut(AgentKind::Reputation).unwrap();
        assert!(reputation.process_record(&record, Utc::now()).await.is_empty());
    }
}
