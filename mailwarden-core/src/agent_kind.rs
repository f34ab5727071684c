//! Agent archetype vocabulary
//!
//! Six archetypes run per ISP cluster. The enum lives in core because the
//! conviction store, the durable stores and the orchestrator all key on it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of agent archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Reputation,
    Throttle,
    Pool,
    Warmup,
    Emergency,
    Suppression,
}

impl AgentKind {
    /// All archetypes, in evaluation order.
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Reputation,
        AgentKind::Throttle,
        AgentKind::Pool,
        AgentKind::Warmup,
        AgentKind::Emergency,
        AgentKind::Suppression,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Reputation => "reputation",
            AgentKind::Throttle => "throttle",
            AgentKind::Pool => "pool",
            AgentKind::Warmup => "warmup",
            AgentKind::Emergency => "emergency",
            AgentKind::Suppression => "suppression",
        }
    }

    pub fn from_name(name: &str) -> Option<AgentKind> {
        AgentKind::ALL.iter().find(|kind| kind.name() == name).copied()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
