//! # Mailwarden Agents
//!
//! Six agent archetypes run per ISP cluster:
//!
//! - **Reputation** — bounce/complaint thresholds per IP and ISP-global
//! - **Throttle** — geometric backoff and gradual recovery of the send rate
//! - **Pool** — IP quarantine and volume reduction by composite score
//! - **Warmup** — ramp holds and advancement for warming IPs
//! - **Emergency** — spike detection with incident reporting and halts
//! - **Suppression** — per-record permanent recipient suppression
//!
//! Agents share one contract: `evaluate(&snapshot) → Vec<Decision>`, with the
//! suppression agent overriding to a no-op and exposing `process_record`
//! instead. Dispatch is a closed enum, not runtime inheritance. Every action
//! decision is paired with a conviction carrying the full micro-context.

pub mod base;
pub mod decision;
pub mod emergency;
pub mod factory;
pub mod pool;
pub mod reputation;
pub mod suppression;
pub mod throttle;
pub mod warmup;

pub use base::{AgentBase, AgentStatus};
pub use decision::{Action, Decision, DecisionResult, TargetType};
pub use emergency::{EmergencyAgent, EmergencyTrigger, IncidentReport, IncidentStatus};
pub use factory::{Agent, AgentFactory, DECISION_CHANNEL_CAP, IspAgents};
pub use pool::PoolAgent;
pub use reputation::ReputationAgent;
pub use suppression::SuppressionAgent;
pub use throttle::ThrottleAgent;
pub use warmup::WarmupAgent;
