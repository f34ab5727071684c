//! # Mailwarden Core
//!
//! Shared foundation for the Mailwarden deliverability governance engine:
//!
//! - The closed [`Isp`] registry with static domain mapping and an MX-suffix
//!   fallback classifier
//! - The [`AccountingRecord`] model with a tolerant multi-dialect decoder
//! - Per-ISP governance configuration and the engine-wide startup
//!   configuration
//! - A testable [`Clock`] plus the US holiday calendar used by conviction
//!   contexts
//! - Cooperative task cancellation via [`CancelToken`]

pub mod agent_kind;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod isp;
pub mod record;

pub use agent_kind::AgentKind;
pub use cancel::CancelToken;
pub use clock::{Clock, FixedClock, SystemClock, holiday_on};
pub use config::{EngineConfig, IspConfig, WarmupSchedule};
pub use error::{CoreError, Result};
pub use isp::{Isp, IspRegistry, MxResolver};
pub use record::{AccountingRecord, RecordKind, decode_batch};
