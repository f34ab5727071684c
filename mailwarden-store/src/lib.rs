//! # Mailwarden Store
//!
//! Contracts for the relational collaborator (decisions, agent states,
//! suppressions, import log, subscribers) plus an embedded `sled`-backed
//! implementation. The engine core only ever talks to the traits; swapping in
//! a server-backed driver is a packaging concern.
//!
//! Batch mutations that can fail transiently are retried through
//! [`with_retry`] (3 attempts, 100/200 ms backoff).

pub mod error;
pub mod rows;
pub mod sled_store;
pub mod traits;

pub use error::{Result, StoreError, with_retry};
pub use rows::{
    AgentStateRow, BatchOutcome, DecisionRow, GlobalSuppressionRow, ImportLogRow, ImportStatus,
    SubscriberRow, SuppressionRow,
};
pub use sled_store::SledStore;
pub use traits::{
    AgentStateStore, DecisionStore, GlobalSuppressionRowStore, ImportLogStore, IspConfigStore,
    SubscriberStore, SuppressionRowStore, load_or_seed_isp_configs,
};
