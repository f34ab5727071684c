//! # Mailwarden Conviction
//!
//! Append-only per-agent micro-observation memory. Each qualifying agent
//! evaluation records a binary verdict — WILL (this worked / is healthy) or
//! WONT (this failed / forced an action) — together with the full
//! [`MicroContext`] it was observed in.
//!
//! The store keeps a bounded in-memory ring per `(isp, agent)`, fans new
//! convictions out to subscribers, tracks recording velocity, and appends
//! each conviction as one JSONL line to the durable memory store. Recall is
//! similarity-based: the throttle agent conditions its next rate decision on
//! what the same agent concluded in comparable contexts.

pub mod model;
pub mod similarity;
pub mod store;
pub mod synthesis;

pub use model::{Conviction, MicroContext, Verdict};
pub use similarity::{SimilarityWeights, WEIGHTS, context_similarity, dsn_family};
pub use store::{ConvictionStore, RING_CAP, VelocityStats};
pub use synthesis::{RecallSummary, synthesize};
