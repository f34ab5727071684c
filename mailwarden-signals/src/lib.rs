//! # Mailwarden Signals
//!
//! Rolling per-ISP aggregation of MTA accounting records. Each ISP cluster
//! owns one window holding minute-bucketed counter streams (sent, bounced,
//! deferred, complaints) at three levels — ISP-global, per source IP, per
//! recipient domain — plus a small ring of recent DSN samples.
//!
//! Every tick the processor computes one [`SignalSnapshot`] per ISP and fans
//! it out to subscribers with non-blocking sends; slow listeners lose
//! snapshots, never stall ingestion.

pub mod processor;
pub mod snapshot;
pub mod window;

pub use processor::{PRUNE_INTERVAL, SignalProcessor, TICK_INTERVAL};
pub use snapshot::{IpMetric, SignalSnapshot, ip_score, rate};
pub use window::IspWindow;
