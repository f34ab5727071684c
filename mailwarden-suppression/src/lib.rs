//! # Mailwarden Suppression
//!
//! Permanent recipient suppression, two layers:
//!
//! - [`IspSuppressionSet`] — per-ISP hot sets of suppressed recipients,
//!   mirrored to MTA-facing `<dir>/<isp>.txt` files
//! - [`GlobalSuppressionHub`] — the org-wide single source of truth, keyed by
//!   both the lowercased email and its md5 hash, mirrored to
//!   `global_suppression.txt` and optionally copied to the MTA host
//!
//! Suppression is one-way: entries leave only through an administrative
//! path, never through the engine.

pub mod global;
pub mod per_isp;

use thiserror::Error;

pub use global::{GlobalSuppressRequest, GlobalSuppressionHub, RemoteMirror, SuppressionEvent, md5_hex};
pub use per_isp::{IspSuppressionSet, SuppressRequest};

/// Result type for suppression operations.
pub type Result<T> = std::result::Result<T, SuppressionError>;

/// Errors raised by the suppression layers.
#[derive(Error, Debug)]
pub enum SuppressionError {
    #[error("Store error: {0}")]
    Store(#[from] mailwarden_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote mirror error: {0}")]
    Remote(String),
}

/// Canonical form shared by both layers: trimmed and lowercased.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
