//! # Mailwarden Import
//!
//! Polls a blob store for CSV drops, classifies each file (suppression /
//! warmup / mailable), maps columns from the header — or structurally, for
//! headerless files — normalizes every row into the canonical subscriber
//! shape, and drives batched upserts into the durable store. Suppression
//! files feed the global suppression hub instead.
//!
//! Processed objects are renamed under `processed/` with a store-allocated
//! sequence number; files stuck in `processing` from a crash are reset at
//! startup and picked up again by the next poll.

pub mod blob;
pub mod classify;
pub mod columns;
pub mod importer;
pub mod normalize;

use thiserror::Error;

pub use blob::{BlobObject, BlobSource, FsBlobSource};
pub use classify::{Classification, classify};
pub use columns::{ColumnMap, looks_like_email, map_columns, map_columns_headerless};
pub use importer::{BATCH_SIZE, Importer};
pub use normalize::{DomainGroup, NormalizedRecord, VerificationStatus, normalize_row};

/// Result type for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;

/// Errors raised by the import pipeline.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Store error: {0}")]
    Store(#[from] mailwarden_store::StoreError),

    #[error("Suppression error: {0}")]
    Suppression(#[from] mailwarden_suppression::SuppressionError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unusable file: {0}")]
    Unusable(String),
}
