//! Cross-crate scenario tests for the Mailwarden engine.
//!
//! The actual tests live under `tests/`; this crate exists to anchor them in
//! the workspace.
