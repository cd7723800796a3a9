//! Shared types for the tinyserve workspace.
//!
//! Keep cross-crate wire and domain types here so the daemon and the CLI
//! agree on one schema.

#![warn(missing_docs)]

/// Shared API DTOs for cross-crate use.
pub mod api;
