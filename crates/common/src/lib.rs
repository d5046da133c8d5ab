#![deny(missing_docs)]

//! Shared configuration, error types, and identifiers for Flint crates.
//!
//! Architecture role:
//! - defines analyzer configuration passed across planner layers
//! - provides the common [`FlintError`] / [`Result`] contracts
//! - hosts process-unique expression identifiers
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]

/// Analyzer configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;

pub use config::AnalyzerConfig;
pub use error::{FlintError, Result};
pub use ids::*;
