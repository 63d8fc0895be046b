//! Shared configuration, error types, IDs, and observability primitives for kflow crates.
//!
//! Architecture role:
//! - defines engine configuration passed across layers
//! - provides the common [`KflowError`] / [`Result`] contracts
//! - hosts the prometheus-backed metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::{DatasetConfig, EngineConfig, ExistingDataBehavior};
pub use error::{KflowError, Result};
pub use ids::*;
pub use metrics::MetricsRegistry;
