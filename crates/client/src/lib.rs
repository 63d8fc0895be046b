//! Embedded entry point for kflow: engine, plan materialization, table results
//! and sample data.

mod runtime;
mod session;

pub mod engine;
pub mod expr;
pub mod sample;
pub mod table;

pub use engine::Engine;
pub use expr::*;
pub use runtime::{EmbeddedRuntime, Materialized, Runtime};
pub use sample::{SampleConfig, sample_batches, sample_reader, sample_schema};
pub use table::Table;
