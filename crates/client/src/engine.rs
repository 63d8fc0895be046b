use std::sync::Arc;

use kflow_common::{EngineConfig, KflowError, Result};
use kflow_execution::FunctionRegistry;
use kflow_planner::{
    DatasetWriteOptions, LogicalPlan, NodeKind, TDigestOptions, explain_plan, write_dataset,
};
use kflow_storage::DatasetWriteSummary;
use tracing::info;

use crate::runtime::Materialized;
use crate::session::{Session, SharedSession};
use crate::table::Table;

/// Plan materializer bound to one session.
#[derive(Debug, Clone)]
pub struct Engine {
    session: SharedSession,
}

impl Engine {
    /// Engine with the built-in URL kernels registered.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_registry(config, FunctionRegistry::with_builtin_functions()?)
    }

    pub fn with_registry(config: EngineConfig, registry: FunctionRegistry) -> Result<Self> {
        if config.batch_size_rows == 0 {
            return Err(KflowError::InvalidConfig(
                "batch_size_rows must be positive".to_string(),
            ));
        }
        let session = Arc::new(Session::new(config, registry)?);
        Ok(Self { session })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.session.config
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.session.registry
    }

    /// Write options for `base_dir` carrying the configured dataset defaults.
    pub fn dataset_options(
        &self,
        base_dir: impl Into<String>,
        partition_by: Vec<String>,
    ) -> DatasetWriteOptions {
        DatasetWriteOptions::with_config(base_dir, partition_by, &self.session.config.dataset)
    }

    /// T-digest parameters from the config, targeting `default_quantile`.
    pub fn tdigest_options(&self) -> TDigestOptions {
        let config = &self.session.config;
        TDigestOptions {
            q: config.default_quantile,
            delta: config.tdigest_delta,
            buffer_size: config.tdigest_buffer_size,
            ..TDigestOptions::default()
        }
    }

    /// Materialize `plan` into memory. The plan must not end in a write.
    pub async fn execute_to_table(&self, plan: LogicalPlan) -> Result<Table> {
        if matches!(plan.root_node().map(|n| &n.kind), Some(NodeKind::Write(_))) {
            return Err(KflowError::Planning(
                "plan ends in a dataset write; use execute_to_dataset".to_string(),
            ));
        }
        match self.execute(plan).await? {
            Materialized::Table(output) => Ok(Table::from(output)),
            Materialized::Dataset(_) => Err(KflowError::Execution(
                "table materialization produced a dataset".to_string(),
            )),
        }
    }

    /// Materialize `plan` as a hive-partitioned parquet dataset.
    pub async fn execute_to_dataset(
        &self,
        plan: LogicalPlan,
        options: DatasetWriteOptions,
    ) -> Result<DatasetWriteSummary> {
        info!(base_dir = %options.base_dir, partition_by = ?options.partition_by, "writing dataset");
        match self.execute(write_dataset(plan, options)).await? {
            Materialized::Dataset(summary) => Ok(summary),
            Materialized::Table(_) => Err(KflowError::Execution(
                "dataset materialization produced no write".to_string(),
            )),
        }
    }

    pub fn explain(&self, plan: &LogicalPlan) -> String {
        explain_plan(plan)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.session.runtime.shutdown().await
    }

    pub fn prometheus_metrics(&self) -> String {
        self.session.prometheus_metrics()
    }

    async fn execute(&self, plan: LogicalPlan) -> Result<Materialized> {
        let session = &self.session;
        session
            .runtime
            .execute(
                plan,
                session.task_context(),
                Arc::clone(&session.storage),
                Arc::clone(&session.fs),
            )
            .await
    }
}
