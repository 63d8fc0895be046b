use std::sync::Arc;

use kflow_common::{EngineConfig, MetricsRegistry, Result};
use kflow_execution::{FunctionRegistry, TaskContext};
use kflow_storage::{FileSystem, LocalFileSystem, ParquetDatasetProvider, StorageProvider};

use crate::runtime::{EmbeddedRuntime, Runtime};

pub type SharedSession = Arc<Session>;

#[derive(Debug)]
pub struct Session {
    pub config: EngineConfig,
    pub registry: Arc<FunctionRegistry>,
    pub metrics: MetricsRegistry,
    pub storage: Arc<dyn StorageProvider>,
    pub fs: Arc<dyn FileSystem>,
    pub runtime: Arc<dyn Runtime>,
}

impl Session {
    pub fn new(config: EngineConfig, registry: FunctionRegistry) -> Result<Self> {
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem);
        Ok(Self {
            config,
            registry: Arc::new(registry),
            metrics: MetricsRegistry::new(),
            storage: Arc::new(ParquetDatasetProvider::new(Arc::clone(&fs))),
            fs,
            runtime: Arc::new(EmbeddedRuntime::new()),
        })
    }

    /// Per-plan execution context sharing this session's registry and metrics.
    pub fn task_context(&self) -> Arc<TaskContext> {
        Arc::new(TaskContext::new(
            &self.config,
            Arc::clone(&self.registry),
            self.metrics.clone(),
        ))
    }

    pub fn prometheus_metrics(&self) -> String {
        self.metrics.render_prometheus()
    }
}
