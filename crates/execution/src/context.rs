use std::sync::Arc;

use kflow_common::{EngineConfig, MetricsRegistry, Result};

use crate::registry::FunctionRegistry;

#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Target batch size for sources that split their input.
    pub batch_size_rows: usize,

    /// Frozen scalar functions available to `ScalarFunction` expressions.
    pub registry: Arc<FunctionRegistry>,

    pub metrics: MetricsRegistry,
}

impl TaskContext {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<FunctionRegistry>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            batch_size_rows: config.batch_size_rows.max(1),
            registry,
            metrics,
        }
    }

    /// Default config and the built-in function set.
    pub fn with_builtins() -> Result<Self> {
        Ok(Self::new(
            &EngineConfig::default(),
            Arc::new(FunctionRegistry::with_builtin_functions()?),
            MetricsRegistry::new(),
        ))
    }
}

pub type SharedTaskContext = Arc<TaskContext>;
