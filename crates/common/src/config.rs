use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KflowError, Result};

/// Engine-wide knobs shared by planner builders and the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch_size_rows: usize,
    /// Quantile used by the outlier pipeline when the caller does not pick one.
    pub default_quantile: f64,
    pub tdigest_delta: u32,
    pub tdigest_buffer_size: u32,
    pub dataset: DatasetConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size_rows: 8192,
            default_quantile: 0.995,
            tdigest_delta: 100,
            tdigest_buffer_size: 500,
            dataset: DatasetConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file. Missing keys fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw).map_err(|e| {
            KflowError::InvalidConfig(format!(
                "failed to parse engine config {}: {e}",
                path.as_ref().display()
            ))
        })
    }
}

/// Defaults for partitioned dataset writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// File name template; `{i}` is replaced with a per-directory counter.
    pub basename_template: String,
    pub existing_data_behavior: ExistingDataBehavior,
    /// 0 means one file per partition directory.
    pub max_rows_per_file: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            basename_template: "part{i}.parquet".to_string(),
            existing_data_behavior: ExistingDataBehavior::OverwriteOrIgnore,
            max_rows_per_file: 0,
        }
    }
}

/// What a dataset write does when the target already holds files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExistingDataBehavior {
    /// Overwrite files whose names collide, leave everything else alone.
    OverwriteOrIgnore,
    /// Fail if the root directory contains any file.
    Error,
    /// Clear each partition directory that receives new data.
    DeleteMatchingPartitions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"batch_size_rows": 10, "dataset": {"max_rows_per_file": 5}}"#)
                .expect("parse");
        assert_eq!(cfg.batch_size_rows, 10);
        assert_eq!(cfg.default_quantile, 0.995);
        assert_eq!(cfg.dataset.max_rows_per_file, 5);
        assert_eq!(cfg.dataset.basename_template, "part{i}.parquet");
        assert_eq!(
            cfg.dataset.existing_data_behavior,
            ExistingDataBehavior::OverwriteOrIgnore
        );
    }
}
