//! Parquet dataset scan with optional hive partition discovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray, new_null_array};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use kflow_common::{KflowError, Result};
use kflow_execution::{ExecNode, SendableRecordBatchStream, StreamAdapter, TaskContext};
use kflow_planner::ScanNode;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::info;

use crate::filesystem::{FileSystem, LocalFileSystem, resolve_uri};
use crate::partitioning::partition_values;
use crate::provider::{StorageExecNode, StorageProvider};

#[derive(Debug, Clone)]
pub struct ParquetDatasetProvider {
    fs: Arc<dyn FileSystem>,
}

impl ParquetDatasetProvider {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

impl Default for ParquetDatasetProvider {
    fn default() -> Self {
        Self::new(Arc::new(LocalFileSystem))
    }
}

impl StorageProvider for ParquetDatasetProvider {
    fn scan(&self, scan: &ScanNode) -> Result<StorageExecNode> {
        Ok(Arc::new(DatasetScanNode::try_new(
            Arc::clone(&self.fs),
            &scan.uri,
            scan.hive_partitioning,
        )?))
    }
}

#[derive(Debug, Clone)]
struct DatasetFile {
    path: PathBuf,
    partitions: Vec<Option<String>>,
}

#[derive(Debug)]
pub struct DatasetScanNode {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    files: Vec<DatasetFile>,
    file_schema: SchemaRef,
    schema: SchemaRef,
    partition_columns: Vec<String>,
}

impl DatasetScanNode {
    /// Discover the files under `uri` and derive the dataset schema.
    pub fn try_new(fs: Arc<dyn FileSystem>, uri: &str, hive_partitioning: bool) -> Result<Self> {
        let root = resolve_uri(uri)?;
        if !fs.exists(&root) {
            return Err(KflowError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("dataset root {} does not exist", root.display()),
            )));
        }
        let paths = if fs.is_dir(&root) {
            fs.list_files_recursive(&root)?
                .into_iter()
                .filter(|p| is_data_file(&root, p))
                .collect::<Vec<_>>()
        } else {
            vec![root.clone()]
        };
        let Some(first) = paths.first() else {
            return Err(KflowError::Execution(format!(
                "no parquet files found under {}",
                root.display()
            )));
        };

        let file_schema = read_file_schema(fs.as_ref(), first)?;
        let partition_columns = if hive_partitioning {
            partition_values(&root, first)
                .into_iter()
                .map(|(name, _)| name)
                .filter(|name| file_schema.index_of(name).is_err())
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let partitions = if partition_columns.is_empty() {
                Vec::new()
            } else {
                let found = partition_values(&root, &path);
                partition_columns
                    .iter()
                    .map(|col| {
                        found
                            .iter()
                            .find(|(name, _)| name == col)
                            .map(|(_, value)| value.clone())
                            .ok_or_else(|| {
                                KflowError::Execution(format!(
                                    "file {} lacks partition directory for {col}",
                                    path.display()
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>>>()?
            };
            files.push(DatasetFile { path, partitions });
        }

        let mut fields = file_schema.fields().iter().cloned().collect::<Vec<_>>();
        fields.extend(
            partition_columns
                .iter()
                .map(|name| Arc::new(Field::new(name, DataType::Utf8, true))),
        );
        let schema = Arc::new(Schema::new(fields));
        info!(
            root = %root.display(),
            files = files.len(),
            partition_columns = ?partition_columns,
            "dataset discovered"
        );
        Ok(Self {
            fs,
            root,
            files,
            file_schema,
            schema,
            partition_columns,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn partition_columns(&self) -> &[String] {
        &self.partition_columns
    }

    fn read_file(&self, file: &DatasetFile, batch_size: usize) -> Result<Vec<RecordBatch>> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(self.fs.open(&file.path)?)
            .map_err(|e| KflowError::Execution(format!("parquet reader build failed: {e}")))?;
        if reader.schema().fields() != self.file_schema.fields() {
            return Err(KflowError::SchemaMismatch(format!(
                "file {} does not match the dataset schema",
                file.path.display()
            )));
        }
        let reader = reader
            .with_batch_size(batch_size)
            .build()
            .map_err(|e| KflowError::Execution(format!("parquet reader open failed: {e}")))?;

        let mut out = Vec::new();
        for batch in reader {
            let batch =
                batch.map_err(|e| KflowError::Execution(format!("parquet decode failed: {e}")))?;
            let rows = batch.num_rows();
            let mut columns = batch.columns().to_vec();
            columns.extend(file.partitions.iter().map(|value| partition_column(value, rows)));
            out.push(RecordBatch::try_new(self.schema.clone(), columns).map_err(|e| {
                KflowError::Execution(format!("dataset batch assembly failed: {e}"))
            })?);
        }
        Ok(out)
    }
}

impl ExecNode for DatasetScanNode {
    fn name(&self) -> &'static str {
        "DatasetScanNode"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn execute(&self, ctx: Arc<TaskContext>) -> Result<SendableRecordBatchStream> {
        let mut out = Vec::<Result<RecordBatch>>::new();
        for file in &self.files {
            match self.read_file(file, ctx.batch_size_rows) {
                Ok(batches) => out.extend(batches.into_iter().map(Ok)),
                Err(e) => {
                    out.push(Err(e));
                    break;
                }
            }
        }

        Ok(Box::pin(StreamAdapter::new(
            self.schema.clone(),
            futures::stream::iter(out),
        )))
    }
}

fn partition_column(value: &Option<String>, rows: usize) -> ArrayRef {
    match value {
        Some(v) => Arc::new(StringArray::from(vec![v.as_str(); rows])),
        None => new_null_array(&DataType::Utf8, rows),
    }
}

fn read_file_schema(fs: &dyn FileSystem, path: &Path) -> Result<SchemaRef> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(fs.open(path)?).map_err(|e| {
        KflowError::Execution(format!(
            "parquet metadata read failed for {}: {e}",
            path.display()
        ))
    })?;
    Ok(builder.schema().clone())
}

/// `.parquet` files outside hidden (`.`) or private (`_`) entries.
fn is_data_file(root: &Path, path: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    let visible = rel.components().all(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| !s.starts_with('.') && !s.starts_with('_'))
    });
    visible && path.extension().is_some_and(|ext| ext == "parquet")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_files_skip_hidden_and_staging_entries() {
        let root = PathBuf::from("/d");
        assert!(is_data_file(&root, &root.join("g=a/part0.parquet")));
        assert!(!is_data_file(&root, &root.join("g=a/.kflow_staged_x.tmp")));
        assert!(!is_data_file(&root, &root.join("_SUCCESS")));
        assert!(!is_data_file(&root, &root.join(".hidden/part0.parquet")));
        assert!(!is_data_file(&root, &root.join("notes.txt")));
    }

    #[test]
    fn missing_root_is_io_error() {
        let err = DatasetScanNode::try_new(
            Arc::new(LocalFileSystem),
            "/definitely/not/here/kflow",
            true,
        )
        .expect_err("missing");
        assert!(matches!(err, KflowError::Io(_)));
    }
}
