//! Hive-partitioned parquet dataset writer.
//!
//! Rows are grouped by the partition columns into `root/<col>=<value>/...`
//! directories; partition columns are dropped from the file contents. Each
//! file is staged next to its target and moved into place once closed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::UInt32Array;
use arrow::compute::take;
use arrow::record_batch::RecordBatch;
use arrow_schema::{Schema, SchemaRef};
use kflow_common::{ExistingDataBehavior, KflowError, Result};
use kflow_planner::DatasetWriteOptions;
use parquet::arrow::ArrowWriter;
use tracing::{debug, info};

use crate::filesystem::{FileSystem, replace_file_atomically, resolve_uri, temp_sibling_path};
use crate::partitioning::{partition_segment, partition_value_string};

const FILE_COUNTER: &str = "{i}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetWriteSummary {
    pub root: PathBuf,
    /// Written files in write order.
    pub files: Vec<PathBuf>,
    pub rows: u64,
    /// Number of distinct partition directories that received data.
    pub partitions: usize,
}

type PartitionKey = Vec<Option<String>>;

/// Write `batches` as a partitioned dataset described by `options`.
pub fn write_dataset(
    fs: &dyn FileSystem,
    schema: &SchemaRef,
    batches: &[RecordBatch],
    options: &DatasetWriteOptions,
) -> Result<DatasetWriteSummary> {
    let root = resolve_uri(&options.base_dir)?;
    if !options.basename_template.contains(FILE_COUNTER) {
        return Err(KflowError::InvalidConfig(format!(
            "basename_template {:?} must contain {FILE_COUNTER}",
            options.basename_template
        )));
    }
    let partition_indices = options
        .partition_by
        .iter()
        .map(|col| {
            schema.index_of(col).map_err(|_| {
                KflowError::SchemaMismatch(format!("partition column {col} not found in output"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let data_indices = (0..schema.fields().len())
        .filter(|i| !partition_indices.contains(i))
        .collect::<Vec<_>>();
    if data_indices.is_empty() {
        return Err(KflowError::InvalidConfig(
            "every column is a partition column; files would be empty".to_string(),
        ));
    }
    let file_schema = Arc::new(Schema::new(
        data_indices
            .iter()
            .map(|i| schema.field(*i).clone())
            .collect::<Vec<_>>(),
    ));

    if options.existing_data_behavior == ExistingDataBehavior::Error
        && fs.exists(&root)
        && !fs.list_files_recursive(&root)?.is_empty()
    {
        return Err(KflowError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("dataset root {} already contains data", root.display()),
        )));
    }
    fs.create_dir_all(&root)?;

    let groups = group_rows(batches, &partition_indices, &data_indices, &file_schema)?;
    let mut summary = DatasetWriteSummary {
        root: root.clone(),
        files: Vec::new(),
        rows: 0,
        partitions: groups.len(),
    };
    for (key, parts) in groups {
        let dir = key
            .iter()
            .zip(&options.partition_by)
            .fold(root.clone(), |dir, (value, col)| {
                dir.join(partition_segment(col, value.as_deref()))
            });
        if options.existing_data_behavior == ExistingDataBehavior::DeleteMatchingPartitions
            && fs.exists(&dir)
        {
            debug!(dir = %dir.display(), "clearing partition before write");
            fs.remove_dir_all(&dir)?;
        }
        fs.create_dir_all(&dir)?;

        for (counter, chunk) in chunk_batches(parts, options.max_rows_per_file)
            .into_iter()
            .enumerate()
        {
            let name = options
                .basename_template
                .replace(FILE_COUNTER, &counter.to_string());
            let target = dir.join(name);
            summary.rows += write_parquet_file(fs, &target, &file_schema, &chunk)?;
            summary.files.push(target);
        }
    }

    info!(
        root = %root.display(),
        files = summary.files.len(),
        rows = summary.rows,
        partitions = summary.partitions,
        "dataset written"
    );
    Ok(summary)
}

/// Split every batch by partition key, keeping only the data columns.
fn group_rows(
    batches: &[RecordBatch],
    partition_indices: &[usize],
    data_indices: &[usize],
    file_schema: &SchemaRef,
) -> Result<BTreeMap<PartitionKey, Vec<RecordBatch>>> {
    let mut groups = BTreeMap::<PartitionKey, Vec<RecordBatch>>::new();
    for batch in batches.iter().filter(|b| b.num_rows() > 0) {
        if partition_indices.is_empty() {
            let columns = data_indices
                .iter()
                .map(|i| batch.column(*i).clone())
                .collect::<Vec<_>>();
            let projected = RecordBatch::try_new(file_schema.clone(), columns)
                .map_err(|e| KflowError::Execution(format!("dataset projection failed: {e}")))?;
            groups.entry(Vec::new()).or_default().push(projected);
            continue;
        }

        let mut rows_by_key = BTreeMap::<PartitionKey, Vec<u32>>::new();
        for row in 0..batch.num_rows() {
            let key = partition_indices
                .iter()
                .map(|i| partition_value_string(batch.column(*i), row))
                .collect::<Result<PartitionKey>>()?;
            rows_by_key.entry(key).or_default().push(row as u32);
        }
        for (key, rows) in rows_by_key {
            let indices = UInt32Array::from(rows);
            let columns = data_indices
                .iter()
                .map(|i| take(batch.column(*i).as_ref(), &indices, None))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| KflowError::Execution(format!("partition take failed: {e}")))?;
            let part = RecordBatch::try_new(file_schema.clone(), columns)
                .map_err(|e| KflowError::Execution(format!("partition batch failed: {e}")))?;
            groups.entry(key).or_default().push(part);
        }
    }
    Ok(groups)
}

/// Group batches into files of at most `max_rows` rows; 0 means one file.
fn chunk_batches(batches: Vec<RecordBatch>, max_rows: usize) -> Vec<Vec<RecordBatch>> {
    if max_rows == 0 {
        return vec![batches];
    }
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut rows = 0;
    for batch in batches {
        let mut offset = 0;
        while offset < batch.num_rows() {
            let len = (max_rows - rows).min(batch.num_rows() - offset);
            current.push(batch.slice(offset, len));
            offset += len;
            rows += len;
            if rows == max_rows {
                chunks.push(std::mem::take(&mut current));
                rows = 0;
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn write_parquet_file(
    fs: &dyn FileSystem,
    target: &Path,
    schema: &SchemaRef,
    batches: &[RecordBatch],
) -> Result<u64> {
    let staged = temp_sibling_path(target, "staged");
    let file = fs.create(&staged)?;
    let result = (|| -> Result<()> {
        let mut writer = ArrowWriter::try_new(file, schema.clone(), None)
            .map_err(|e| KflowError::Execution(format!("parquet writer init failed: {e}")))?;
        for batch in batches {
            writer
                .write(batch)
                .map_err(|e| KflowError::Execution(format!("parquet write failed: {e}")))?;
        }
        writer
            .close()
            .map_err(|e| KflowError::Execution(format!("parquet writer close failed: {e}")))?;
        replace_file_atomically(fs, &staged, target)
    })();
    if let Err(err) = result {
        let _ = fs.remove_file(&staged);
        return Err(err);
    }
    Ok(batches.iter().map(|b| b.num_rows() as u64).sum())
}
