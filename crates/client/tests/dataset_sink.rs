use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, AsArray, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use futures::executor::block_on;
use kflow_client::Engine;
use kflow_common::{EngineConfig, ExistingDataBehavior, KflowError};
use kflow_planner::{DatasetWriteOptions, LogicalPlan, batches_source, open_dataset, write_dataset};
use kflow_storage::HIVE_DEFAULT_PARTITION;

mod support;

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("Group", DataType::Utf8, true),
        Field::new("Values", DataType::Int64, true),
    ]))
}

fn source(groups: Vec<Option<&str>>, values: Vec<i64>) -> LogicalPlan {
    let batch = RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(StringArray::from(groups)),
            Arc::new(Int64Array::from(values)),
        ],
    )
    .expect("batch");
    batches_source(schema(), vec![batch])
}

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("engine")
}

fn options(root: &Path) -> DatasetWriteOptions {
    engine().dataset_options(root.to_string_lossy().to_string(), vec!["Group".to_string()])
}

#[test]
fn writes_hive_layout_without_partition_columns() {
    let root = support::unique_path("kflow_sink_layout");
    let summary = block_on(engine().execute_to_dataset(
        source(vec![Some("b"), Some("a"), Some("b"), None], vec![1, 2, 3, 4]),
        options(&root),
    ))
    .expect("write");
    assert_eq!(summary.rows, 4);
    assert_eq!(summary.partitions, 3);
    assert_eq!(
        support::parquet_files(&root),
        vec![
            PathBuf::from(format!("Group={HIVE_DEFAULT_PARTITION}/part0.parquet")),
            PathBuf::from("Group=a/part0.parquet"),
            PathBuf::from("Group=b/part0.parquet"),
        ]
    );

    let batches = support::read_parquet(&root.join("Group=b/part0.parquet"));
    assert_eq!(batches[0].schema().fields().len(), 1);
    assert_eq!(batches[0].schema().field(0).name(), "Values");
    let values = batches
        .iter()
        .flat_map(|b| b.column(0).as_primitive::<arrow::datatypes::Int64Type>().values().to_vec())
        .collect::<Vec<_>>();
    assert_eq!(values, vec![1, 3]);
    std::fs::remove_dir_all(&root).expect("cleanup");
}

#[test]
fn written_dataset_scans_back_with_partition_column() {
    let root = support::unique_path("kflow_sink_roundtrip");
    block_on(engine().execute_to_dataset(
        source(vec![Some("x"), Some("y"), Some("x"), None], vec![10, 20, 30, 40]),
        options(&root),
    ))
    .expect("write");

    let table = block_on(engine().execute_to_table(open_dataset(
        root.to_string_lossy().to_string(),
    )))
    .expect("scan");
    let names = table
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Values".to_string(), "Group".to_string()]);
    assert_eq!(table.num_rows(), 4);

    let values = table.column_concat(0).expect("values");
    let groups = table.column_concat(1).expect("groups");
    let mut rows = (0..values.len())
        .map(|i| {
            let group = groups.is_valid(i).then(|| groups.as_string::<i32>().value(i).to_string());
            (group, values.as_primitive::<arrow::datatypes::Int64Type>().value(i))
        })
        .collect::<Vec<_>>();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (None, 40),
            (Some("x".to_string()), 10),
            (Some("x".to_string()), 30),
            (Some("y".to_string()), 20),
        ]
    );
    std::fs::remove_dir_all(&root).expect("cleanup");
}

#[test]
fn overwrite_or_ignore_replaces_colliding_files_only() {
    let root = support::unique_path("kflow_sink_overwrite");
    block_on(engine().execute_to_dataset(
        source(vec![Some("a"), Some("b")], vec![1, 2]),
        options(&root),
    ))
    .expect("first write");
    block_on(engine().execute_to_dataset(source(vec![Some("a")], vec![7]), options(&root)))
        .expect("second write");

    let a = support::read_parquet(&root.join("Group=a/part0.parquet"));
    assert_eq!(
        a[0].column(0).as_primitive::<arrow::datatypes::Int64Type>().value(0),
        7
    );
    assert!(root.join("Group=b/part0.parquet").exists());
    std::fs::remove_dir_all(&root).expect("cleanup");
}

#[test]
fn error_behavior_refuses_existing_data() {
    let root = support::unique_path("kflow_sink_error");
    block_on(engine().execute_to_dataset(source(vec![Some("a")], vec![1]), options(&root)))
        .expect("first write");
    let mut opts = options(&root);
    opts.existing_data_behavior = ExistingDataBehavior::Error;
    let err = block_on(engine().execute_to_dataset(source(vec![Some("a")], vec![2]), opts))
        .expect_err("existing data");
    assert!(matches!(err, KflowError::Io(_)), "{err:?}");
    std::fs::remove_dir_all(&root).expect("cleanup");
}

#[test]
fn delete_matching_partitions_clears_touched_directories() {
    let root = support::unique_path("kflow_sink_delete");
    let mut opts = options(&root);
    opts.max_rows_per_file = 1;
    block_on(engine().execute_to_dataset(
        source(vec![Some("a"), Some("a"), Some("b")], vec![1, 2, 3]),
        opts.clone(),
    ))
    .expect("first write");
    assert_eq!(support::parquet_files(&root).len(), 3);

    opts.max_rows_per_file = 0;
    opts.existing_data_behavior = ExistingDataBehavior::DeleteMatchingPartitions;
    block_on(engine().execute_to_dataset(source(vec![Some("a")], vec![9]), opts))
        .expect("second write");
    assert_eq!(
        support::parquet_files(&root),
        vec![
            PathBuf::from("Group=a/part0.parquet"),
            PathBuf::from("Group=b/part0.parquet"),
        ]
    );
    std::fs::remove_dir_all(&root).expect("cleanup");
}

#[test]
fn max_rows_per_file_splits_partitions() {
    let root = support::unique_path("kflow_sink_split");
    let mut opts = options(&root);
    opts.max_rows_per_file = 2;
    let summary = block_on(engine().execute_to_dataset(
        source(vec![Some("a"); 5], vec![1, 2, 3, 4, 5]),
        opts,
    ))
    .expect("write");
    assert_eq!(summary.files.len(), 3);
    assert_eq!(
        support::parquet_files(&root),
        vec![
            PathBuf::from("Group=a/part0.parquet"),
            PathBuf::from("Group=a/part1.parquet"),
            PathBuf::from("Group=a/part2.parquet"),
        ]
    );
    std::fs::remove_dir_all(&root).expect("cleanup");
}

#[test]
fn table_materialization_rejects_write_plans() {
    let root = support::unique_path("kflow_sink_reject");
    let plan = write_dataset(source(vec![Some("a")], vec![1]), options(&root));
    let err = block_on(engine().execute_to_table(plan)).expect_err("write root");
    assert!(matches!(err, KflowError::Planning(_)), "{err:?}");
    assert!(!root.exists());
}

#[test]
fn unknown_partition_column_fails() {
    let root = support::unique_path("kflow_sink_badcol");
    let opts = engine().dataset_options(root.to_string_lossy().to_string(), vec!["Nope".to_string()]);
    let err = block_on(engine().execute_to_dataset(source(vec![Some("a")], vec![1]), opts))
        .expect_err("bad column");
    assert!(matches!(err, KflowError::SchemaMismatch(_)), "{err:?}");
}

#[test]
fn empty_input_writes_no_files() {
    let root = support::unique_path("kflow_sink_empty");
    for batches in [Vec::new(), vec![RecordBatch::new_empty(schema())]] {
        let summary = block_on(
            engine().execute_to_dataset(batches_source(schema(), batches), options(&root)),
        )
        .expect("write");
        assert_eq!(summary.rows, 0);
        assert_eq!(summary.partitions, 0);
        assert!(summary.files.is_empty());
        assert!(support::parquet_files(&root).is_empty());
    }
    std::fs::remove_dir_all(&root).expect("cleanup");
}
