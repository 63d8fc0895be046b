use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use futures::executor::block_on;
use kflow_client::sample::{GROUP_COLUMN, VALUES_COLUMN};
use kflow_client::{Engine, SampleConfig, sample_batches, sample_reader, sample_schema};
use kflow_common::{EngineConfig, KflowError};
use kflow_planner::{
    TDIGEST_COLUMN, batches_source, calc_quantile, filter_not_in_value_set, record_batch_source,
    values_with_count_at_least,
};

mod support;

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("engine")
}

fn sample_config() -> SampleConfig {
    SampleConfig {
        batches: 4,
        rows_per_batch: 500,
        seed: 7,
        null_every: 9,
    }
}

#[test]
fn high_quantile_of_group_counts_reaches_the_largest_group() {
    let config = sample_config();
    let exact = support::exact_counts(&sample_batches(&config).expect("sample"), 0, 1);
    let max = *exact.values().max().expect("groups") as f64;

    let plan = calc_quantile(
        record_batch_source(sample_reader(&config).expect("reader")),
        GROUP_COLUMN,
        VALUES_COLUMN,
        0.995,
    );
    let table = block_on(engine().execute_to_table(plan)).expect("execute");
    assert_eq!(table.num_rows(), 1);
    assert_eq!(table.schema().field(0).name(), TDIGEST_COLUMN);
    assert_eq!(table.schema().field(0).data_type(), &DataType::Float64);
    let threshold = table.to_f64_scalar().expect("scalar").expect("non-null");
    assert!((threshold - max).abs() < 1e-9, "{threshold} vs {max}");

    let expected = exact
        .iter()
        .filter(|(_, count)| **count as f64 >= threshold)
        .map(|(group, _)| Some(group.clone()))
        .collect::<Vec<_>>();
    let outliers = block_on(engine().execute_to_table(values_with_count_at_least(
        record_batch_source(sample_reader(&config).expect("reader")),
        GROUP_COLUMN,
        VALUES_COLUMN,
        threshold,
    )))
    .expect("threshold plan");
    assert_eq!(
        support::strings(outliers.column_concat(0).expect("keys").as_ref()),
        expected
    );
}

#[test]
fn median_of_group_counts_stays_within_observed_range() {
    let config = sample_config();
    let exact = support::exact_counts(&sample_batches(&config).expect("sample"), 0, 1);
    let min = *exact.values().min().expect("groups") as f64;
    let max = *exact.values().max().expect("groups") as f64;

    let plan = calc_quantile(
        record_batch_source(sample_reader(&config).expect("reader")),
        GROUP_COLUMN,
        VALUES_COLUMN,
        0.5,
    );
    let median = block_on(engine().execute_to_table(plan))
        .expect("execute")
        .to_f64_scalar()
        .expect("scalar")
        .expect("non-null");
    assert!(median >= min && median <= max, "{median} outside [{min}, {max}]");
}

#[test]
fn threshold_filter_then_exclusion_removes_exactly_the_heavy_groups() {
    let config = sample_config();
    let batches = sample_batches(&config).expect("sample");
    let exact = support::exact_counts(&batches, 0, 1);
    let threshold = 250.0;
    let heavy = exact
        .iter()
        .filter(|(_, count)| **count as f64 >= threshold)
        .map(|(group, _)| Some(group.clone()))
        .collect::<Vec<_>>();
    assert!(!heavy.is_empty() && heavy.len() < exact.len());

    let engine = engine();
    let outliers = block_on(engine.execute_to_table(values_with_count_at_least(
        record_batch_source(sample_reader(&config).expect("reader")),
        GROUP_COLUMN,
        VALUES_COLUMN,
        threshold,
    )))
    .expect("threshold plan");
    assert_eq!(outliers.schema().fields().len(), 1);
    assert_eq!(outliers.schema().field(0).name(), GROUP_COLUMN);
    let blacklist = outliers.column_concat(0).expect("concat");
    assert_eq!(support::strings(blacklist.as_ref()), heavy);

    let remaining = block_on(engine.execute_to_table(filter_not_in_value_set(
        record_batch_source(sample_reader(&config).expect("reader")),
        GROUP_COLUMN,
        blacklist,
    )))
    .expect("exclusion plan");
    assert_eq!(remaining.schema(), sample_schema());

    let heavy_names = heavy.into_iter().flatten().collect::<Vec<_>>();
    let expected_rows = batches
        .iter()
        .map(|b| {
            b.column(0)
                .as_string::<i32>()
                .iter()
                .flatten()
                .filter(|g| !heavy_names.iter().any(|h| h == g))
                .count()
        })
        .sum::<usize>();
    assert_eq!(remaining.num_rows(), expected_rows);
    for batch in remaining.batches() {
        for group in batch.column(0).as_string::<i32>().iter().flatten() {
            assert!(!heavy_names.iter().any(|h| h == group), "{group} survived");
        }
    }
}

#[test]
fn exclusion_keeps_null_keys_unless_the_set_holds_null() {
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Utf8, true),
        Field::new("v", DataType::Int64, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(vec![Some("a"), None, Some("b")])),
            Arc::new(Int64Array::from(vec![1, 2, 3])),
        ],
    )
    .expect("batch");
    let engine = engine();
    let run = |set: ArrayRef| {
        block_on(engine.execute_to_table(filter_not_in_value_set(
            batches_source(schema.clone(), vec![batch.clone()]),
            "k",
            set,
        )))
        .expect("execute")
    };

    let without_null = run(Arc::new(StringArray::from(vec!["a"])));
    assert_eq!(
        support::strings(without_null.column_concat(0).expect("k").as_ref()),
        vec![None, Some("b".to_string())]
    );

    let with_null = run(Arc::new(StringArray::from(vec![Some("a"), None])));
    assert_eq!(
        support::strings(with_null.column_concat(0).expect("k").as_ref()),
        vec![Some("b".to_string())]
    );
}

#[test]
fn empty_input_yields_empty_quantile_table() {
    let plan = calc_quantile(
        batches_source(sample_schema(), Vec::new()),
        GROUP_COLUMN,
        VALUES_COLUMN,
        0.995,
    );
    let table = block_on(engine().execute_to_table(plan)).expect("execute");
    assert_eq!(table.num_rows(), 0);
    assert_eq!(table.schema().field(0).name(), TDIGEST_COLUMN);
    assert_eq!(table.to_f64_scalar().expect("scalar"), None);
    assert_eq!(table.column_concat(0).expect("concat").len(), 0);
}

#[test]
fn unknown_column_surfaces_at_materialization() {
    let plan = calc_quantile(
        record_batch_source(sample_reader(&sample_config()).expect("reader")),
        "NoSuchGroup",
        VALUES_COLUMN,
        0.995,
    );
    let err = block_on(engine().execute_to_table(plan)).expect_err("missing column");
    assert!(matches!(err, KflowError::SchemaMismatch(_)), "{err:?}");
}

#[test]
fn operator_metrics_are_rendered() {
    let engine = engine();
    let plan = calc_quantile(
        record_batch_source(sample_reader(&sample_config()).expect("reader")),
        GROUP_COLUMN,
        VALUES_COLUMN,
        0.995,
    );
    block_on(engine.execute_to_table(plan)).expect("execute");
    let text = engine.prometheus_metrics();
    assert!(text.contains("Aggregate"), "{text}");
    assert!(text.contains("Source"), "{text}");
}

#[test]
fn explain_lists_both_aggregate_stages() {
    let plan = calc_quantile(
        batches_source(sample_schema(), Vec::new()),
        GROUP_COLUMN,
        VALUES_COLUMN,
        0.995,
    );
    let text = engine().explain(&plan);
    assert_eq!(text.matches("Aggregate").count(), 2, "{text}");
    assert!(text.contains(TDIGEST_COLUMN), "{text}");
}

#[test]
fn column_concat_rejects_out_of_range_index() {
    let table = block_on(engine().execute_to_table(batches_source(sample_schema(), Vec::new())))
        .expect("execute");
    assert!(table.column_concat(0).expect("concat").is_empty());
    assert!(matches!(
        table.column_concat(9),
        Err(KflowError::SchemaMismatch(_))
    ));
}
