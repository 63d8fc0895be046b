//! Plan-node constructors.
//!
//! Builders are pure: they take the predecessor plan by value, append nodes and
//! return the extended plan. Column names are not checked here; an unknown
//! column surfaces as [`kflow_common::KflowError::SchemaMismatch`] when the plan
//! is materialized.

use arrow::array::ArrayRef;
use arrow::record_batch::{RecordBatch, RecordBatchIterator, RecordBatchReader};
use arrow_schema::{SchemaRef, TimeUnit};

use crate::function_options::FunctionOptionsRef;
use crate::logical_plan::{
    AggExpr, BinaryOp, DatasetWriteOptions, Expr, LiteralValue, LogicalPlan, NodeKind, ScanNode,
    SourceNode, TDigestOptions,
};

/// Output column of the second `calc_quantile` stage.
pub const TDIGEST_COLUMN: &str = "tdigest";
/// Output column of the `values_with_count_at_least` count stage.
pub const COUNT_COLUMN: &str = "count";

/// Timestamp layout of the sample `Date` column, e.g. `2024-03-01T12:30:45 UTC`.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S %Z";

/// Name of the per-group count column produced by [`calc_quantile`].
pub fn count_column_name(value: &str) -> String {
    format!("count({value})")
}

pub fn record_batch_source(reader: Box<dyn RecordBatchReader + Send>) -> LogicalPlan {
    LogicalPlan::leaf(NodeKind::Source(SourceNode::new(reader)))
}

/// Source over already materialized batches. Every batch must match `schema`.
pub fn batches_source(schema: SchemaRef, batches: Vec<RecordBatch>) -> LogicalPlan {
    let reader = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
    record_batch_source(Box::new(reader))
}

/// Scan a hive-partitioned parquet dataset rooted at `uri`.
pub fn open_dataset(uri: impl Into<String>) -> LogicalPlan {
    LogicalPlan::leaf(NodeKind::Scan(ScanNode {
        uri: uri.into(),
        hive_partitioning: true,
    }))
}

/// Two-stage quantile of per-group counts.
///
/// Stage one counts non-null `value`s per `key` into `count(<value>)`; stage
/// two reduces those counts to a single `Float64` row named `tdigest`.
pub fn calc_quantile(prev: LogicalPlan, key: &str, value: &str, quantile: f64) -> LogicalPlan {
    calc_quantile_with_options(
        prev,
        key,
        value,
        TDigestOptions {
            q: quantile,
            ..TDigestOptions::default()
        },
    )
}

pub fn calc_quantile_with_options(
    prev: LogicalPlan,
    key: &str,
    value: &str,
    options: TDigestOptions,
) -> LogicalPlan {
    let counts = count_per_group(prev, key, value, &count_column_name(value));
    counts.push(NodeKind::Aggregate {
        group_exprs: Vec::new(),
        aggr_exprs: vec![(
            AggExpr::TDigest {
                expr: Expr::Column(count_column_name(value)),
                options,
            },
            TDIGEST_COLUMN.to_string(),
        )],
    })
}

/// Keys whose non-null `value` count is at least `threshold`, as a single
/// `key` column.
pub fn values_with_count_at_least(
    prev: LogicalPlan,
    key: &str,
    value: &str,
    threshold: f64,
) -> LogicalPlan {
    count_per_group(prev, key, value, COUNT_COLUMN)
        .push(NodeKind::Filter {
            predicate: Expr::BinaryOp {
                left: Box::new(Expr::Column(COUNT_COLUMN.to_string())),
                op: BinaryOp::GtEq,
                right: Box::new(Expr::Literal(LiteralValue::Float64(threshold))),
            },
        })
        .push(NodeKind::Projection {
            exprs: vec![(Expr::Column(key.to_string()), key.to_string())],
        })
}

/// Drop rows whose `column` value is a member of `value_set`.
///
/// Null keys survive unless `value_set` itself holds a null.
pub fn filter_not_in_value_set(prev: LogicalPlan, column: &str, value_set: ArrayRef) -> LogicalPlan {
    prev.push(NodeKind::Filter {
        predicate: Expr::Not(Box::new(Expr::InList {
            expr: Box::new(Expr::Column(column.to_string())),
            values: value_set,
            negated: false,
        })),
    })
}

/// Keep rows whose `column` contains a match of `pattern`.
pub fn filter_by_regex(prev: LogicalPlan, column: &str, pattern: &str) -> LogicalPlan {
    prev.push(NodeKind::Filter {
        predicate: Expr::RegexMatch {
            expr: Box::new(Expr::Column(column.to_string())),
            pattern: pattern.to_string(),
        },
    })
}

/// Project `keep` followed by `column` with `pattern` matches replaced.
///
/// The rewritten column keeps its name, so `keep` should not list `column`.
pub fn replace_by_regex(
    prev: LogicalPlan,
    keep: &[&str],
    column: &str,
    pattern: &str,
    replacement: &str,
    max_replacements: Option<usize>,
) -> LogicalPlan {
    let mut exprs = keep_columns(keep);
    exprs.push((
        Expr::RegexReplace {
            expr: Box::new(Expr::Column(column.to_string())),
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            max_replacements,
        },
        column.to_string(),
    ));
    prev.push(NodeKind::Projection { exprs })
}

/// Project `keep` followed by `function(column)` named `projected`.
pub fn project_with_kernel(
    prev: LogicalPlan,
    keep: &[&str],
    column: &str,
    projected: &str,
    function: &str,
    options: Option<FunctionOptionsRef>,
) -> LogicalPlan {
    let mut exprs = keep_columns(keep);
    exprs.push((
        Expr::ScalarFunction {
            name: function.to_string(),
            args: vec![Expr::Column(column.to_string())],
            options,
        },
        projected.to_string(),
    ));
    prev.push(NodeKind::Projection { exprs })
}

/// Project `column` alone, parsed into `Timestamp(unit)`.
///
/// A value that does not match `format` fails the plan.
pub fn parse_date(prev: LogicalPlan, column: &str, format: &str, unit: TimeUnit) -> LogicalPlan {
    prev.push(NodeKind::Projection {
        exprs: vec![(
            Expr::Strptime {
                expr: Box::new(Expr::Column(column.to_string())),
                format: format.to_string(),
                unit,
                error_is_null: false,
            },
            column.to_string(),
        )],
    })
}

pub fn write_dataset(prev: LogicalPlan, options: DatasetWriteOptions) -> LogicalPlan {
    prev.push(NodeKind::Write(options))
}

fn count_per_group(prev: LogicalPlan, key: &str, value: &str, output: &str) -> LogicalPlan {
    prev.push(NodeKind::Aggregate {
        group_exprs: vec![Expr::Column(key.to_string())],
        aggr_exprs: vec![(
            AggExpr::Count(Expr::Column(value.to_string())),
            output.to_string(),
        )],
    })
}

fn keep_columns(keep: &[&str]) -> Vec<(Expr, String)> {
    keep.iter()
        .map(|c| (Expr::Column((*c).to_string()), (*c).to_string()))
        .collect()
}
