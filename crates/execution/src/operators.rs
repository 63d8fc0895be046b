//! Batch-at-a-time filter and projection over fully materialized inputs.

use std::sync::Arc;

use arrow::array::{Array, BooleanArray};
use arrow::compute::{filter_record_batch, prep_null_mask_filter};
use arrow::record_batch::RecordBatch;
use arrow_schema::{Field, Schema, SchemaRef};
use kflow_common::{KflowError, Result};
use kflow_planner::Expr;

use crate::context::TaskContext;
use crate::expressions::compile_expr;

/// Materialized output of one plan node.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl ExecOutput {
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// `(rows, batches, bytes)` across `batches`.
pub fn batch_stats(batches: &[RecordBatch]) -> (u64, u64, u64) {
    let rows = batches.iter().map(|b| b.num_rows() as u64).sum::<u64>();
    let batch_count = batches.len() as u64;
    let bytes = batches
        .iter()
        .map(|b| {
            b.columns()
                .iter()
                .map(|a| a.get_array_memory_size() as u64)
                .sum::<u64>()
        })
        .sum::<u64>();
    (rows, batch_count, bytes)
}

/// Keep rows where `predicate` is true; null counts as false.
pub fn run_filter(child: ExecOutput, predicate: &Expr, ctx: &TaskContext) -> Result<ExecOutput> {
    let pred = compile_expr(predicate, &child.schema, ctx)?;
    let mut out = Vec::with_capacity(child.batches.len());
    for batch in &child.batches {
        let mask = pred.evaluate(batch)?;
        let mask = mask
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| {
                KflowError::Execution("filter predicate must evaluate to boolean".to_string())
            })?;
        let filtered = if mask.null_count() > 0 {
            filter_record_batch(batch, &prep_null_mask_filter(mask))
        } else {
            filter_record_batch(batch, mask)
        }
        .map_err(|e| KflowError::Execution(format!("filter batch failed: {e}")))?;
        out.push(filtered);
    }
    Ok(ExecOutput {
        schema: child.schema,
        batches: out,
    })
}

/// Evaluate `(expr, name)` pairs into a new schema.
pub fn run_project(
    child: ExecOutput,
    exprs: &[(Expr, String)],
    ctx: &TaskContext,
) -> Result<ExecOutput> {
    if exprs.is_empty() {
        return Err(KflowError::Planning(
            "projection needs at least one expression".to_string(),
        ));
    }
    let compiled = exprs
        .iter()
        .map(|(expr, _)| compile_expr(expr, &child.schema, ctx))
        .collect::<Result<Vec<_>>>()?;
    let schema = Arc::new(Schema::new(
        exprs
            .iter()
            .zip(&compiled)
            .map(|((_, name), c)| Field::new(name, c.data_type(), true))
            .collect::<Vec<_>>(),
    ));
    let mut out_batches = Vec::with_capacity(child.batches.len());
    for batch in &child.batches {
        let cols = compiled
            .iter()
            .map(|c| c.evaluate(batch))
            .collect::<Result<Vec<_>>>()?;
        out_batches.push(RecordBatch::try_new(schema.clone(), cols).map_err(|e| {
            KflowError::Execution(format!("project build batch failed: {e}"))
        })?);
    }
    Ok(ExecOutput {
        schema,
        batches: out_batches,
    })
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, AsArray, Int64Array, StringArray};
    use arrow::datatypes::Int64Type;
    use arrow_schema::DataType;
    use kflow_planner::{BinaryOp, LiteralValue};

    use super::*;
    use crate::url_kernels::URL_EXTRACT_DICT;

    fn ctx() -> TaskContext {
        TaskContext::with_builtins().expect("context")
    }

    fn child() -> ExecOutput {
        let schema = Arc::new(Schema::new(vec![
            Field::new("Url", DataType::Utf8, true),
            Field::new("n", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![
                    Some("http://www.test.de"),
                    Some("not a url"),
                    None,
                ])),
                Arc::new(Int64Array::from(vec![Some(1), None, Some(3)])),
            ],
        )
        .expect("batch");
        ExecOutput {
            schema,
            batches: vec![batch],
        }
    }

    #[test]
    fn filter_drops_null_predicate_rows() {
        let pred = Expr::BinaryOp {
            left: Box::new(Expr::Column("n".to_string())),
            op: BinaryOp::Gt,
            right: Box::new(Expr::Literal(LiteralValue::Int64(0))),
        };
        let out = run_filter(child(), &pred, &ctx()).expect("filter");
        assert_eq!(out.num_rows(), 2);
        let n = out.batches[0].column(1).as_primitive::<Int64Type>();
        assert_eq!(n.values().to_vec(), vec![1, 3]);
    }

    #[test]
    fn filter_rejects_non_boolean_predicate() {
        let err = run_filter(child(), &Expr::Column("n".to_string()), &ctx())
            .expect_err("non boolean");
        assert!(matches!(err, KflowError::Execution(_)));
    }

    #[test]
    fn project_with_struct_kernel() {
        let exprs = vec![
            (Expr::Column("n".to_string()), "n".to_string()),
            (
                Expr::ScalarFunction {
                    name: URL_EXTRACT_DICT.to_string(),
                    args: vec![Expr::Column("Url".to_string())],
                    options: None,
                },
                "parsed".to_string(),
            ),
        ];
        let out = run_project(child(), &exprs, &ctx()).expect("project");
        assert!(matches!(
            out.schema.field(1).data_type(),
            DataType::Struct(fields) if fields.len() == 13
        ));
        let parsed = out.batches[0].column(1).as_struct();
        assert!(parsed.is_valid(0));
        assert!(parsed.is_null(1));
        assert!(parsed.is_null(2));
        let host = parsed
            .column_by_name("host")
            .expect("host")
            .as_string::<i32>();
        assert_eq!(host.value(0), "www.test.de");
    }

    #[test]
    fn empty_input_keeps_projected_schema() {
        let schema = child().schema;
        let out = run_project(
            ExecOutput::empty(schema),
            &[(Expr::Column("Url".to_string()), "u".to_string())],
            &ctx(),
        )
        .expect("project");
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.schema.field(0).name(), "u");
    }

    #[test]
    fn empty_input_keeps_filtered_schema() {
        let pred = Expr::BinaryOp {
            left: Box::new(Expr::Column("n".to_string())),
            op: BinaryOp::Gt,
            right: Box::new(Expr::Literal(LiteralValue::Int64(0))),
        };
        let schema = child().schema;
        let out = run_filter(ExecOutput::empty(schema.clone()), &pred, &ctx()).expect("filter");
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.schema, schema);

        let zero_rows = ExecOutput {
            schema: schema.clone(),
            batches: vec![RecordBatch::new_empty(schema.clone())],
        };
        let out = run_filter(zero_rows, &pred, &ctx()).expect("filter");
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.batches[0].schema(), schema);
    }
}
