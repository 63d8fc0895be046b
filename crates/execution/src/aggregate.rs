//! Hash aggregation with `hash_count` and `tdigest` accumulators.
//!
//! Groups are keyed by the encoded scalar values of the group expressions and
//! emitted in ascending key order. An aggregate without group expressions is a
//! scalar aggregate: one row for non-empty input, zero rows for empty input.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use kflow_common::{KflowError, Result};
use kflow_planner::{AggExpr, Expr, TDigestOptions, fmt_expr};

use crate::context::TaskContext;
use crate::expressions::{PhysicalExpr, compile_expr};
use crate::operators::ExecOutput;
use crate::scalar::{ScalarValue, encode_group_key, scalar_from_array, scalars_to_array};
use crate::tdigest::TDigest;

struct AggSpec {
    name: String,
    input: Arc<dyn PhysicalExpr>,
    kind: AggKind,
    out_type: DataType,
}

enum AggKind {
    Count,
    TDigest(TDigestOptions),
}

#[derive(Debug, Clone)]
enum AggState {
    Count(i64),
    TDigest {
        digest: TDigest,
        values: u64,
        saw_null: bool,
    },
}

#[derive(Debug, Clone)]
struct GroupEntry {
    key: Vec<ScalarValue>,
    states: Vec<AggState>,
}

type GroupMap = HashMap<Vec<u8>, GroupEntry>;

pub fn run_hash_aggregate(
    child: ExecOutput,
    group_exprs: &[Expr],
    aggr_exprs: &[(AggExpr, String)],
    ctx: &TaskContext,
) -> Result<ExecOutput> {
    let input_schema = child.schema;
    let group_compiled = group_exprs
        .iter()
        .map(|e| compile_expr(e, &input_schema, ctx))
        .collect::<Result<Vec<_>>>()?;
    let specs = build_agg_specs(aggr_exprs, &input_schema, ctx)?;

    let mut groups: GroupMap = HashMap::new();
    for batch in &child.batches {
        accumulate_batch(&specs, &group_compiled, batch, &mut groups)?;
    }

    let mut fields = Vec::with_capacity(group_exprs.len() + specs.len());
    for (expr, compiled) in group_exprs.iter().zip(&group_compiled) {
        fields.push(Field::new(group_name(expr), compiled.data_type(), true));
    }
    for spec in &specs {
        fields.push(Field::new(&spec.name, spec.out_type.clone(), true));
    }
    build_output(groups, &specs, Arc::new(Schema::new(fields)))
}

fn build_agg_specs(
    aggr_exprs: &[(AggExpr, String)],
    input_schema: &SchemaRef,
    ctx: &TaskContext,
) -> Result<Vec<AggSpec>> {
    let mut specs = Vec::with_capacity(aggr_exprs.len());
    for (expr, name) in aggr_exprs {
        let spec = match expr {
            AggExpr::Count(e) => AggSpec {
                name: name.clone(),
                input: compile_expr(e, input_schema, ctx)?,
                kind: AggKind::Count,
                out_type: DataType::Int64,
            },
            AggExpr::TDigest { expr, options } => {
                if !(0.0..=1.0).contains(&options.q) {
                    return Err(KflowError::Planning(format!(
                        "tdigest quantile {} is outside [0, 1]",
                        options.q
                    )));
                }
                let input = compile_expr(expr, input_schema, ctx)?;
                let dt = input.data_type();
                if !dt.is_numeric() && dt != DataType::Null {
                    return Err(KflowError::Planning(format!(
                        "tdigest expects a numeric argument, got {dt:?}"
                    )));
                }
                AggSpec {
                    name: name.clone(),
                    input,
                    kind: AggKind::TDigest(options.clone()),
                    out_type: DataType::Float64,
                }
            }
        };
        specs.push(spec);
    }
    Ok(specs)
}

fn init_states(specs: &[AggSpec]) -> Vec<AggState> {
    specs
        .iter()
        .map(|s| match &s.kind {
            AggKind::Count => AggState::Count(0),
            AggKind::TDigest(o) => AggState::TDigest {
                digest: TDigest::new(o.delta, o.buffer_size),
                values: 0,
                saw_null: false,
            },
        })
        .collect()
}

fn accumulate_batch(
    specs: &[AggSpec],
    group_exprs: &[Arc<dyn PhysicalExpr>],
    batch: &RecordBatch,
    groups: &mut GroupMap,
) -> Result<()> {
    let group_arrays = group_exprs
        .iter()
        .map(|e| e.evaluate(batch))
        .collect::<Result<Vec<_>>>()?;
    let agg_arrays = specs
        .iter()
        .map(|s| {
            let array = s.input.evaluate(batch)?;
            let nulls = array.logical_nulls();
            Ok::<_, KflowError>((array, nulls))
        })
        .collect::<Result<Vec<_>>>()?;

    for row in 0..batch.num_rows() {
        let key = group_arrays
            .iter()
            .map(|a| scalar_from_array(a, row))
            .collect::<Result<Vec<_>>>()?;
        let encoded_key = encode_group_key(&key);
        let state_vec = &mut groups
            .entry(encoded_key)
            .or_insert_with(|| GroupEntry {
                key,
                states: init_states(specs),
            })
            .states;
        for (state, (array, nulls)) in state_vec.iter_mut().zip(&agg_arrays) {
            let valid = nulls.as_ref().map_or(true, |n| n.is_valid(row));
            update_state(state, array, valid, row)?;
        }
    }
    Ok(())
}

/// Counting only looks at validity, so any column type can be counted.
fn update_state(state: &mut AggState, array: &ArrayRef, valid: bool, row: usize) -> Result<()> {
    match state {
        AggState::Count(acc) => {
            if valid {
                *acc = acc
                    .checked_add(1)
                    .ok_or_else(|| KflowError::Execution("count overflow".to_string()))?;
            }
        }
        AggState::TDigest {
            digest,
            values,
            saw_null,
        } => {
            if !valid {
                *saw_null = true;
                return Ok(());
            }
            let value = scalar_from_array(array, row)?;
            match value.as_f64() {
                Some(v) => {
                    digest.add(v);
                    *values += 1;
                }
                None if value.is_null() => *saw_null = true,
                None => {
                    return Err(KflowError::Execution(format!(
                        "tdigest cannot consume {value:?}"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn state_to_scalar(state: &mut AggState, kind: &AggKind) -> ScalarValue {
    match (state, kind) {
        (AggState::Count(v), _) => ScalarValue::Int64(*v),
        (
            AggState::TDigest {
                digest,
                values,
                saw_null,
            },
            AggKind::TDigest(options),
        ) => {
            if (*saw_null && !options.skip_nulls) || *values < u64::from(options.min_count) {
                return ScalarValue::Null;
            }
            digest
                .quantile(options.q)
                .map_or(ScalarValue::Null, |q| ScalarValue::Float64Bits(q.to_bits()))
        }
        _ => ScalarValue::Null,
    }
}

fn build_output(groups: GroupMap, specs: &[AggSpec], schema: SchemaRef) -> Result<ExecOutput> {
    if groups.is_empty() {
        return Ok(ExecOutput {
            schema,
            batches: Vec::new(),
        });
    }
    let mut entries = groups.into_values().collect::<Vec<_>>();
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    let key_width = schema.fields().len() - specs.len();
    let mut cols = vec![Vec::with_capacity(entries.len()); schema.fields().len()];
    for mut entry in entries {
        for (gidx, value) in entry.key.drain(..).enumerate() {
            cols[gidx].push(value);
        }
        for (aidx, spec) in specs.iter().enumerate() {
            cols[key_width + aidx].push(state_to_scalar(&mut entry.states[aidx], &spec.kind));
        }
    }

    let arrays = cols
        .iter()
        .enumerate()
        .map(|(idx, col)| scalars_to_array(col, schema.field(idx).data_type()))
        .collect::<Result<Vec<_>>>()?;
    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| KflowError::Execution(format!("aggregate output batch failed: {e}")))?;
    Ok(ExecOutput {
        schema,
        batches: vec![batch],
    })
}

fn group_name(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => name.clone(),
        e => fmt_expr(e),
    }
}
