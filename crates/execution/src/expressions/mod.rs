//! Expression compilation and evaluation for plan operators.
//!
//! Input contract:
//! - columns are referenced by name and resolved against the operator's input schema;
//! - a name missing from the schema is a [`KflowError::SchemaMismatch`].
//!
//! Output contract:
//! - each evaluation returns an `ArrayRef` aligned to input batch row count.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, BooleanBuilder, Float64Builder, GenericStringArray,
    Int64Builder, OffsetSizeTrait, StringBuilder, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::compute::can_cast_types;
use arrow::compute::kernels::{
    boolean::{and_kleene, not, or_kleene},
    cast::cast,
    cmp::{eq, gt, gt_eq, lt, lt_eq, neq},
    numeric::{add, div, mul, sub},
};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, SchemaRef, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use kflow_common::{KflowError, MetricsRegistry, Result};
use kflow_planner::{BinaryOp, Expr, FunctionOptionsRef, LiteralValue};
use regex::Regex;

use crate::context::TaskContext;
use crate::registry::FunctionRegistry;
use crate::scalar::{ScalarValue, scalar_from_array};

/// Executable expression.
///
/// Plan operators hold `Expr` trees; execution compiles them once per
/// operator against the input schema and evaluates them batch by batch.
pub trait PhysicalExpr: Send + Sync {
    /// Static output data type of this expression.
    fn data_type(&self) -> DataType;
    /// Evaluate the expression for every row in `batch`.
    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef>;
}

/// Compile a plan expression into a runnable expression.
pub fn compile_expr(
    expr: &Expr,
    input_schema: &SchemaRef,
    ctx: &TaskContext,
) -> Result<Arc<dyn PhysicalExpr>> {
    match expr {
        Expr::Column(name) => {
            let idx = input_schema
                .fields()
                .iter()
                .position(|f| f.name() == name)
                .ok_or_else(|| {
                    let available = input_schema
                        .fields()
                        .iter()
                        .map(|f| f.name().as_str())
                        .collect::<Vec<_>>();
                    KflowError::SchemaMismatch(format!(
                        "column {name} not found in input [{}]",
                        available.join(", ")
                    ))
                })?;
            let dt = input_schema.field(idx).data_type().clone();
            Ok(Arc::new(ColumnExpr { index: idx, dt }))
        }

        Expr::Literal(v) => Ok(Arc::new(LiteralExpr {
            v: v.clone(),
            dt: literal_type(v),
        })),

        Expr::Cast { expr, to_type } => {
            let inner = compile_expr(expr, input_schema, ctx)?;
            cast_to(inner, to_type)
        }

        Expr::Not(e) => {
            let inner = compile_expr(e, input_schema, ctx)?;
            Ok(Arc::new(NotExpr { inner }))
        }

        Expr::And(a, b) => {
            let left = compile_expr(a, input_schema, ctx)?;
            let right = compile_expr(b, input_schema, ctx)?;
            Ok(Arc::new(BoolBinaryExpr {
                left,
                right,
                op: BoolOp::And,
            }))
        }

        Expr::Or(a, b) => {
            let left = compile_expr(a, input_schema, ctx)?;
            let right = compile_expr(b, input_schema, ctx)?;
            Ok(Arc::new(BoolBinaryExpr {
                left,
                right,
                op: BoolOp::Or,
            }))
        }

        Expr::BinaryOp { left, op, right } => {
            let l = compile_expr(left, input_schema, ctx)?;
            let r = compile_expr(right, input_schema, ctx)?;
            let (l, r) = coerce_pair(l, r)?;
            let out = binary_out_type(*op, l.data_type())?;

            Ok(Arc::new(BinaryExpr {
                left: l,
                right: r,
                op: *op,
                out,
            }))
        }

        Expr::InList {
            expr,
            values,
            negated,
        } => {
            let inner = compile_expr(expr, input_schema, ctx)?;
            let dt = inner.data_type();
            let values = cast(values, &dt).map_err(|e| {
                KflowError::Planning(format!("value set is not comparable with {dt:?}: {e}"))
            })?;
            let set = (0..values.len())
                .map(|row| scalar_from_array(&values, row))
                .collect::<Result<HashSet<_>>>()?;
            Ok(Arc::new(InListExpr {
                inner,
                set,
                negated: *negated,
            }))
        }

        Expr::RegexMatch { expr, pattern } => {
            let inner = compile_expr(expr, input_schema, ctx)?;
            expect_string(&inner.data_type(), "match_substring_regex")?;
            Ok(Arc::new(RegexMatchExpr {
                inner,
                regex: compile_regex(pattern)?,
            }))
        }

        Expr::RegexReplace {
            expr,
            pattern,
            replacement,
            max_replacements,
        } => {
            let inner = compile_expr(expr, input_schema, ctx)?;
            expect_string(&inner.data_type(), "replace_substring_regex")?;
            Ok(Arc::new(RegexReplaceExpr {
                inner,
                regex: compile_regex(pattern)?,
                replacement: replacement.clone(),
                max_replacements: *max_replacements,
            }))
        }

        Expr::Strptime {
            expr,
            format,
            unit,
            error_is_null,
        } => {
            let inner = compile_expr(expr, input_schema, ctx)?;
            expect_string(&inner.data_type(), "strptime")?;
            Ok(Arc::new(StrptimeExpr {
                inner,
                format: format.clone(),
                unit: *unit,
                error_is_null: *error_is_null,
            }))
        }

        Expr::ScalarFunction {
            name,
            args,
            options,
        } => {
            let compiled_args = args
                .iter()
                .map(|a| compile_expr(a, input_schema, ctx))
                .collect::<Result<Vec<_>>>()?;
            let function = ctx.registry.get_function(name)?;
            let out = function.return_type(
                &compiled_args
                    .iter()
                    .map(|arg| arg.data_type())
                    .collect::<Vec<_>>(),
            )?;
            Ok(Arc::new(ScalarFunctionExpr {
                name: function.name().to_string(),
                registry: Arc::clone(&ctx.registry),
                metrics: ctx.metrics.clone(),
                args: compiled_args,
                options: options.clone(),
                out,
            }))
        }
    }
}

// =====================
// Standard expressions
// =====================

struct ColumnExpr {
    index: usize,
    dt: DataType,
}

impl PhysicalExpr for ColumnExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        Ok(batch.column(self.index).clone())
    }
}

struct LiteralExpr {
    v: LiteralValue,
    dt: DataType,
}

impl PhysicalExpr for LiteralExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        scalar_to_array(&self.v, batch.num_rows())
    }
}

struct CastExpr {
    inner: Arc<dyn PhysicalExpr>,
    to_type: DataType,
}

impl PhysicalExpr for CastExpr {
    fn data_type(&self) -> DataType {
        self.to_type.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        cast(&arr, &self.to_type).map_err(|e| KflowError::Execution(format!("cast failed: {e}")))
    }
}

struct NotExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for NotExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let b = arr
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| KflowError::Execution("NOT expects boolean".to_string()))?;

        let out = not(b).map_err(|e| KflowError::Execution(format!("not failed: {e}")))?;
        Ok(Arc::new(out))
    }
}

#[derive(Clone, Copy)]
enum BoolOp {
    And,
    Or,
}

struct BoolBinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BoolOp,
}

impl PhysicalExpr for BoolBinaryExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let r = self.right.evaluate(batch)?;

        let lb = l
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| KflowError::Execution("AND/OR expects boolean".to_string()))?;
        let rb = r
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| KflowError::Execution("AND/OR expects boolean".to_string()))?;

        let out = match self.op {
            BoolOp::And => and_kleene(lb, rb),
            BoolOp::Or => or_kleene(lb, rb),
        }
        .map_err(|e| KflowError::Execution(format!("boolean kernel failed: {e}")))?;

        Ok(Arc::new(out))
    }
}

struct BinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BinaryOp,
    out: DataType,
}

impl PhysicalExpr for BinaryExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let r = self.right.evaluate(batch)?;

        let res = match self.op {
            BinaryOp::Plus => add(&l, &r),
            BinaryOp::Minus => sub(&l, &r),
            BinaryOp::Multiply => mul(&l, &r),
            BinaryOp::Divide => div(&l, &r),
            BinaryOp::Eq => eq(&l, &r).map(to_ref),
            BinaryOp::NotEq => neq(&l, &r).map(to_ref),
            BinaryOp::Lt => lt(&l, &r).map(to_ref),
            BinaryOp::LtEq => lt_eq(&l, &r).map(to_ref),
            BinaryOp::Gt => gt(&l, &r).map(to_ref),
            BinaryOp::GtEq => gt_eq(&l, &r).map(to_ref),
        };
        res.map_err(|e| KflowError::Execution(format!("{:?} kernel failed: {e}", self.op)))
    }
}

fn to_ref(b: BooleanArray) -> ArrayRef {
    Arc::new(b)
}

/// Set membership. A null row is a member iff the set holds a null; the
/// output itself never contains nulls.
struct InListExpr {
    inner: Arc<dyn PhysicalExpr>,
    set: HashSet<ScalarValue>,
    negated: bool,
}

impl PhysicalExpr for InListExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let mut out = BooleanBuilder::with_capacity(arr.len());
        for row in 0..arr.len() {
            let member = self.set.contains(&scalar_from_array(&arr, row)?);
            out.append_value(member != self.negated);
        }
        Ok(Arc::new(out.finish()))
    }
}

struct RegexMatchExpr {
    inner: Arc<dyn PhysicalExpr>,
    regex: Regex,
}

impl PhysicalExpr for RegexMatchExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let out = match arr.data_type() {
            DataType::Utf8 => regex_match(arr.as_string::<i32>(), &self.regex),
            DataType::LargeUtf8 => regex_match(arr.as_string::<i64>(), &self.regex),
            other => {
                return Err(KflowError::Execution(format!(
                    "regex match expects a string column, got {other:?}"
                )));
            }
        };
        Ok(Arc::new(out))
    }
}

fn regex_match<O: OffsetSizeTrait>(arr: &GenericStringArray<O>, regex: &Regex) -> BooleanArray {
    arr.iter().map(|v| v.map(|s| regex.is_match(s))).collect()
}

struct RegexReplaceExpr {
    inner: Arc<dyn PhysicalExpr>,
    regex: Regex,
    replacement: String,
    max_replacements: Option<usize>,
}

impl RegexReplaceExpr {
    fn replace_all<O: OffsetSizeTrait>(&self, arr: &GenericStringArray<O>) -> ArrayRef {
        let out = arr
            .iter()
            .map(|v| v.map(|s| self.replace_one(s)))
            .collect::<GenericStringArray<O>>();
        Arc::new(out)
    }

    fn replace_one<'a>(&self, s: &'a str) -> Cow<'a, str> {
        match self.max_replacements {
            None => self.regex.replace_all(s, self.replacement.as_str()),
            Some(0) => Cow::Borrowed(s),
            Some(n) => self.regex.replacen(s, n, self.replacement.as_str()),
        }
    }
}

impl PhysicalExpr for RegexReplaceExpr {
    fn data_type(&self) -> DataType {
        self.inner.data_type()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        match arr.data_type() {
            DataType::Utf8 => Ok(self.replace_all(arr.as_string::<i32>())),
            DataType::LargeUtf8 => Ok(self.replace_all(arr.as_string::<i64>())),
            other => Err(KflowError::Execution(format!(
                "regex replace expects a string column, got {other:?}"
            ))),
        }
    }
}

struct StrptimeExpr {
    inner: Arc<dyn PhysicalExpr>,
    format: String,
    unit: TimeUnit,
    error_is_null: bool,
}

impl StrptimeExpr {
    fn parse_all<O: OffsetSizeTrait>(&self, arr: &GenericStringArray<O>) -> Result<ArrayRef> {
        let values = arr
            .iter()
            .map(|v| match v {
                None => Ok(None),
                Some(s) => match parse_timestamp(s, &self.format, self.unit) {
                    Some(ts) => Ok(Some(ts)),
                    None if self.error_is_null => Ok(None),
                    None => Err(KflowError::InvalidEncoding(format!(
                        "cannot parse {s:?} with format {:?}",
                        self.format
                    ))),
                },
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(match self.unit {
            TimeUnit::Second => Arc::new(TimestampSecondArray::from(values)),
            TimeUnit::Millisecond => Arc::new(TimestampMillisecondArray::from(values)),
            TimeUnit::Microsecond => Arc::new(TimestampMicrosecondArray::from(values)),
            TimeUnit::Nanosecond => Arc::new(TimestampNanosecondArray::from(values)),
        })
    }
}

impl PhysicalExpr for StrptimeExpr {
    fn data_type(&self) -> DataType {
        DataType::Timestamp(self.unit, None)
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        match arr.data_type() {
            DataType::Utf8 => self.parse_all(arr.as_string::<i32>()),
            DataType::LargeUtf8 => self.parse_all(arr.as_string::<i64>()),
            other => Err(KflowError::Execution(format!(
                "strptime expects a string column, got {other:?}"
            ))),
        }
    }
}

/// Values carrying an offset are normalized to UTC; zone names (`%Z`) are
/// skipped and the value is read as UTC. Date-only formats land on midnight.
fn parse_timestamp(s: &str, format: &str, unit: TimeUnit) -> Option<i64> {
    let naive = match DateTime::parse_from_str(s, format) {
        Ok(dt) => dt.naive_utc(),
        Err(_) => match NaiveDateTime::parse_from_str(s, format) {
            Ok(dt) => dt,
            Err(_) => NaiveDate::parse_from_str(s, format).ok()?.and_hms_opt(0, 0, 0)?,
        },
    };
    let utc = naive.and_utc();
    match unit {
        TimeUnit::Second => Some(utc.timestamp()),
        TimeUnit::Millisecond => Some(utc.timestamp_millis()),
        TimeUnit::Microsecond => Some(utc.timestamp_micros()),
        TimeUnit::Nanosecond => utc.timestamp_nanos_opt(),
    }
}

struct ScalarFunctionExpr {
    name: String,
    registry: Arc<FunctionRegistry>,
    metrics: MetricsRegistry,
    args: Vec<Arc<dyn PhysicalExpr>>,
    options: Option<FunctionOptionsRef>,
    out: DataType,
}

impl PhysicalExpr for ScalarFunctionExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arrays = self
            .args
            .iter()
            .map(|arg| arg.evaluate(batch))
            .collect::<Result<Vec<_>>>()?;
        let out = self
            .registry
            .call_function(&self.name, &arrays, self.options.as_ref())?;
        self.metrics
            .record_kernel_call(&self.name, batch.num_rows() as u64);
        Ok(out)
    }
}

// ------------------ helpers ------------------

fn literal_type(v: &LiteralValue) -> DataType {
    match v {
        LiteralValue::Int64(_) => DataType::Int64,
        LiteralValue::Float64(_) => DataType::Float64,
        LiteralValue::Utf8(_) => DataType::Utf8,
        LiteralValue::Boolean(_) => DataType::Boolean,
        LiteralValue::Null => DataType::Null,
    }
}

fn scalar_to_array(v: &LiteralValue, len: usize) -> Result<ArrayRef> {
    match v {
        LiteralValue::Int64(x) => {
            let mut b = Int64Builder::with_capacity(len);
            b.append_value_n(*x, len);
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Float64(x) => {
            let mut b = Float64Builder::with_capacity(len);
            b.append_value_n(*x, len);
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Boolean(x) => {
            let mut b = BooleanBuilder::with_capacity(len);
            b.append_n(len, *x);
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Utf8(s) => {
            let mut b = StringBuilder::with_capacity(len, s.len() * len);
            for _ in 0..len {
                b.append_value(s);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Null => Ok(arrow::array::new_null_array(&DataType::Null, len)),
    }
}

fn cast_to(inner: Arc<dyn PhysicalExpr>, to_type: &DataType) -> Result<Arc<dyn PhysicalExpr>> {
    let from = inner.data_type();
    if &from == to_type {
        return Ok(inner);
    }
    if !can_cast_types(&from, to_type) {
        return Err(KflowError::Planning(format!(
            "cannot cast {from:?} to {to_type:?}"
        )));
    }
    Ok(Arc::new(CastExpr {
        inner,
        to_type: to_type.clone(),
    }))
}

/// Bring both operands of a binary op to one type: nulls adopt the other
/// side, integers widen to Int64 or to Float64 next to a float, and Utf8
/// widens to LargeUtf8.
fn coerce_pair(
    l: Arc<dyn PhysicalExpr>,
    r: Arc<dyn PhysicalExpr>,
) -> Result<(Arc<dyn PhysicalExpr>, Arc<dyn PhysicalExpr>)> {
    let (lt, rt) = (l.data_type(), r.data_type());
    if lt == rt {
        return Ok((l, r));
    }
    let target = match (&lt, &rt) {
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (DataType::Utf8, DataType::LargeUtf8) | (DataType::LargeUtf8, DataType::Utf8) => {
            DataType::LargeUtf8
        }
        (a, b) if a.is_integer() && b.is_integer() => DataType::Int64,
        (a, b) if a.is_numeric() && b.is_numeric() => DataType::Float64,
        _ => {
            return Err(KflowError::Planning(format!(
                "incompatible operand types {lt:?} and {rt:?}"
            )));
        }
    };
    Ok((cast_to(l, &target)?, cast_to(r, &target)?))
}

fn binary_out_type(op: BinaryOp, operand: DataType) -> Result<DataType> {
    match op {
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => Ok(DataType::Boolean),

        BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide => {
            if !operand.is_numeric() {
                return Err(KflowError::Unsupported(format!(
                    "arithmetic not supported for type {operand:?}"
                )));
            }
            Ok(operand)
        }
    }
}

fn expect_string(dt: &DataType, function: &str) -> Result<()> {
    match dt {
        DataType::Utf8 | DataType::LargeUtf8 => Ok(()),
        other => Err(KflowError::Planning(format!(
            "{function} expects a string argument, got {other:?}"
        ))),
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| KflowError::Planning(format!("invalid regex {pattern:?}: {e}")))
}
