//! In-memory materialization result.

use arrow::array::{Array, ArrayRef, Float64Array, new_empty_array};
use arrow::compute::{cast, concat};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use arrow_schema::{DataType, SchemaRef};
use kflow_common::{KflowError, Result};
use kflow_execution::ExecOutput;

/// Schema plus zero or more batches; the schema survives empty results.
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// First row of the first column as `f64`.
    ///
    /// `Ok(None)` when the table is empty or the value is null. Numeric columns
    /// are cast; anything else is a schema mismatch.
    pub fn to_f64_scalar(&self) -> Result<Option<f64>> {
        if self.schema.fields().is_empty() {
            return Err(KflowError::SchemaMismatch(
                "table has no columns".to_string(),
            ));
        }
        let Some(batch) = self.batches.iter().find(|b| b.num_rows() > 0) else {
            return Ok(None);
        };
        let column = batch.column(0);
        if !column.data_type().is_numeric() {
            return Err(KflowError::SchemaMismatch(format!(
                "first column is {}, expected a numeric type",
                column.data_type()
            )));
        }
        let values = cast(column, &DataType::Float64)
            .map_err(|e| KflowError::Execution(format!("scalar cast failed: {e}")))?;
        let values = values
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| KflowError::Execution("scalar cast produced no f64".to_string()))?;
        Ok((!values.is_null(0)).then(|| values.value(0)))
    }

    /// Column `index` of every batch concatenated into one array.
    pub fn column_concat(&self, index: usize) -> Result<ArrayRef> {
        if index >= self.schema.fields().len() {
            return Err(KflowError::SchemaMismatch(format!(
                "column index {index} out of range ({} columns)",
                self.schema.fields().len()
            )));
        }
        if self.batches.is_empty() {
            return Ok(new_empty_array(self.schema.field(index).data_type()));
        }
        let parts = self
            .batches
            .iter()
            .map(|b| b.column(index).as_ref())
            .collect::<Vec<&dyn Array>>();
        concat(&parts).map_err(|e| KflowError::Execution(format!("column concat failed: {e}")))
    }

    /// Table text the way the CLI prints it.
    pub fn pretty(&self) -> Result<String> {
        if self.batches.is_empty() {
            return Ok(format!("OK: 0 rows ({} columns)", self.schema.fields().len()));
        }
        pretty_format_batches(&self.batches)
            .map(|t| t.to_string())
            .map_err(|e| KflowError::Execution(format!("table render failed: {e}")))
    }
}

impl From<ExecOutput> for Table {
    fn from(output: ExecOutput) -> Self {
        Self::new(output.schema, output.batches)
    }
}
