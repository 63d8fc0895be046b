//! Driver producing a struct column with one nullable `Utf8` field per
//! decomposed component.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanBufferBuilder, GenericStringArray, OffsetSizeTrait, StringBuilder,
    StructArray,
};
use arrow::buffer::NullBuffer;
use arrow_schema::Fields;
use kflow_common::{KflowError, Result};

/// Whether an element produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Every field was set through the sink.
    Record,
    /// The element could not be decomposed; the whole record is null.
    NullRecord,
}

/// Splits one string into a fixed set of named fields.
pub trait StructDecompose: Send + Sync {
    /// Output fields, all `Utf8` and nullable.
    fn fields(&self) -> Fields;

    fn decompose(&self, input: &str, sink: &mut RowSink<'_>) -> Result<RecordOutcome>;
}

/// Per-row field writer handed to [`StructDecompose::decompose`].
pub struct RowSink<'a> {
    builders: &'a mut [StringBuilder],
    written: Vec<bool>,
}

impl<'a> RowSink<'a> {
    fn new(builders: &'a mut [StringBuilder]) -> Self {
        let n = builders.len();
        Self {
            builders,
            written: vec![false; n],
        }
    }

    /// Set field `idx` for the current row; `None` appends a null.
    pub fn set(&mut self, idx: usize, value: Option<&str>) -> Result<()> {
        let Some(done) = self.written.get_mut(idx) else {
            return Err(KflowError::Execution(format!(
                "field index {idx} out of range ({} fields)",
                self.builders.len()
            )));
        };
        if *done {
            return Err(KflowError::Execution(format!(
                "field {idx} written twice for one row"
            )));
        }
        *done = true;
        self.builders[idx].append_option(value);
        Ok(())
    }

    fn written_count(&self) -> usize {
        self.written.iter().filter(|w| **w).count()
    }
}

/// Decompose every element of `input` into a struct record.
///
/// Null inputs (per `nulls`, defaulting to the input's validity) and elements
/// the decomposer rejects become null records; the batch never aborts on
/// unparsable input. A decomposer that leaves a field unset for a record is
/// a bug and fails the call.
pub fn execute_decompose<O, D>(
    decomposer: &D,
    input: &GenericStringArray<O>,
    nulls: Option<&NullBuffer>,
) -> Result<StructArray>
where
    O: OffsetSizeTrait,
    D: StructDecompose + ?Sized,
{
    let fields = decomposer.fields();
    let len = input.len();
    let nulls = nulls.or(input.nulls());
    let mut builders = fields
        .iter()
        .map(|_| StringBuilder::new())
        .collect::<Vec<_>>();
    let mut validity = BooleanBufferBuilder::new(len);

    for i in 0..len {
        let valid = nulls.map_or(true, |n| n.is_valid(i));
        let outcome = if valid {
            let mut sink = RowSink::new(&mut builders);
            match decomposer.decompose(input.value(i), &mut sink)? {
                RecordOutcome::Record if sink.written_count() == fields.len() => {
                    RecordOutcome::Record
                }
                RecordOutcome::Record => {
                    return Err(KflowError::Execution(format!(
                        "decomposer set {} of {} fields for row {i}",
                        sink.written_count(),
                        fields.len()
                    )));
                }
                RecordOutcome::NullRecord if sink.written_count() == 0 => {
                    RecordOutcome::NullRecord
                }
                RecordOutcome::NullRecord => {
                    return Err(KflowError::Execution(format!(
                        "decomposer set fields for rejected row {i}"
                    )));
                }
            }
        } else {
            RecordOutcome::NullRecord
        };
        if outcome == RecordOutcome::NullRecord {
            for b in builders.iter_mut() {
                b.append_null();
            }
        }
        validity.append(outcome == RecordOutcome::Record);
    }

    let arrays = builders
        .iter_mut()
        .map(|b| Arc::new(b.finish()) as ArrayRef)
        .collect::<Vec<_>>();
    let validity = NullBuffer::new(validity.finish());
    let validity = (validity.null_count() > 0).then_some(validity);
    StructArray::try_new(fields, arrays, validity)
        .map_err(|e| KflowError::Execution(format!("struct output assembly failed: {e}")))
}
