//! Driver applying a [`StringTransform`] to every valid element of a column.

use arrow::array::{GenericStringArray, OffsetSizeTrait};
use arrow::buffer::{Buffer, NullBuffer, OffsetBuffer, ScalarBuffer};
use kflow_common::{KflowError, Result};

use crate::buffer_view::StringColumnView;
use crate::transform::{BoundedWriter, MemAllocation, StringTransform, TransformOutcome};

/// Fail when `bound` payload bytes cannot be addressed by offsets of type `O`.
pub fn check_output_capacity<O: OffsetSizeTrait>(bound: usize) -> Result<()> {
    let max = if O::IS_LARGE {
        i64::MAX as usize
    } else {
        i32::MAX as usize
    };
    if bound > max {
        return Err(KflowError::Capacity(format!(
            "result of up to {bound} bytes might not fit in a {}Utf8 array; use a wider-offset variant",
            O::PREFIX
        )));
    }
    Ok(())
}

/// Apply `transform` to every valid element of `input`.
///
/// `nulls` overrides the input's validity (callers pass the intersection of
/// all arguments). Null rows get a zero-length slice and no transform call.
/// Any failure aborts the whole column; no partial output is returned.
pub fn execute_transform<O, T>(
    transform: &T,
    input: &GenericStringArray<O>,
    nulls: Option<&NullBuffer>,
    allocation: MemAllocation,
) -> Result<GenericStringArray<O>>
where
    O: OffsetSizeTrait,
    T: StringTransform + ?Sized,
{
    let view = StringColumnView::new(input).with_nulls(nulls);
    let len = view.len();
    let bound = transform
        .max_output_bytes(len, view.total_bytes())
        .ok_or_else(|| KflowError::Capacity("output bound overflows usize".to_string()))?;
    check_output_capacity::<O>(bound)?;

    let mut payload = match allocation {
        MemAllocation::Preallocate => Vec::with_capacity(bound),
        MemAllocation::NoPreallocate => Vec::new(),
    };
    let mut offsets = Vec::<O>::with_capacity(len + 1);
    offsets.push(O::usize_as(0));

    for i in 0..len {
        if view.is_valid(i) {
            let mut writer = BoundedWriter::new(&mut payload, bound);
            match transform.transform(view.value_bytes(i), &mut writer)? {
                TransformOutcome::Written(n) if n == writer.written() => {}
                TransformOutcome::Written(n) => {
                    return Err(KflowError::Execution(format!(
                        "transform reported {n} bytes for element {i} but wrote {}",
                        writer.written()
                    )));
                }
                TransformOutcome::InvalidInput => return Err(transform.invalid_input()),
            }
        }
        offsets.push(O::usize_as(payload.len()));
    }
    payload.shrink_to_fit();

    GenericStringArray::<O>::try_new(
        OffsetBuffer::new(ScalarBuffer::from(offsets)),
        Buffer::from_vec(payload),
        view.nulls().cloned(),
    )
    .map_err(|e| KflowError::InvalidEncoding(format!("transform produced invalid output: {e}")))
}
