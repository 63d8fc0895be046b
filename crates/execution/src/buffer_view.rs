//! Zero-copy view over the buffers of a variable-length string column.

use arrow::array::{Array, GenericStringArray, OffsetSizeTrait};
use arrow::buffer::NullBuffer;

/// Read-only view of a string column's validity, offsets and payload.
///
/// Offsets are the column's own (possibly sliced) offsets, so they index
/// directly into the shared payload buffer.
#[derive(Debug, Clone, Copy)]
pub struct StringColumnView<'a, O: OffsetSizeTrait> {
    offsets: &'a [O],
    payload: &'a [u8],
    nulls: Option<&'a NullBuffer>,
}

impl<'a, O: OffsetSizeTrait> StringColumnView<'a, O> {
    pub fn new(array: &'a GenericStringArray<O>) -> Self {
        Self {
            offsets: array.value_offsets(),
            payload: array.values().as_slice(),
            nulls: array.nulls(),
        }
    }

    /// Replace the validity bitmap, e.g. with the intersection of several inputs.
    pub fn with_nulls(mut self, nulls: Option<&'a NullBuffer>) -> Self {
        self.nulls = nulls;
        self
    }

    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nulls(&self) -> Option<&'a NullBuffer> {
        self.nulls
    }

    pub fn null_count(&self) -> usize {
        self.nulls.map_or(0, |n| n.null_count())
    }

    pub fn is_valid(&self, i: usize) -> bool {
        self.nulls.map_or(true, |n| n.is_valid(i))
    }

    /// Payload bytes spanned by the view, read from the first and last offsets.
    pub fn total_bytes(&self) -> usize {
        match (self.offsets.first(), self.offsets.last()) {
            (Some(first), Some(last)) => last.as_usize() - first.as_usize(),
            _ => 0,
        }
    }

    /// Raw bytes of element `i`. Callers check validity first.
    pub fn value_bytes(&self, i: usize) -> &'a [u8] {
        let start = self.offsets[i].as_usize();
        let end = self.offsets[i + 1].as_usize();
        &self.payload[start..end]
    }
}
