//! Per-element transform contract shared by the string kernel drivers.

use kflow_common::{KflowError, Result};

/// How a kernel's output validity is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullHandling {
    /// Output is null iff any input is null; the driver never calls the
    /// transform for such rows.
    Intersection,
    /// The kernel decides validity itself.
    Computed,
}

/// Output buffer strategy of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAllocation {
    /// Reserve the declared upper bound before the first element.
    Preallocate,
    /// Start empty and grow as elements are written.
    NoPreallocate,
}

/// Result of transforming one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutcome {
    /// `n` bytes were appended through the writer.
    Written(usize),
    /// The element cannot be represented in the output encoding.
    InvalidInput,
}

/// Append-only writer over the driver's payload buffer.
///
/// The buffer may never grow past `limit`; writes that would cross it are
/// refused and leave the buffer untouched.
#[derive(Debug)]
pub struct BoundedWriter<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
    limit: usize,
}

impl<'a> BoundedWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>, limit: usize) -> Self {
        let start = buf.len();
        Self { buf, start, limit }
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.buf.len())
    }

    /// Bytes appended through this writer.
    pub fn written(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(KflowError::Capacity(format!(
                "transform tried to write {} bytes with only {} left of its declared bound",
                bytes.len(),
                self.remaining()
            )));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write(s.as_bytes())
    }
}

/// A vectorizable string-to-string transform.
///
/// Implementations are stateless per element; any configuration lives on the
/// implementing value itself.
pub trait StringTransform: Send + Sync {
    /// Upper bound on total output bytes for `len` elements spanning
    /// `input_bytes` payload bytes. `None` when the bound itself overflows.
    fn max_output_bytes(&self, len: usize, input_bytes: usize) -> Option<usize>;

    fn transform(&self, input: &[u8], out: &mut BoundedWriter<'_>) -> Result<TransformOutcome>;

    /// Error raised when [`StringTransform::transform`] reports invalid input.
    fn invalid_input(&self) -> KflowError {
        KflowError::InvalidEncoding("invalid input sequence".to_string())
    }
}
