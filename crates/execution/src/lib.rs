//! Execution-layer primitives used by the embedded runtime.
//!
//! Architecture role:
//! - columnar transform kernels and their drivers
//! - the scalar function registry and the built-in URL kernels
//! - expression compilation/evaluation, filter/project/aggregate operators
//! - batch stream abstractions
//!
//! Key modules:
//! - [`string_transform`] / [`struct_decompose`]
//! - [`registry`]
//! - [`expressions`]
//! - [`aggregate`] / [`operators`]
//! - [`stream`]

pub mod aggregate;
pub mod buffer_view;
pub mod context;
pub mod exec_node;
pub mod expressions;
pub mod operators;
pub mod registry;
pub mod scalar;
pub mod stream;
pub mod string_transform;
pub mod struct_decompose;
pub mod tdigest;
pub mod transform;
pub mod uri;
pub mod url_kernels;

// Re-export only what you want at the crate root (no globs).
pub use aggregate::run_hash_aggregate;
pub use buffer_view::StringColumnView;
pub use context::{SharedTaskContext, TaskContext};
pub use exec_node::ExecNode;
pub use expressions::{PhysicalExpr, compile_expr};
pub use operators::{ExecOutput, batch_stats, run_filter, run_project};
pub use registry::{
    ExecSpan, FunctionDoc, FunctionRegistry, FunctionRegistryBuilder, KernelContext, KernelExec,
    KernelInit, KernelState, ScalarFunction, ScalarKernel, options_wrapper_init,
};
pub use stream::{
    RecordBatchStream, SendableRecordBatchStream, StreamAdapter, batches_stream, collect_stream,
    empty_stream, reader_stream,
};
pub use string_transform::execute_transform;
pub use struct_decompose::{RecordOutcome, RowSink, StructDecompose, execute_decompose};
pub use tdigest::TDigest;
pub use transform::{BoundedWriter, MemAllocation, NullHandling, StringTransform, TransformOutcome};
pub use url_kernels::{
    URL_EXTRACT, URL_EXTRACT_DICT, URL_FIELDS, URL_PARSE_OPTIONS, UrlDecompose, UrlExtract,
    UrlParseOptions, UrlPart,
};
