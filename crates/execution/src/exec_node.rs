use std::sync::Arc;

use arrow_schema::SchemaRef;
use kflow_common::Result;

use crate::context::TaskContext;
use crate::stream::SendableRecordBatchStream;

/// A leaf operator that produces RecordBatches, such as a dataset scan.
/// Pull-based: the consumer polls the returned stream.
pub trait ExecNode: Send + Sync {
    fn name(&self) -> &'static str;

    fn schema(&self) -> SchemaRef;

    fn execute(&self, ctx: Arc<TaskContext>) -> Result<SendableRecordBatchStream>;
}
