//! Record-batch stream abstractions.

use std::pin::Pin;
use std::task::{Context, Poll};

use arrow::record_batch::{RecordBatch, RecordBatchReader};
use arrow_schema::SchemaRef;
use futures::{Stream, TryStreamExt};
use kflow_common::{KflowError, Result};

use crate::operators::ExecOutput;

/// A stream of RecordBatches that also knows its output schema.
pub trait RecordBatchStream: Stream<Item = Result<RecordBatch>> + Send {
    /// Output schema for every batch yielded by this stream.
    fn schema(&self) -> SchemaRef;
}

/// The standard "stream you can return from operators".
pub type SendableRecordBatchStream = Pin<Box<dyn RecordBatchStream>>;

/// Adapter that attaches a schema to any `Stream<Item = Result<RecordBatch>>`.
pub struct StreamAdapter<S> {
    schema: SchemaRef,
    inner: S,
}

impl<S> StreamAdapter<S> {
    pub fn new(schema: SchemaRef, inner: S) -> Self {
        Self { schema, inner }
    }
}

impl<S> RecordBatchStream for StreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>> + Send + Unpin + 'static,
{
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl<S> Stream for StreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>> + Unpin,
{
    type Item = Result<RecordBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Create an empty stream (useful for early returns).
pub fn empty_stream(schema: SchemaRef) -> SendableRecordBatchStream {
    let inner = futures::stream::empty::<Result<RecordBatch>>();
    Box::pin(StreamAdapter::new(schema, inner))
}

/// Stream over already materialized batches.
pub fn batches_stream(schema: SchemaRef, batches: Vec<RecordBatch>) -> SendableRecordBatchStream {
    let inner = futures::stream::iter(batches.into_iter().map(Ok));
    Box::pin(StreamAdapter::new(schema, inner))
}

/// Stream pulling from an arrow reader; reader errors become execution errors.
pub fn reader_stream(reader: Box<dyn RecordBatchReader + Send>) -> SendableRecordBatchStream {
    let schema = reader.schema();
    let inner = futures::stream::iter(reader.map(|r| {
        r.map_err(|e| KflowError::Execution(format!("source reader failed: {e}")))
    }));
    Box::pin(StreamAdapter::new(schema, inner))
}

/// Drain `stream` into memory.
pub async fn collect_stream(stream: SendableRecordBatchStream) -> Result<ExecOutput> {
    let schema = stream.schema();
    let batches = stream.try_collect::<Vec<_>>().await?;
    Ok(ExecOutput { schema, batches })
}
