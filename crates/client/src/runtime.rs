use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use kflow_common::metrics::OperatorStats;
use kflow_common::{KflowError, NodeId, Result};
use kflow_execution::{
    ExecOutput, TaskContext, batch_stats, collect_stream, reader_stream, run_filter,
    run_hash_aggregate, run_project,
};
use kflow_planner::{LogicalPlan, NodeKind};
use kflow_storage::{DatasetWriteSummary, FileSystem, StorageProvider, write_dataset};
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{Instrument, debug, info_span};

/// Terminal result of materializing a plan.
#[derive(Debug)]
pub enum Materialized {
    /// The root produced batches that stay in memory.
    Table(ExecOutput),
    /// The root was a `Write` node.
    Dataset(DatasetWriteSummary),
}

/// Runtime = something that can materialize a LogicalPlan.
pub trait Runtime: Send + Sync + Debug {
    fn execute(
        &self,
        plan: LogicalPlan,
        ctx: Arc<TaskContext>,
        storage: Arc<dyn StorageProvider>,
        fs: Arc<dyn FileSystem>,
    ) -> BoxFuture<'static, Result<Materialized>>;

    fn shutdown(&self) -> BoxFuture<'static, Result<()>> {
        async { Ok(()) }.boxed()
    }
}

/// In-process runtime evaluating plan nodes one after another.
#[derive(Debug, Default)]
pub struct EmbeddedRuntime;

impl EmbeddedRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Runtime for EmbeddedRuntime {
    fn execute(
        &self,
        plan: LogicalPlan,
        ctx: Arc<TaskContext>,
        storage: Arc<dyn StorageProvider>,
        fs: Arc<dyn FileSystem>,
    ) -> BoxFuture<'static, Result<Materialized>> {
        execute_plan(plan, ctx, storage, fs).boxed()
    }
}

async fn execute_plan(
    plan: LogicalPlan,
    ctx: Arc<TaskContext>,
    storage: Arc<dyn StorageProvider>,
    fs: Arc<dyn FileSystem>,
) -> Result<Materialized> {
    plan.validate()?;
    let (nodes, root) = plan.into_parts();
    // Inputs precede their consumers, so index order is a valid schedule.
    let mut outputs: Vec<Option<ExecOutput>> = Vec::with_capacity(nodes.len());
    for (idx, node) in nodes.into_iter().enumerate() {
        let id = NodeId(idx);
        let operator = node.kind.name();
        let mut inputs = Vec::with_capacity(node.inputs.len());
        for input in &node.inputs {
            let output = outputs
                .get_mut(input.0)
                .and_then(Option::take)
                .ok_or_else(|| {
                    KflowError::Planning(format!("input {input} of {id} is not available"))
                })?;
            inputs.push(output);
        }

        let span = info_span!("operator_execute", node = %id, operator);
        let started = Instant::now();
        let rows_in = inputs
            .iter()
            .map(|i| batch_stats(&i.batches))
            .fold((0, 0), |(rows, batches), (r, b, _)| (rows + r, batches + b));

        let kind = match node.kind {
            NodeKind::Write(options) => {
                if id != root {
                    return Err(KflowError::Planning(format!(
                        "write node {id} must be the plan root"
                    )));
                }
                let input = single_input(inputs, id)?;
                let summary = async {
                    write_dataset(fs.as_ref(), &input.schema, &input.batches, &options)
                }
                .instrument(span)
                .await?;
                ctx.metrics.record_dataset_write(
                    &summary.root.display().to_string(),
                    summary.files.len() as u64,
                    summary.rows,
                );
                ctx.metrics.record_operator(
                    operator,
                    OperatorStats {
                        rows_in: rows_in.0,
                        rows_out: summary.rows,
                        batches_in: rows_in.1,
                        batches_out: summary.files.len() as u64,
                        secs: started.elapsed().as_secs_f64(),
                    },
                );
                return Ok(Materialized::Dataset(summary));
            }
            kind => kind,
        };

        let output = run_node(kind, inputs, id, &ctx, storage.as_ref())
            .instrument(span)
            .await?;
        let (rows_out, batches_out, bytes_out) = batch_stats(&output.batches);
        ctx.metrics.record_operator(
            operator,
            OperatorStats {
                rows_in: rows_in.0,
                rows_out,
                batches_in: rows_in.1,
                batches_out,
                secs: started.elapsed().as_secs_f64(),
            },
        );
        debug!(node = %id, operator, rows_out, bytes_out, "operator finished");
        outputs.push(Some(output));
    }

    outputs
        .get_mut(root.0)
        .and_then(Option::take)
        .map(Materialized::Table)
        .ok_or_else(|| KflowError::Planning(format!("root {root} produced no output")))
}

async fn run_node(
    kind: NodeKind,
    inputs: Vec<ExecOutput>,
    id: NodeId,
    ctx: &Arc<TaskContext>,
    storage: &dyn StorageProvider,
) -> Result<ExecOutput> {
    match kind {
        NodeKind::Source(source) => collect_stream(reader_stream(source.into_reader())).await,
        NodeKind::Scan(scan) => {
            let node = storage.scan(&scan)?;
            collect_stream(node.execute(Arc::clone(ctx))?).await
        }
        NodeKind::Aggregate {
            group_exprs,
            aggr_exprs,
        } => run_hash_aggregate(single_input(inputs, id)?, &group_exprs, &aggr_exprs, ctx),
        NodeKind::Filter { predicate } => run_filter(single_input(inputs, id)?, &predicate, ctx),
        NodeKind::Projection { exprs } => run_project(single_input(inputs, id)?, &exprs, ctx),
        NodeKind::Write(_) => Err(KflowError::Planning(format!(
            "write node {id} must be the plan root"
        ))),
    }
}

fn single_input(inputs: Vec<ExecOutput>, id: NodeId) -> Result<ExecOutput> {
    let mut inputs = inputs.into_iter();
    match (inputs.next(), inputs.next()) {
        (Some(input), None) => Ok(input),
        _ => Err(KflowError::Planning(format!(
            "node {id} expects exactly one input"
        ))),
    }
}
