use std::collections::HashSet;
use std::fmt;

use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatchReader;
use arrow_schema::{DataType, SchemaRef, TimeUnit};
use kflow_common::{DatasetConfig, ExistingDataBehavior, KflowError, NodeId, Result};
use serde::{Deserialize, Serialize};

use crate::function_options::FunctionOptionsRef;

#[derive(Debug, Clone)]
pub enum Expr {
    Column(String),
    Literal(LiteralValue),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        to_type: DataType,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// Set membership against a materialized value set.
    ///
    /// A null input row is a member iff `values` contains a null.
    InList {
        expr: Box<Expr>,
        values: ArrayRef,
        negated: bool,
    },
    RegexMatch {
        expr: Box<Expr>,
        pattern: String,
    },
    /// `max_replacements: None` replaces every match.
    RegexReplace {
        expr: Box<Expr>,
        pattern: String,
        replacement: String,
        max_replacements: Option<usize>,
    },
    /// Parse strings into `Timestamp(unit)` with a strftime-style format.
    ///
    /// An unparsable value fails evaluation unless `error_is_null` is set.
    Strptime {
        expr: Box<Expr>,
        format: String,
        unit: TimeUnit,
        error_is_null: bool,
    },
    /// Call into the function registry.
    ScalarFunction {
        name: String,
        args: Vec<Expr>,
        options: Option<FunctionOptionsRef>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
}

/// Merging t-digest parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TDigestOptions {
    /// Target quantile in `[0, 1]`.
    pub q: f64,
    /// Compression; bounds the number of retained centroids.
    pub delta: u32,
    /// Unmerged points buffered before a merge pass.
    pub buffer_size: u32,
    /// When false, any null input makes the result null.
    pub skip_nulls: bool,
    /// Fewer non-null inputs than this produce a null result.
    pub min_count: u32,
}

impl Default for TDigestOptions {
    fn default() -> Self {
        Self {
            q: 0.5,
            delta: 100,
            buffer_size: 500,
            skip_nulls: true,
            min_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AggExpr {
    /// Number of non-null values (`Int64`).
    Count(Expr),
    /// Approximate quantile (`Float64`).
    TDigest { expr: Expr, options: TDigestOptions },
}

/// Destination and layout of a partitioned dataset write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetWriteOptions {
    /// Directory path or `file://` URI of the dataset root.
    pub base_dir: String,
    /// Hive partition columns, outermost directory first.
    pub partition_by: Vec<String>,
    /// File name template; `{i}` is replaced by a per-directory counter.
    pub basename_template: String,
    pub existing_data_behavior: ExistingDataBehavior,
    /// 0 means unlimited.
    pub max_rows_per_file: usize,
}

impl DatasetWriteOptions {
    pub fn new(base_dir: impl Into<String>, partition_by: Vec<String>) -> Self {
        Self::with_config(base_dir, partition_by, &DatasetConfig::default())
    }

    pub fn with_config(
        base_dir: impl Into<String>,
        partition_by: Vec<String>,
        config: &DatasetConfig,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            partition_by,
            basename_template: config.basename_template.clone(),
            existing_data_behavior: config.existing_data_behavior,
            max_rows_per_file: config.max_rows_per_file,
        }
    }
}

/// In-memory batch supplier owned by a `Source` node.
pub struct SourceNode {
    reader: Box<dyn RecordBatchReader + Send>,
}

impl SourceNode {
    pub fn new(reader: Box<dyn RecordBatchReader + Send>) -> Self {
        Self { reader }
    }

    pub fn schema(&self) -> SchemaRef {
        self.reader.schema()
    }

    pub fn into_reader(self) -> Box<dyn RecordBatchReader + Send> {
        self.reader
    }
}

impl fmt::Debug for SourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceNode")
            .field("schema", &self.reader.schema())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanNode {
    /// Directory path or `file://` URI of the dataset root.
    pub uri: String,
    /// Interpret `col=value` directory names as partition columns.
    pub hive_partitioning: bool,
}

#[derive(Debug)]
pub enum NodeKind {
    Source(SourceNode),
    Scan(ScanNode),
    Aggregate {
        group_exprs: Vec<Expr>,
        aggr_exprs: Vec<(AggExpr, String)>,
    },
    Filter {
        predicate: Expr,
    },
    Projection {
        exprs: Vec<(Expr, String)>,
    },
    Write(DatasetWriteOptions),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "Source",
            NodeKind::Scan(_) => "Scan",
            NodeKind::Aggregate { .. } => "Aggregate",
            NodeKind::Filter { .. } => "Filter",
            NodeKind::Projection { .. } => "Projection",
            NodeKind::Write(_) => "Write",
        }
    }

    fn arity(&self) -> usize {
        match self {
            NodeKind::Source(_) | NodeKind::Scan(_) => 0,
            _ => 1,
        }
    }
}

#[derive(Debug)]
pub struct PlanNode {
    pub kind: NodeKind,
    pub inputs: Vec<NodeId>,
}

/// Arena of plan nodes addressed by [`NodeId`].
///
/// Every node's inputs precede it in the arena, so evaluating nodes in index
/// order always sees predecessors first.
#[derive(Debug)]
pub struct LogicalPlan {
    nodes: Vec<PlanNode>,
    root: NodeId,
}

impl LogicalPlan {
    /// Single-node plan rooted at a leaf.
    pub fn leaf(kind: NodeKind) -> Self {
        Self {
            nodes: vec![PlanNode {
                kind,
                inputs: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    /// Append `kind` consuming the current root and make it the new root.
    pub fn push(mut self, kind: NodeKind) -> Self {
        let input = self.root;
        self.nodes.push(PlanNode {
            kind,
            inputs: vec![input],
        });
        self.root = NodeId(self.nodes.len() - 1);
        self
    }

    /// Assemble a plan from raw parts. Call [`LogicalPlan::validate`] before use.
    pub fn from_parts(nodes: Vec<PlanNode>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    pub fn into_parts(self) -> (Vec<PlanNode>, NodeId) {
        (self.nodes, self.root)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(id.0)
    }

    pub fn root_node(&self) -> Option<&PlanNode> {
        self.node(self.root)
    }

    /// Check arena shape: inputs point backwards, each node has exactly one
    /// consumer (the root none), and input counts match node kinds.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(KflowError::Planning("plan has no nodes".to_string()));
        }
        if self.root.0 >= self.nodes.len() {
            return Err(KflowError::Planning(format!(
                "root {} out of range ({} nodes)",
                self.root,
                self.nodes.len()
            )));
        }
        let mut consumed = HashSet::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            let id = NodeId(idx);
            if node.inputs.len() != node.kind.arity() {
                return Err(KflowError::Planning(format!(
                    "{} node {id} expects {} input(s), got {}",
                    node.kind.name(),
                    node.kind.arity(),
                    node.inputs.len()
                )));
            }
            for input in &node.inputs {
                if input.0 >= idx {
                    return Err(KflowError::Planning(format!(
                        "node {id} references {input}, which does not precede it"
                    )));
                }
                if !consumed.insert(*input) {
                    return Err(KflowError::Planning(format!(
                        "node {input} is consumed by more than one parent"
                    )));
                }
            }
        }
        if consumed.contains(&self.root) {
            return Err(KflowError::Planning(format!(
                "root {} is consumed by another node",
                self.root
            )));
        }
        for idx in 0..self.nodes.len() {
            let id = NodeId(idx);
            if id != self.root && !consumed.contains(&id) {
                return Err(KflowError::Planning(format!(
                    "node {id} is not reachable from root {}",
                    self.root
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::record_batch::{RecordBatch, RecordBatchIterator};
    use arrow_schema::{ArrowError, Field, Schema};

    use super::*;

    fn source() -> NodeKind {
        let schema = Arc::new(Schema::new(vec![Field::new("g", DataType::Utf8, true)]));
        let batches: Vec<std::result::Result<RecordBatch, ArrowError>> = Vec::new();
        NodeKind::Source(SourceNode::new(Box::new(RecordBatchIterator::new(
            batches, schema,
        ))))
    }

    fn filter() -> NodeKind {
        NodeKind::Filter {
            predicate: Expr::Literal(LiteralValue::Boolean(true)),
        }
    }

    #[test]
    fn pushed_chain_validates() {
        let plan = LogicalPlan::leaf(source()).push(filter()).push(filter());
        assert_eq!(plan.root(), NodeId(2));
        plan.validate().expect("valid chain");
    }

    #[test]
    fn rejects_node_shared_by_two_parents() {
        let nodes = vec![
            PlanNode {
                kind: source(),
                inputs: vec![],
            },
            PlanNode {
                kind: filter(),
                inputs: vec![NodeId(0)],
            },
            PlanNode {
                kind: filter(),
                inputs: vec![NodeId(0)],
            },
        ];
        let err = LogicalPlan::from_parts(nodes, NodeId(2))
            .validate()
            .expect_err("shared input");
        assert!(matches!(err, KflowError::Planning(_)));
        assert!(err.to_string().contains("more than one parent"));
    }

    #[test]
    fn rejects_forward_reference_and_bad_arity() {
        let nodes = vec![
            PlanNode {
                kind: filter(),
                inputs: vec![NodeId(1)],
            },
            PlanNode {
                kind: source(),
                inputs: vec![],
            },
        ];
        assert!(LogicalPlan::from_parts(nodes, NodeId(0)).validate().is_err());

        let nodes = vec![PlanNode {
            kind: filter(),
            inputs: vec![],
        }];
        let err = LogicalPlan::from_parts(nodes, NodeId(0))
            .validate()
            .expect_err("arity");
        assert!(err.to_string().contains("expects 1 input"));
    }

    #[test]
    fn rejects_dangling_node() {
        let nodes = vec![
            PlanNode {
                kind: source(),
                inputs: vec![],
            },
            PlanNode {
                kind: source(),
                inputs: vec![],
            },
            PlanNode {
                kind: filter(),
                inputs: vec![NodeId(1)],
            },
        ];
        let err = LogicalPlan::from_parts(nodes, NodeId(2))
            .validate()
            .expect_err("dangling");
        assert!(err.to_string().contains("not reachable"));
    }
}
