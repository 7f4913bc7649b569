use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::infer;
use super::scalar::Scalar;
use crate::error::EngineError;
use crate::linalg::{Axis, ProductKind, SvdPart, SweepOp};
use crate::model::{ArrayHandle, Schema};
use crate::ops::{AggSpec, DeriveSpec, GroupBy, RedimensionSpec};

static NEXT_NODE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an expression node. Ids are never reused, so
/// an evaluator can key its caches by them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn fresh() -> Self {
        Self(NEXT_NODE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Operator kind plus its parameters. Inputs live on the [`Node`].
#[derive(Clone, Debug)]
pub enum Op {
    Scan(ArrayHandle),
    Filter(Scalar),
    Derive(Vec<DeriveSpec>),
    Project(Vec<String>),
    RenameAttribute { from: String, to: String },
    RenameDimension { from: String, to: String },
    Join,
    JoinOn { left: Vec<String>, right: Vec<String> },
    Merge,
    Aggregate { aggregates: Vec<AggSpec>, group_by: GroupBy },
    Redimension(RedimensionSpec),
    Unpack { dimension: String },
    Sweep { axis: Axis, op: SweepOp },
    Product(ProductKind),
    Svd(SvdPart),
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan",
            Self::Filter(_) => "filter",
            Self::Derive(_) => "derive",
            Self::Project(_) => "project",
            Self::RenameAttribute { .. } => "rename_attribute",
            Self::RenameDimension { .. } => "rename_dimension",
            Self::Join => "join",
            Self::JoinOn { .. } => "join_on",
            Self::Merge => "merge",
            Self::Aggregate { .. } => "aggregate",
            Self::Redimension(_) => "redimension",
            Self::Unpack { .. } => "unpack",
            Self::Sweep { .. } => "sweep",
            Self::Product(ProductKind::Cross) => "crossprod",
            Self::Product(ProductKind::TransposedCross) => "tcrossprod",
            Self::Svd(_) => "svd",
        }
    }
}

/// One immutable DAG node. Inputs are always nodes that existed before this
/// one, so the graph cannot contain cycles.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    op: Op,
    inputs: Vec<ArrayExpr>,
    schema: Schema,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn inputs(&self) -> &[ArrayExpr] {
        &self.inputs
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// A lazily evaluated array. Cheap to clone; clones share the node, so a
/// sub-expression reused by several consumers is evaluated once per request.
///
/// Every builder infers the output schema immediately and reports schema
/// errors at construction time, before any data is read.
#[derive(Clone, Debug)]
pub struct ArrayExpr(Arc<Node>);

impl ArrayExpr {
    fn build(op: Op, inputs: Vec<ArrayExpr>) -> Result<Self, EngineError> {
        let schemas: Vec<&Schema> = inputs.iter().map(|i| i.schema()).collect();
        let schema = infer::infer(&op, &schemas)?;
        Ok(Self(Arc::new(Node {
            id: NodeId::fresh(),
            op,
            inputs,
            schema,
        })))
    }

    /// Leaf over an already materialized array.
    pub fn scan(handle: ArrayHandle) -> Self {
        let schema = handle.schema().clone();
        Self(Arc::new(Node {
            id: NodeId::fresh(),
            op: Op::Scan(handle),
            inputs: Vec::new(),
            schema,
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn schema(&self) -> &Schema {
        &self.0.schema
    }

    pub fn op(&self) -> &Op {
        &self.0.op
    }

    pub fn inputs(&self) -> &[ArrayExpr] {
        &self.0.inputs
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.0
    }

    pub fn filter(&self, predicate: Scalar) -> Result<Self, EngineError> {
        Self::build(Op::Filter(predicate), vec![self.clone()])
    }

    pub fn derive(&self, specs: Vec<DeriveSpec>) -> Result<Self, EngineError> {
        Self::build(Op::Derive(specs), vec![self.clone()])
    }

    /// Shorthand for a single nullable derived attribute.
    pub fn derive_one(&self, name: &str, expr: Scalar) -> Result<Self, EngineError> {
        self.derive(vec![DeriveSpec::new(name, expr)])
    }

    pub fn project(&self, names: &[&str]) -> Result<Self, EngineError> {
        let names = names.iter().map(|n| n.to_string()).collect();
        Self::build(Op::Project(names), vec![self.clone()])
    }

    pub fn rename_attribute(&self, from: &str, to: &str) -> Result<Self, EngineError> {
        Self::build(
            Op::RenameAttribute {
                from: from.to_string(),
                to: to.to_string(),
            },
            vec![self.clone()],
        )
    }

    pub fn rename_dimension(&self, from: &str, to: &str) -> Result<Self, EngineError> {
        Self::build(
            Op::RenameDimension {
                from: from.to_string(),
                to: to.to_string(),
            },
            vec![self.clone()],
        )
    }

    /// Dimension-aligned join; `right` may carry a subset of this array's
    /// dimensions, in which case it is broadcast along the rest.
    pub fn join(&self, right: &ArrayExpr) -> Result<Self, EngineError> {
        Self::build(Op::Join, vec![self.clone(), right.clone()])
    }

    /// Inner equi-join on attribute keys, numbered along a `row` dimension.
    pub fn join_on(&self, right: &ArrayExpr, left_keys: &[&str], right_keys: &[&str]) -> Result<Self, EngineError> {
        Self::build(
            Op::JoinOn {
                left: left_keys.iter().map(|k| k.to_string()).collect(),
                right: right_keys.iter().map(|k| k.to_string()).collect(),
            },
            vec![self.clone(), right.clone()],
        )
    }

    pub fn merge(&self, right: &ArrayExpr) -> Result<Self, EngineError> {
        Self::build(Op::Merge, vec![self.clone(), right.clone()])
    }

    pub fn aggregate(&self, aggregates: Vec<AggSpec>, group_by: GroupBy) -> Result<Self, EngineError> {
        Self::build(Op::Aggregate { aggregates, group_by }, vec![self.clone()])
    }

    pub fn redimension(&self, spec: RedimensionSpec) -> Result<Self, EngineError> {
        Self::build(Op::Redimension(spec), vec![self.clone()])
    }

    pub fn unpack(&self, dimension: &str) -> Result<Self, EngineError> {
        Self::build(
            Op::Unpack {
                dimension: dimension.to_string(),
            },
            vec![self.clone()],
        )
    }

    pub fn sweep(&self, axis: Axis, vector: &ArrayExpr, op: SweepOp) -> Result<Self, EngineError> {
        Self::build(Op::Sweep { axis, op }, vec![self.clone(), vector.clone()])
    }

    pub fn product(&self, kind: ProductKind) -> Result<Self, EngineError> {
        Self::build(Op::Product(kind), vec![self.clone()])
    }

    pub fn svd_part(&self, part: SvdPart) -> Result<Self, EngineError> {
        Self::build(Op::Svd(part), vec![self.clone()])
    }
}

impl fmt::Display for ArrayExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op() {
            Op::Scan(handle) => write!(f, "{}", handle.name()),
            op => {
                write!(f, "{}(", op.name())?;
                for (i, input) in self.inputs().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{input}")?;
                }
                f.write_str(")")
            }
        }
    }
}
