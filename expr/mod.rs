//! Lazy expression graphs and their evaluation.

pub mod evaluator;
pub mod infer;
pub mod node;
pub mod scalar;

pub use evaluator::Evaluator;
pub use infer::{GROUP_DIM, ROW_DIM};
pub use node::{ArrayExpr, Node, NodeId, Op};
pub use scalar::{BoundScalar, Scalar, attr, dim, if_then_else, lit, null};
