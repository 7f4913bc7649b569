//! Dense linear algebra over matrix-shaped arrays.
//!
//! A matrix is any two-dimensional array with exactly one numeric attribute,
//! normally produced by redimensioning a sparse join into `0..N-1` space.
//! Everything here is a builder over [`ArrayExpr`]: sweep, product and SVD
//! are dedicated operators, while `mean`, `center` and `diag` are composed
//! from the generic ones.

pub mod dense;
pub mod faer_ndarray;
pub mod product;
pub mod svd;
pub mod sweep;

pub use dense::{Absent, from_dense, to_dense};
pub use svd::SvdFactors;

use crate::error::EngineError;
use crate::expr::{ArrayExpr, dim};
use crate::ops::{AggSpec, Combine, GroupBy, RedimensionSpec};
use dense::MatrixLayout;

/// Attribute carried by every linear-algebra result.
pub const VALUE_ATTR: &str = "value";

/// Dimension indexing singular components.
pub const COMPONENT_DIM: &str = "component";

/// Which matrix dimension a per-row or per-column vector is indexed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    Rows,
    Columns,
}

/// How a sweep combines a matrix cell `x` with its vector entry `v`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SweepOp {
    /// `x - v`
    Subtract,
    /// `x / v`, null when `v` is zero.
    Divide,
    Multiply,
    Add,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProductKind {
    /// `Xᵗ·X / (n-1)`, contracting over rows.
    Cross,
    /// `X·Xᵗ / (n-1)`, contracting over columns.
    TransposedCross,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SvdPart {
    U,
    D,
    V,
}

fn axis_dimension(matrix: &ArrayExpr, axis: Axis) -> Result<String, EngineError> {
    let layout = MatrixLayout::of(matrix.schema())?;
    Ok(match axis {
        Axis::Rows => layout.rows.name,
        Axis::Columns => layout.cols.name,
    })
}

pub fn sweep(matrix: &ArrayExpr, axis: Axis, vector: &ArrayExpr, op: SweepOp) -> Result<ArrayExpr, EngineError> {
    matrix.sweep(axis, vector, op)
}

/// Per-row or per-column mean over the cells present, as a vector indexed
/// by the matching matrix dimension.
pub fn mean(matrix: &ArrayExpr, axis: Axis) -> Result<ArrayExpr, EngineError> {
    let by = axis_dimension(matrix, axis)?;
    let input = matrix.schema().attributes[0].name.clone();
    matrix.aggregate(
        vec![AggSpec::avg(&input, VALUE_ATTR)],
        GroupBy::Dimensions(vec![by]),
    )
}

/// Subtracts the per-row or per-column mean from every cell.
pub fn center(matrix: &ArrayExpr, axis: Axis) -> Result<ArrayExpr, EngineError> {
    let means = mean(matrix, axis)?;
    matrix.sweep(axis, &means, SweepOp::Subtract)
}

pub fn crossprod(matrix: &ArrayExpr) -> Result<ArrayExpr, EngineError> {
    matrix.product(ProductKind::Cross)
}

pub fn tcrossprod(matrix: &ArrayExpr) -> Result<ArrayExpr, EngineError> {
    matrix.product(ProductKind::TransposedCross)
}

/// The three lazy factors of one SVD. They share a single decomposition
/// when evaluated by the same [`crate::expr::Evaluator`].
#[derive(Clone, Debug)]
pub struct SvdExprs {
    pub u: ArrayExpr,
    pub d: ArrayExpr,
    pub v: ArrayExpr,
}

pub fn svd(matrix: &ArrayExpr) -> Result<SvdExprs, EngineError> {
    Ok(SvdExprs {
        u: matrix.svd_part(SvdPart::U)?,
        d: matrix.svd_part(SvdPart::D)?,
        v: matrix.svd_part(SvdPart::V)?,
    })
}

/// Diagonal of a square matrix as a vector indexed by its row dimension.
pub fn diag(matrix: &ArrayExpr) -> Result<ArrayExpr, EngineError> {
    let layout = MatrixLayout::of(matrix.schema())?;
    let attr = matrix.schema().attributes[layout.value].name.clone();
    let on_diagonal = matrix.filter(dim(&layout.rows.name).cmp_eq(dim(&layout.cols.name)))?;
    let spec = RedimensionSpec::new()
        .dimension(layout.rows.clone(), &layout.rows.name)
        .attribute_from(VALUE_ATTR, &attr, Combine::First);
    on_diagonal.redimension(spec)
}
