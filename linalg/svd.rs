use ndarray::{Array1, Array2, Axis as NdAxis};

use super::dense::{Absent, MatrixLayout, to_dense};
use super::faer_ndarray::FaerSvd;
use super::{COMPONENT_DIM, SvdPart, VALUE_ATTR};
use crate::error::EngineError;
use crate::model::{
    Attribute, Dimension, MaterializedArray, SYNTHETIC_CHUNK, ScalarType, Schema, Value,
};

/// The three factors of one decomposition, computed once and shared by the
/// `U`, `d` and `V` expressions built from the same input.
#[derive(Debug)]
pub struct SvdFactors {
    pub u: Array2<f64>,
    pub d: Array1<f64>,
    pub v: Array2<f64>,
}

impl SvdFactors {
    /// Economy SVD of a dense matrix. Singular values come out in descending
    /// order and every component is sign-normalized so that its largest
    /// magnitude entry of `U` is positive.
    pub fn compute(matrix: &Array2<f64>) -> Result<Self, EngineError> {
        let (u, d, v) = matrix.thin_svd()?;
        let mut order: Vec<usize> = (0..d.len()).collect();
        order.sort_by(|&a, &b| d[b].total_cmp(&d[a]));
        let mut u = u.select(NdAxis(1), &order);
        let mut v = v.select(NdAxis(1), &order);
        let d = d.select(NdAxis(0), &order);
        for k in 0..d.len() {
            let pivot = u
                .column(k)
                .iter()
                .copied()
                .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
            if pivot < 0.0 {
                u.column_mut(k).mapv_inplace(|x| -x);
                v.column_mut(k).mapv_inplace(|x| -x);
            }
        }
        Ok(Self { u, d, v })
    }

    pub(crate) fn of_array(array: &MaterializedArray) -> Result<Self, EngineError> {
        let dense = to_dense(array, Absent::Nan)?;
        log::info!("svd of a {}x{} matrix", dense.nrows(), dense.ncols());
        Self::compute(&dense)
    }

    /// Rank of the economy decomposition.
    pub fn rank(&self) -> usize {
        self.d.len()
    }
}

fn component_dimension() -> Dimension {
    Dimension::unbounded(COMPONENT_DIM, 0, SYNTHETIC_CHUNK)
}

/// Output schema of one factor of `svd(input)`.
pub(crate) fn infer(input: &Schema, part: SvdPart) -> Result<Schema, EngineError> {
    let layout = MatrixLayout::of(input)?;
    let dimensions = match part {
        SvdPart::U => vec![layout.rows, component_dimension()],
        SvdPart::D => vec![component_dimension()],
        SvdPart::V => vec![layout.cols, component_dimension()],
    };
    Schema::new(
        dimensions,
        vec![Attribute::required(VALUE_ATTR, ScalarType::Float64)],
    )
}

/// Materializes one factor as an array in the output schema.
pub(crate) fn extract(factors: &SvdFactors, part: SvdPart, schema: &Schema) -> MaterializedArray {
    let cells: Vec<(Vec<i64>, Vec<Value>)> = match part {
        SvdPart::D => factors
            .d
            .iter()
            .enumerate()
            .map(|(k, &s)| (vec![k as i64], vec![Value::Float(s)]))
            .collect(),
        SvdPart::U | SvdPart::V => {
            let factor = if part == SvdPart::U { &factors.u } else { &factors.v };
            let lo = schema.dimensions[0].lo;
            factor
                .indexed_iter()
                .map(|((i, k), &x)| (vec![lo + i as i64, k as i64], vec![Value::Float(x)]))
                .collect()
        }
    };
    MaterializedArray::from_cells(schema.clone(), cells)
}
