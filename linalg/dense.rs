use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use super::VALUE_ATTR;
use crate::error::EngineError;
use crate::model::{Attribute, Dimension, MaterializedArray, ScalarType, Schema, Value};

/// What a dense conversion writes where the sparse array has no cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Absent {
    /// Missing cells become NaN, which every downstream product turns into null.
    Nan,
    /// An explicitly declared fill value.
    Fill(f64),
}

impl Absent {
    fn value(self) -> f64 {
        match self {
            Self::Nan => f64::NAN,
            Self::Fill(v) => v,
        }
    }
}

/// Positions of the two axes and the value attribute of a matrix-shaped array.
#[derive(Clone, Debug)]
pub(crate) struct MatrixLayout {
    pub rows: Dimension,
    pub cols: Dimension,
    pub value: usize,
}

impl MatrixLayout {
    /// A matrix is a two-dimensional array with exactly one numeric attribute.
    pub(crate) fn of(schema: &Schema) -> Result<Self, EngineError> {
        if schema.ndim() != 2 {
            return Err(EngineError::schema(format!(
                "a matrix needs exactly two dimensions, found {schema}"
            )));
        }
        match schema.attributes.as_slice() {
            [attr] if attr.ty.is_numeric() => Ok(Self {
                rows: schema.dimensions[0].clone(),
                cols: schema.dimensions[1].clone(),
                value: 0,
            }),
            _ => Err(EngineError::schema(format!(
                "a matrix needs exactly one numeric attribute, found {schema}"
            ))),
        }
    }
}

/// Number of coordinates along `dim` spanned by the dense form: the declared
/// range when bounded, otherwise up to the largest coordinate present.
pub(crate) fn extent(dim: &Dimension, present_max: Option<i64>) -> usize {
    if dim.is_bounded() {
        (dim.hi - dim.lo + 1) as usize
    } else {
        present_max.map_or(0, |hi| (hi - dim.lo + 1).max(0) as usize)
    }
}

/// Dense `rows x cols` copy of a matrix-shaped array. Present nulls and
/// absent cells both take the `absent` value.
pub fn to_dense(array: &MaterializedArray, absent: Absent) -> Result<Array2<f64>, EngineError> {
    let layout = MatrixLayout::of(array.schema())?;
    let rows = extent(&layout.rows, array.max_coordinate(0));
    let cols = extent(&layout.cols, array.max_coordinate(1));
    let mut dense = Array2::from_elem((rows, cols), absent.value());
    for (coords, values) in array.iter() {
        let i = (coords[0] - layout.rows.lo) as usize;
        let j = (coords[1] - layout.cols.lo) as usize;
        dense[(i, j)] = values[layout.value].as_f64().unwrap_or_else(|| absent.value());
    }
    Ok(dense)
}

/// Schema of a dense result: the two given dimensions and one nullable
/// `value` attribute.
pub(crate) fn matrix_schema(rows: Dimension, cols: Dimension) -> Result<Schema, EngineError> {
    Schema::new(
        vec![rows, cols],
        vec![Attribute::nullable(VALUE_ATTR, ScalarType::Float64)],
    )
}

/// Writes every entry of `values` as a present cell, offset by each
/// dimension's lower bound. Non-finite entries become null cells.
pub fn from_dense(values: ArrayView2<'_, f64>, schema: &Schema) -> Result<MaterializedArray, EngineError> {
    let (row_lo, col_lo) = match schema.dimensions.as_slice() {
        [r, c] => (r.lo, c.lo),
        _ => return Err(EngineError::schema("dense results are two-dimensional")),
    };
    let cells: Vec<(Vec<i64>, Vec<Value>)> = values
        .outer_iter()
        .into_par_iter()
        .enumerate()
        .flat_map_iter(|(i, row)| {
            row.into_iter()
                .enumerate()
                .map(|(j, &v)| {
                    (
                        vec![row_lo + i as i64, col_lo + j as i64],
                        vec![Value::float(v)],
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect();
    for (coords, _) in &cells {
        schema.check_coords(coords)?;
    }
    Ok(MaterializedArray::from_cells(schema.clone(), cells))
}
