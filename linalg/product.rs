use ahash::AHashMap;
use ndarray::Array2;
use rayon::prelude::*;

use super::ProductKind;
use super::dense::{MatrixLayout, extent, from_dense, matrix_schema};
use crate::error::EngineError;
use crate::model::{Chunk, MaterializedArray, Schema};

/// Output schema: the kept axis twice, the second copy suffixed with `_t`.
pub(crate) fn infer(input: &Schema, kind: ProductKind) -> Result<Schema, EngineError> {
    let layout = MatrixLayout::of(input)?;
    let kept = match kind {
        ProductKind::Cross => layout.cols,
        ProductKind::TransposedCross => layout.rows,
    };
    let mirrored = kept.renamed(format!("{}_t", kept.name));
    matrix_schema(kept, mirrored)
}

/// `Xᵗ·X / (n-1)` or `X·Xᵗ / (n-1)` with `n` the extent of the contracted axis.
///
/// Input chunks are grouped by their index along the contracted axis; each
/// group becomes a dense block whose Gram matrix is a partial product, and
/// the partials are sum-reduced across groups. A contracted block with no
/// cells still contributes NaN, so an absent cell nulls every output entry
/// it would have touched rather than counting as zero.
pub(crate) fn execute(
    input: &MaterializedArray,
    kind: ProductKind,
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let layout = MatrixLayout::of(input.schema())?;
    let (contract_axis, keep_axis) = match kind {
        ProductKind::Cross => (0usize, 1usize),
        ProductKind::TransposedCross => (1, 0),
    };
    let dims = [&layout.rows, &layout.cols];
    let contract_dim = dims[contract_axis];
    let keep_dim = dims[keep_axis];
    let n = extent(contract_dim, input.max_coordinate(contract_axis));
    let m = extent(keep_dim, input.max_coordinate(keep_axis));

    let mut groups: AHashMap<i64, Vec<&Chunk>> = AHashMap::new();
    for (index, chunk) in input.chunks() {
        groups.entry(index[contract_axis]).or_default().push(chunk);
    }
    let block_count = if n == 0 {
        0
    } else {
        contract_dim.chunk_of(contract_dim.lo + n as i64 - 1) + 1
    };
    log::debug!(
        "product over '{}': {} contracted blocks, {}x{} output",
        contract_dim.name,
        block_count,
        m,
        m
    );

    let gram = (0..block_count)
        .into_par_iter()
        .map(|block| {
            let start = contract_dim.lo + block * contract_dim.chunk;
            let len = (contract_dim.chunk as usize).min(n - (block * contract_dim.chunk) as usize);
            let mut dense = Array2::from_elem((len, m), f64::NAN);
            for chunk in groups.get(&block).into_iter().flatten() {
                for (coords, values) in chunk.iter() {
                    let i = (coords[contract_axis] - start) as usize;
                    let j = (coords[keep_axis] - keep_dim.lo) as usize;
                    dense[(i, j)] = values[layout.value].as_f64().unwrap_or(f64::NAN);
                }
            }
            dense.t().dot(&dense)
        })
        .reduce(|| Array2::zeros((m, m)), |a, b| a + b);

    let divisor = n as f64 - 1.0;
    let scaled = if divisor > 0.0 {
        gram / divisor
    } else {
        Array2::from_elem((m, m), f64::NAN)
    };
    from_dense(scaled.view(), schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::VALUE_ATTR;
    use crate::model::{Attribute, ArrayBuilder, Dimension, ScalarType, Value};

    fn centered() -> MaterializedArray {
        let schema = Schema::new(
            vec![Dimension::new("s", 0, 2, 2), Dimension::new("v", 0, 1, 1)],
            vec![Attribute::required("x", ScalarType::Float64)],
        )
        .unwrap();
        let mut builder = ArrayBuilder::new(schema);
        for (i, row) in [[-1.0, 1.0], [0.0, 0.0], [1.0, -1.0]].iter().enumerate() {
            for (j, x) in row.iter().enumerate() {
                builder
                    .insert(vec![i as i64, j as i64], vec![Value::Float(*x)])
                    .unwrap();
            }
        }
        builder.finish()
    }

    #[test]
    fn crossprod_matches_the_sample_covariance() {
        let input = centered();
        let schema = infer(input.schema(), ProductKind::Cross).unwrap();
        assert_eq!(schema.dimensions[1].name, "v_t");
        let out = execute(&input, ProductKind::Cross, &schema).unwrap();
        let expected = [[1.0, -1.0], [-1.0, 1.0]];
        for (i, row) in expected.iter().enumerate() {
            for (j, want) in row.iter().enumerate() {
                let got = out.value(&[i as i64, j as i64], VALUE_ATTR).and_then(Value::as_f64).unwrap();
                approx::assert_abs_diff_eq!(got, *want, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn absent_cells_null_the_touched_entries() {
        let schema = Schema::new(
            vec![Dimension::new("s", 0, 1, 1), Dimension::new("v", 0, 1, 1)],
            vec![Attribute::required("x", ScalarType::Float64)],
        )
        .unwrap();
        let mut builder = ArrayBuilder::new(schema);
        builder.insert(vec![0, 0], vec![Value::Float(1.0)]).unwrap();
        builder.insert(vec![1, 0], vec![Value::Float(2.0)]).unwrap();
        builder.insert(vec![0, 1], vec![Value::Float(3.0)]).unwrap();
        let input = builder.finish();
        let out_schema = matrix_schema(Dimension::new("v", 0, 1, 1), Dimension::new("v_t", 0, 1, 1)).unwrap();
        let out = execute(&input, ProductKind::Cross, &out_schema).unwrap();
        assert_eq!(out.value(&[0, 0], VALUE_ATTR), Some(&Value::Float(5.0)));
        assert_eq!(out.value(&[0, 1], VALUE_ATTR), Some(&Value::Null));
        assert_eq!(out.value(&[1, 1], VALUE_ATTR), Some(&Value::Null));
    }
}
