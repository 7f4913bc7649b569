use ahash::AHashMap;
use rayon::prelude::*;

use super::{Axis, SweepOp};
use super::dense::MatrixLayout;
use crate::error::EngineError;
use crate::model::{Chunk, ChunkMap, MaterializedArray, ScalarType, Schema, Value};

/// Output schema of a sweep: the matrix dimensions with its single attribute
/// turned into a nullable float. The vector must be one-dimensional, indexed
/// by the matrix dimension at `axis`, and carry one numeric attribute.
pub(crate) fn infer(matrix: &Schema, axis: Axis, vector: &Schema) -> Result<Schema, EngineError> {
    let layout = MatrixLayout::of(matrix)?;
    let along = match axis {
        Axis::Rows => &layout.rows,
        Axis::Columns => &layout.cols,
    };
    match (vector.dimensions.as_slice(), vector.attributes.as_slice()) {
        ([dim], [attr]) if dim.name == along.name && attr.ty.is_numeric() => {}
        _ => {
            return Err(EngineError::schema(format!(
                "sweep along '{}' needs a vector indexed by '{}' with one numeric attribute, found {vector}",
                along.name, along.name
            )));
        }
    }
    let mut out = matrix.clone();
    out.attributes[0].ty = ScalarType::Float64;
    out.attributes[0].nullable = true;
    Ok(out)
}

/// Combines every matrix cell with the vector entry at its `axis` coordinate.
/// A missing or null vector entry, or a zero divisor, yields null.
pub(crate) fn execute(
    matrix: &MaterializedArray,
    axis: Axis,
    vector: &MaterializedArray,
    op: SweepOp,
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let layout = MatrixLayout::of(matrix.schema())?;
    let position = match axis {
        Axis::Rows => 0,
        Axis::Columns => 1,
    };
    let lookup: AHashMap<i64, f64> = vector
        .iter()
        .filter_map(|(coords, values)| values[0].as_f64().map(|v| (coords[0], v)))
        .collect();

    let chunks: ChunkMap = matrix
        .chunks()
        .par_iter()
        .map(|(idx, chunk)| {
            let swept: Chunk = chunk
                .iter()
                .map(|(coords, values)| {
                    let out = match (values[layout.value].as_f64(), lookup.get(&coords[position])) {
                        (Some(x), Some(&v)) => apply(op, x, v),
                        _ => Value::Null,
                    };
                    (coords.clone(), vec![out])
                })
                .collect();
            (idx.clone(), swept)
        })
        .collect();
    Ok(MaterializedArray::from_chunks(schema.clone(), chunks))
}

fn apply(op: SweepOp, x: f64, v: f64) -> Value {
    match op {
        SweepOp::Subtract => Value::float(x - v),
        SweepOp::Add => Value::float(x + v),
        SweepOp::Multiply => Value::float(x * v),
        SweepOp::Divide if v == 0.0 => Value::Null,
        SweepOp::Divide => Value::float(x / v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArrayBuilder, Attribute, Dimension};

    fn matrix() -> MaterializedArray {
        let schema = Schema::new(
            vec![Dimension::new("s", 0, 1, 1), Dimension::new("v", 0, 1, 1)],
            vec![Attribute::required("g", ScalarType::Int64)],
        )
        .unwrap();
        let mut builder = ArrayBuilder::new(schema);
        builder.insert(vec![0, 0], vec![Value::Int(2)]).unwrap();
        builder.insert(vec![0, 1], vec![Value::Int(4)]).unwrap();
        builder.insert(vec![1, 1], vec![Value::Int(6)]).unwrap();
        builder.finish()
    }

    fn vector(entries: &[(i64, f64)]) -> MaterializedArray {
        let schema = Schema::new(
            vec![Dimension::new("v", 0, 1, 1)],
            vec![Attribute::nullable("value", ScalarType::Float64)],
        )
        .unwrap();
        let mut builder = ArrayBuilder::new(schema);
        for (i, v) in entries {
            builder.insert(vec![*i], vec![Value::Float(*v)]).unwrap();
        }
        builder.finish()
    }

    #[test]
    fn division_by_zero_yields_null() {
        let m = matrix();
        let v = vector(&[(0, 0.0), (1, 2.0)]);
        let schema = infer(m.schema(), Axis::Columns, v.schema()).unwrap();
        let out = execute(&m, Axis::Columns, &v, SweepOp::Divide, &schema).unwrap();
        assert_eq!(out.value(&[0, 0], "g"), Some(&Value::Null));
        assert_eq!(out.value(&[1, 1], "g"), Some(&Value::Float(3.0)));
    }

    #[test]
    fn vector_must_match_the_swept_axis() {
        let m = matrix();
        let v = vector(&[(0, 1.0)]);
        assert!(infer(m.schema(), Axis::Rows, v.schema()).is_err());
        assert!(infer(m.schema(), Axis::Columns, v.schema()).is_ok());
    }

    #[test]
    fn missing_vector_entries_yield_null() {
        let m = matrix();
        let v = vector(&[(1, 1.0)]);
        let schema = infer(m.schema(), Axis::Columns, v.schema()).unwrap();
        let out = execute(&m, Axis::Columns, &v, SweepOp::Subtract, &schema).unwrap();
        assert_eq!(out.value(&[0, 0], "g"), Some(&Value::Null));
        assert_eq!(out.value(&[0, 1], "g"), Some(&Value::Float(3.0)));
    }
}
