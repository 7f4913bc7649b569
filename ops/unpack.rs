use crate::error::EngineError;
use crate::model::{Attribute, Dimension, MaterializedArray, ScalarType, Schema, Value, SYNTHETIC_CHUNK};

/// Output schema of `unpack`: one synthetic dimension, then every source
/// dimension as a required `Int64` attribute, then the source attributes.
pub(crate) fn infer(input: &Schema, dimension: &str) -> Result<Schema, EngineError> {
    let attributes = input
        .dimensions
        .iter()
        .map(|d| Attribute::required(&d.name, ScalarType::Int64))
        .chain(input.attributes.iter().cloned())
        .collect();
    Schema::new(vec![Dimension::unbounded(dimension, 0, SYNTHETIC_CHUNK)], attributes)
}

/// Flattens the array into a dense 0-based sequence in global coordinate order.
pub(crate) fn execute(input: &MaterializedArray, schema: &Schema) -> Result<MaterializedArray, EngineError> {
    let cells = input.rows().into_iter().enumerate().map(|(position, row)| {
        let mut values: Vec<Value> = row.coords.iter().map(|&c| Value::Int(c)).collect();
        values.extend(row.values);
        (vec![position as i64], values)
    });
    Ok(MaterializedArray::from_cells(schema.clone(), cells))
}
