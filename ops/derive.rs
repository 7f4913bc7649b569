use rayon::prelude::*;

use crate::error::EngineError;
use crate::expr::scalar::{BoundScalar, Scalar};
use crate::model::{Chunk, ChunkMap, MaterializedArray, Schema, Value};

/// One computed attribute appended by `derive`.
///
/// Later specs in the same call may read attributes produced by earlier ones.
/// The attribute is nullable unless [`DeriveSpec::not_null`] is requested,
/// in which case a null result fails the materialization with
/// [`EngineError::NullIntoNonNullable`].
#[derive(Clone, Debug, PartialEq)]
pub struct DeriveSpec {
    pub name: String,
    pub expr: Scalar,
    pub nullable: Option<bool>,
}

impl DeriveSpec {
    pub fn new(name: &str, expr: Scalar) -> Self {
        Self {
            name: name.to_string(),
            expr,
            nullable: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = Some(false);
        self
    }
}

struct CompiledSpec {
    name: String,
    bound: BoundScalar,
    enforce_non_null: bool,
}

fn compile(input: &Schema, specs: &[DeriveSpec], output: &Schema) -> Result<Vec<CompiledSpec>, EngineError> {
    let base = input.attributes.len();
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let visible = Schema {
                dimensions: output.dimensions.clone(),
                attributes: output.attributes[..base + i].to_vec(),
            };
            Ok(CompiledSpec {
                name: spec.name.clone(),
                bound: spec.expr.bind(&visible)?,
                enforce_non_null: !output.attributes[base + i].nullable,
            })
        })
        .collect()
}

pub(crate) fn execute(
    input: &MaterializedArray,
    specs: &[DeriveSpec],
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let compiled = compile(input.schema(), specs, schema)?;
    let chunks = input
        .chunks()
        .par_iter()
        .map(|(idx, chunk)| {
            let mut out = Chunk::default();
            for (coords, values) in chunk.iter() {
                let mut row = Vec::with_capacity(values.len() + compiled.len());
                row.extend_from_slice(values);
                for spec in &compiled {
                    let value = spec.bound.eval(coords, &row);
                    if value.is_null() && spec.enforce_non_null {
                        return Err(EngineError::NullIntoNonNullable {
                            attribute: spec.name.clone(),
                        });
                    }
                    row.push(value);
                }
                out.insert(coords.clone(), row);
            }
            Ok((idx.clone(), out))
        })
        .collect::<Result<ChunkMap, EngineError>>()?;
    Ok(MaterializedArray::from_chunks(schema.clone(), chunks))
}

/// Keeps a subset of attributes. Dimensions and chunk layout are untouched.
pub(crate) fn project(
    input: &MaterializedArray,
    names: &[String],
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let indices = names
        .iter()
        .map(|name| input.schema().require_attribute(name))
        .collect::<Result<Vec<_>, _>>()?;
    let chunks: ChunkMap = input
        .chunks()
        .par_iter()
        .map(|(idx, chunk)| {
            let projected: Chunk = chunk
                .iter()
                .map(|(coords, values)| {
                    let picked: Vec<Value> = indices.iter().map(|&i| values[i].clone()).collect();
                    (coords.clone(), picked)
                })
                .collect();
            (idx.clone(), projected)
        })
        .collect();
    Ok(MaterializedArray::from_chunks(schema.clone(), chunks))
}
