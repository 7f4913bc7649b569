use rayon::prelude::*;

use crate::error::EngineError;
use crate::expr::scalar::Scalar;
use crate::model::{Chunk, ChunkMap, MaterializedArray, Schema};

/// Keeps the cells for which `predicate` is true. Chunk-local; a null
/// predicate result drops the cell.
pub(crate) fn execute(
    input: &MaterializedArray,
    predicate: &Scalar,
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let bound = predicate.bind(input.schema())?;
    let chunks: ChunkMap = input
        .chunks()
        .par_iter()
        .map(|(idx, chunk)| {
            let kept: Chunk = chunk
                .iter()
                .filter(|(coords, values)| bound.test(coords, values))
                .map(|(coords, values)| (coords.clone(), values.to_vec()))
                .collect();
            (idx.clone(), kept)
        })
        .collect();
    Ok(MaterializedArray::from_chunks(schema.clone(), chunks))
}
