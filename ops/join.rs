use ahash::{AHashMap, RandomState};
use rayon::prelude::*;
use std::hash::BuildHasher;

use crate::error::EngineError;
use crate::model::{Coords, KeyPart, MaterializedArray, Schema, Value};

/// Maps each right-hand dimension to its position among the left dimensions.
fn dimension_mapping(left: &Schema, right: &Schema) -> Result<Vec<usize>, EngineError> {
    right
        .dimensions
        .iter()
        .map(|dim| left.require_dimension(&dim.name))
        .collect()
}

/// Dimension-aligned inner join.
///
/// When both sides have the same dimensions this is a coordinate-wise match.
/// When the right side carries a subset of the left's dimensions its cells
/// are broadcast along the missing ones. Either way an output cell exists
/// only where both inputs have one, inside the intersected ranges.
pub(crate) fn execute(
    left: &MaterializedArray,
    right: &MaterializedArray,
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let mapping = dimension_mapping(left.schema(), right.schema())?;
    let cells: Vec<(Coords, Vec<Value>)> = left
        .chunks()
        .par_iter()
        .flat_map_iter(|(_, chunk)| {
            let mapping = &mapping;
            chunk.iter().filter_map(move |(coords, values)| {
                if !schema
                    .dimensions
                    .iter()
                    .zip(coords.iter())
                    .all(|(dim, &c)| dim.contains(c))
                {
                    return None;
                }
                let projected: Vec<i64> = mapping.iter().map(|&i| coords[i]).collect();
                let matched = right.get(&projected)?;
                let mut row = Vec::with_capacity(values.len() + matched.len());
                row.extend_from_slice(values);
                row.extend_from_slice(matched);
                Some((coords.clone(), row))
            })
        })
        .collect();
    Ok(MaterializedArray::from_cells(schema.clone(), cells))
}

struct KeyedCell<'a> {
    key: Vec<KeyPart>,
    coords: &'a Coords,
    values: &'a [Value],
}

/// Redistributes cells into `partitions` buckets by key hash. Cells with a
/// null key component can never match and are dropped here.
fn shuffle<'a>(
    array: &'a MaterializedArray,
    key_indices: &[usize],
    partitions: usize,
    hasher: &RandomState,
) -> Vec<Vec<KeyedCell<'a>>> {
    array
        .chunks()
        .par_iter()
        .fold(
            || (0..partitions).map(|_| Vec::new()).collect::<Vec<_>>(),
            |mut buckets, (_, chunk)| {
                for (coords, values) in chunk.iter() {
                    let key: Vec<KeyPart> = key_indices.iter().map(|&i| values[i].key()).collect();
                    if key.iter().any(|part| matches!(part, KeyPart::Null)) {
                        continue;
                    }
                    let bucket = (hasher.hash_one(&key) as usize) % partitions;
                    buckets[bucket].push(KeyedCell {
                        key,
                        coords,
                        values,
                    });
                }
                buckets
            },
        )
        .reduce(
            || (0..partitions).map(|_| Vec::new()).collect::<Vec<_>>(),
            |mut acc, other| {
                for (into, from) in acc.iter_mut().zip(other) {
                    into.extend(from);
                }
                acc
            },
        )
}

/// Inner equi-join on attribute keys.
///
/// Both sides are hash-partitioned on the key, each partition is joined
/// independently, and the matches are numbered along a synthetic `row`
/// dimension in (left coordinate, right coordinate) order so the output is
/// identical regardless of partitioning. The right-hand key attributes are
/// dropped from the output since they equal the left-hand ones.
pub(crate) fn execute_on_keys(
    left: &MaterializedArray,
    right: &MaterializedArray,
    left_keys: &[String],
    right_keys: &[String],
    partitions: usize,
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let left_idx = left_keys
        .iter()
        .map(|k| left.schema().require_attribute(k))
        .collect::<Result<Vec<_>, _>>()?;
    let right_idx = right_keys
        .iter()
        .map(|k| right.schema().require_attribute(k))
        .collect::<Result<Vec<_>, _>>()?;
    let right_kept: Vec<usize> = (0..right.schema().attributes.len())
        .filter(|i| !right_idx.contains(i))
        .collect();

    let partitions = partitions.max(1);
    let hasher = RandomState::new();
    let left_parts = shuffle(left, &left_idx, partitions, &hasher);
    let right_parts = shuffle(right, &right_idx, partitions, &hasher);

    let mut matches: Vec<(&Coords, &Coords, Vec<Value>)> = left_parts
        .into_par_iter()
        .zip(right_parts.into_par_iter())
        .flat_map_iter(|(lhs, rhs)| {
            let mut table: AHashMap<Vec<KeyPart>, Vec<&KeyedCell<'_>>> = AHashMap::new();
            for cell in &rhs {
                table.entry(cell.key.clone()).or_default().push(cell);
            }
            let mut out = Vec::new();
            for l in &lhs {
                let Some(candidates) = table.get(&l.key) else {
                    continue;
                };
                for r in candidates {
                    let mut row = Vec::with_capacity(
                        l.coords.len() + l.values.len() + r.coords.len() + right_kept.len(),
                    );
                    row.extend(l.coords.iter().map(|&c| Value::Int(c)));
                    row.extend_from_slice(l.values);
                    row.extend(r.coords.iter().map(|&c| Value::Int(c)));
                    row.extend(right_kept.iter().map(|&i| r.values[i].clone()));
                    out.push((l.coords, r.coords, row));
                }
            }
            out
        })
        .collect();

    matches.par_sort_unstable_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));
    let cells = matches
        .into_iter()
        .enumerate()
        .map(|(row_no, (_, _, values))| (vec![row_no as i64], values));
    Ok(MaterializedArray::from_cells(schema.clone(), cells))
}

/// Union of two arrays with identical attributes; the left side wins where
/// both hold a cell.
pub(crate) fn merge(
    left: &MaterializedArray,
    right: &MaterializedArray,
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let mapping = dimension_mapping(left.schema(), right.schema())?;
    let from_right: Vec<(Coords, Vec<Value>)> = right
        .chunks()
        .par_iter()
        .flat_map_iter(|(_, chunk)| {
            let mapping = &mapping;
            chunk.iter().filter_map(move |(coords, values)| {
                let mut in_left_order = vec![0i64; coords.len()];
                for (ri, &li) in mapping.iter().enumerate() {
                    in_left_order[li] = coords[ri];
                }
                if left.get(&in_left_order).is_some() {
                    return None;
                }
                Some((in_left_order, values.to_vec()))
            })
        })
        .collect();
    let cells = left
        .iter()
        .map(|(coords, values)| (coords.clone(), values.to_vec()))
        .chain(from_right);
    Ok(MaterializedArray::from_cells(schema.clone(), cells))
}
