use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use super::schema::Schema;
use super::value::Value;
use crate::error::EngineError;

pub type Coords = Vec<i64>;

/// Cells of one chunk, ordered by coordinate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Chunk {
    cells: BTreeMap<Coords, Vec<Value>>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, coords: &[i64]) -> Option<&[Value]> {
        self.cells.get(coords).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Coords, &[Value])> {
        self.cells.iter().map(|(c, v)| (c, v.as_slice()))
    }

    pub(crate) fn insert(&mut self, coords: Coords, values: Vec<Value>) -> Option<Vec<Value>> {
        self.cells.insert(coords, values)
    }

    pub(crate) fn entry(&mut self, coords: Coords) -> Entry<'_, Coords, Vec<Value>> {
        self.cells.entry(coords)
    }
}

impl FromIterator<(Coords, Vec<Value>)> for Chunk {
    fn from_iter<T: IntoIterator<Item = (Coords, Vec<Value>)>>(iter: T) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

/// Chunks keyed by chunk index (one component per dimension).
pub type ChunkMap = BTreeMap<Vec<i64>, Chunk>;

/// One exported cell: its coordinate tuple and its attribute values.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub coords: Coords,
    pub values: Vec<Value>,
}

/// The realized cell set of an array. Immutable once built; renaming swaps
/// the schema while sharing the chunk storage.
#[derive(Clone, Debug)]
pub struct MaterializedArray {
    schema: Schema,
    chunks: Arc<ChunkMap>,
}

impl MaterializedArray {
    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            chunks: Arc::new(ChunkMap::new()),
        }
    }

    pub(crate) fn from_chunks(schema: Schema, mut chunks: ChunkMap) -> Self {
        chunks.retain(|_, chunk| !chunk.is_empty());
        Self {
            schema,
            chunks: Arc::new(chunks),
        }
    }

    /// Buckets loose cells into their chunks. Callers guarantee the cells
    /// already satisfy the schema.
    pub(crate) fn from_cells(schema: Schema, cells: impl IntoIterator<Item = (Coords, Vec<Value>)>) -> Self {
        let mut chunks = ChunkMap::new();
        for (coords, values) in cells {
            let chunk = schema.chunk_of(&coords);
            chunks.entry(chunk).or_default().insert(coords, values);
        }
        Self::from_chunks(schema, chunks)
    }

    pub(crate) fn with_schema(&self, schema: Schema) -> Self {
        Self {
            schema,
            chunks: Arc::clone(&self.chunks),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn chunks(&self) -> &ChunkMap {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn cell_count(&self) -> usize {
        self.chunks.values().map(Chunk::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, coords: &[i64]) -> Option<&[Value]> {
        let chunk = self.schema.chunk_of(coords);
        self.chunks.get(&chunk)?.get(coords)
    }

    /// Value of one attribute at one coordinate; `None` when the cell is absent.
    pub fn value(&self, coords: &[i64], attribute: &str) -> Option<&Value> {
        let idx = self.schema.attribute_index(attribute)?;
        self.get(coords).map(|values| &values[idx])
    }

    /// Cells in chunk order. Within a chunk the order is by coordinate.
    pub fn iter(&self) -> impl Iterator<Item = (&Coords, &[Value])> {
        self.chunks.values().flat_map(Chunk::iter)
    }

    /// Every cell, globally ordered by coordinate tuple.
    pub fn rows(&self) -> Vec<Row> {
        let mut cells: Vec<(&Coords, &[Value])> = self.iter().collect();
        if self.chunks.len() > 1 {
            cells.sort_unstable_by(|a, b| a.0.cmp(b.0));
        }
        cells
            .into_iter()
            .map(|(coords, values)| Row {
                coords: coords.clone(),
                values: values.to_vec(),
            })
            .collect()
    }

    /// Largest coordinate present along dimension `dim`, if any cell exists.
    pub fn max_coordinate(&self, dim: usize) -> Option<i64> {
        self.iter().map(|(coords, _)| coords[dim]).max()
    }

    /// Whether two arrays hold the same cells under the same schema.
    pub fn same_content(&self, other: &Self) -> bool {
        self.schema == other.schema && self.rows() == other.rows()
    }
}

/// Validating constructor for arrays loaded from outside the engine.
#[derive(Debug)]
pub struct ArrayBuilder {
    schema: Schema,
    chunks: ChunkMap,
}

impl ArrayBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            chunks: ChunkMap::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Inserts one cell after checking range, arity, type and nullability.
    pub fn insert(&mut self, coords: Coords, values: Vec<Value>) -> Result<(), EngineError> {
        self.schema.check_coords(&coords)?;
        if values.len() != self.schema.attributes.len() {
            return Err(EngineError::TypeMismatch(format!(
                "cell {coords:?} has {} values but the schema declares {} attributes",
                values.len(),
                self.schema.attributes.len()
            )));
        }
        for (attr, value) in self.schema.attributes.iter().zip(&values) {
            if value.is_null() {
                if !attr.nullable {
                    return Err(EngineError::NullIntoNonNullable {
                        attribute: attr.name.clone(),
                    });
                }
            } else if !value.conforms_to(attr.ty) {
                return Err(EngineError::TypeMismatch(format!(
                    "attribute '{}' expects {} but received {value:?}",
                    attr.name, attr.ty
                )));
            }
        }
        let chunk = self.schema.chunk_of(&coords);
        match self.chunks.entry(chunk).or_default().entry(coords) {
            Entry::Occupied(slot) => Err(EngineError::DuplicateCell(slot.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(values);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.values().map(Chunk::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn finish(self) -> MaterializedArray {
        MaterializedArray::from_chunks(self.schema, self.chunks)
    }
}
