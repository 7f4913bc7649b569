use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::ScalarType;
use crate::error::EngineError;

/// Upper bound used for dimensions whose extent is only known after
/// evaluation (aggregate groups, unpack positions, SVD components).
pub const UNBOUNDED: i64 = i64::MAX;

/// Chunk length given to dimensions the engine synthesizes itself.
pub const SYNTHETIC_CHUNK: i64 = 4096;

/// An integer coordinate axis with an inclusive range and a chunk length.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub lo: i64,
    pub hi: i64,
    pub chunk: i64,
    #[serde(default)]
    pub overlap: i64,
}

impl Dimension {
    pub fn new(name: impl Into<String>, lo: i64, hi: i64, chunk: i64) -> Self {
        Self {
            name: name.into(),
            lo,
            hi,
            chunk: chunk.max(1),
            overlap: 0,
        }
    }

    pub fn unbounded(name: impl Into<String>, lo: i64, chunk: i64) -> Self {
        Self::new(name, lo, UNBOUNDED, chunk)
    }

    pub fn is_bounded(&self) -> bool {
        self.hi != UNBOUNDED
    }

    #[inline]
    pub fn contains(&self, coordinate: i64) -> bool {
        coordinate >= self.lo && coordinate <= self.hi
    }

    /// Index of the chunk holding `coordinate` along this axis.
    #[inline]
    pub fn chunk_of(&self, coordinate: i64) -> i64 {
        (coordinate - self.lo).div_euclid(self.chunk)
    }

    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub(crate) fn check(&self, coordinate: i64) -> Result<(), EngineError> {
        if self.contains(coordinate) {
            Ok(())
        } else {
            Err(EngineError::DimensionOverflow {
                dimension: self.name.clone(),
                coordinate,
                lo: self.lo,
                hi: self.hi,
            })
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bounded() {
            write!(f, "{}={}:{},{}", self.name, self.lo, self.hi, self.chunk)
        } else {
            write!(f, "{}={}:*,{}", self.name, self.lo, self.chunk)
        }
    }
}

/// A named, typed payload field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ScalarType,
    pub nullable: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: ScalarType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
        }
    }

    pub fn nullable(name: impl Into<String>, ty: ScalarType) -> Self {
        Self::new(name, ty, true)
    }

    pub fn required(name: impl Into<String>, ty: ScalarType) -> Self {
        Self::new(name, ty, false)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let null = if self.nullable { "" } else { " not null" };
        write!(f, "{}:{}{}", self.name, self.ty, null)
    }
}

/// Ordered dimensions plus ordered attributes.
///
/// Equality is structural: identical dimension ranges and chunking and
/// identical attribute name, type and nullability lists. Array names are
/// not part of a schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    pub dimensions: Vec<Dimension>,
    pub attributes: Vec<Attribute>,
}

impl Schema {
    pub fn new(dimensions: Vec<Dimension>, attributes: Vec<Attribute>) -> Result<Self, EngineError> {
        if dimensions.is_empty() {
            return Err(EngineError::schema("an array needs at least one dimension"));
        }
        let schema = Self {
            dimensions,
            attributes,
        };
        schema.check_unique_names()?;
        for dim in &schema.dimensions {
            if dim.lo > dim.hi {
                return Err(EngineError::schema(format!(
                    "dimension '{}' has an empty range {}..{}",
                    dim.name, dim.lo, dim.hi
                )));
            }
        }
        Ok(schema)
    }

    fn check_unique_names(&self) -> Result<(), EngineError> {
        let mut seen = std::collections::HashSet::new();
        let names = self
            .dimensions
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.attributes.iter().map(|a| a.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(EngineError::schema(format!(
                    "name '{name}' is used more than once"
                )));
            }
        }
        Ok(())
    }

    pub fn ndim(&self) -> usize {
        self.dimensions.len()
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn require_dimension(&self, name: &str) -> Result<usize, EngineError> {
        self.dimension_index(name)
            .ok_or_else(|| EngineError::schema(format!("unknown dimension '{name}' in {self}")))
    }

    pub fn require_attribute(&self, name: &str) -> Result<usize, EngineError> {
        self.attribute_index(name)
            .ok_or_else(|| EngineError::schema(format!("unknown attribute '{name}' in {self}")))
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Same schema with one attribute renamed. No cells move.
    pub fn rename_attribute(&self, from: &str, to: &str) -> Result<Self, EngineError> {
        let idx = self.require_attribute(from)?;
        let mut renamed = self.clone();
        renamed.attributes[idx].name = to.to_string();
        renamed.check_unique_names()?;
        Ok(renamed)
    }

    /// Same schema with one dimension renamed. No cells move.
    pub fn rename_dimension(&self, from: &str, to: &str) -> Result<Self, EngineError> {
        let idx = self.require_dimension(from)?;
        let mut renamed = self.clone();
        renamed.dimensions[idx].name = to.to_string();
        renamed.check_unique_names()?;
        Ok(renamed)
    }

    /// Keeps only the named attributes, in the order given.
    pub fn project(&self, names: &[&str]) -> Result<Self, EngineError> {
        let attributes = names
            .iter()
            .map(|name| {
                self.attribute(name)
                    .cloned()
                    .ok_or_else(|| EngineError::schema(format!("cannot project unknown attribute '{name}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(self.dimensions.clone(), attributes)
    }

    /// Appends attributes, rejecting any name already present.
    pub fn with_attributes(&self, extra: impl IntoIterator<Item = Attribute>) -> Result<Self, EngineError> {
        let mut attributes = self.attributes.clone();
        attributes.extend(extra);
        Self::new(self.dimensions.clone(), attributes)
    }

    /// Chunk index of a cell coordinate.
    pub fn chunk_of(&self, coords: &[i64]) -> Vec<i64> {
        self.dimensions
            .iter()
            .zip(coords)
            .map(|(dim, &c)| dim.chunk_of(c))
            .collect()
    }

    pub fn check_coords(&self, coords: &[i64]) -> Result<(), EngineError> {
        if coords.len() != self.dimensions.len() {
            return Err(EngineError::TypeMismatch(format!(
                "coordinate {coords:?} has {} components but the array has {} dimensions",
                coords.len(),
                self.dimensions.len()
            )));
        }
        for (dim, &c) in self.dimensions.iter().zip(coords) {
            dim.check(c)?;
        }
        Ok(())
    }

    /// Dimension-range relaxation used by joins: same names, overlapping
    /// ranges intersected, chunking taken from `self`.
    pub fn aligned_dimensions(&self, other: &[Dimension]) -> Result<Vec<Dimension>, EngineError> {
        other
            .iter()
            .map(|theirs| {
                let mine = self.dimension(&theirs.name).ok_or_else(|| {
                    EngineError::schema(format!(
                        "dimension '{}' is not shared by both join inputs",
                        theirs.name
                    ))
                })?;
                let lo = mine.lo.max(theirs.lo);
                let hi = mine.hi.min(theirs.hi);
                if lo > hi {
                    return Err(EngineError::schema(format!(
                        "dimension '{}' ranges do not overlap",
                        theirs.name
                    )));
                }
                Ok(Dimension {
                    lo,
                    hi,
                    ..mine.clone()
                })
            })
            .collect()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<")?;
        for (i, attr) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{attr}")?;
        }
        f.write_str("> [")?;
        for (i, dim) in self.dimensions.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}
