use itertools::Itertools;
use rayon::prelude::*;

use crate::error::EngineError;
use crate::model::{Attribute, Coords, Dimension, MaterializedArray, ScalarType, Schema, Value};

/// How colliding source cells are folded into one target cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Combine {
    /// Nulls are skipped; a target whose sources are all null stays null.
    /// Overflow makes the target null regardless of later cells.
    Sum,
    Min,
    Max,
    /// Value of the source cell with the smallest source coordinate.
    First,
    /// Value of the source cell with the largest source coordinate.
    Last,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetDimension {
    pub dimension: Dimension,
    /// Source dimension or `Int64` attribute supplying the coordinate.
    pub source: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetAttribute {
    pub name: String,
    /// Source attribute, or a source dimension exposed as an `Int64` value.
    pub source: String,
    pub combine: Combine,
}

/// Target coordinate space and per-attribute combine functions.
///
/// Every attribute must name its combine function; there is no implicit
/// default for collisions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RedimensionSpec {
    pub dimensions: Vec<TargetDimension>,
    pub attributes: Vec<TargetAttribute>,
}

impl RedimensionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target dimension whose coordinate comes from `source`.
    pub fn dimension(mut self, dimension: Dimension, source: &str) -> Self {
        self.dimensions.push(TargetDimension {
            dimension,
            source: source.to_string(),
        });
        self
    }

    /// Adds a target attribute carried over from the source field of the same name.
    pub fn attribute(self, name: &str, combine: Combine) -> Self {
        self.attribute_from(name, name, combine)
    }

    pub fn attribute_from(mut self, name: &str, source: &str, combine: Combine) -> Self {
        self.attributes.push(TargetAttribute {
            name: name.to_string(),
            source: source.to_string(),
            combine,
        });
        self
    }
}

/// Where a target field reads its value from in a source cell.
#[derive(Clone, Copy, Debug)]
enum Field {
    Dim(usize),
    Attr(usize),
}

impl Field {
    fn resolve(schema: &Schema, name: &str) -> Result<(Self, Attribute), EngineError> {
        if let Some(i) = schema.dimension_index(name) {
            return Ok((Self::Dim(i), Attribute::required(name, ScalarType::Int64)));
        }
        let i = schema.require_attribute(name)?;
        Ok((Self::Attr(i), schema.attributes[i].clone()))
    }

    fn read(self, coords: &[i64], values: &[Value]) -> Value {
        match self {
            Self::Dim(i) => Value::Int(coords[i]),
            Self::Attr(i) => values[i].clone(),
        }
    }
}

/// Output schema of a redimension over `input`.
pub(crate) fn infer(input: &Schema, spec: &RedimensionSpec) -> Result<Schema, EngineError> {
    if spec.dimensions.is_empty() {
        return Err(EngineError::schema("redimension needs at least one target dimension"));
    }
    for target in &spec.dimensions {
        let (_, source) = Field::resolve(input, &target.source)?;
        if source.ty != ScalarType::Int64 {
            return Err(EngineError::TypeMismatch(format!(
                "dimension '{}' cannot take coordinates from {} attribute '{}'",
                target.dimension.name, source.ty, target.source
            )));
        }
    }
    let attributes = spec
        .attributes
        .iter()
        .map(|target| {
            let (_, source) = Field::resolve(input, &target.source)?;
            if target.combine == Combine::Sum && !source.ty.is_numeric() {
                return Err(EngineError::TypeMismatch(format!(
                    "cannot sum {} attribute '{}'",
                    source.ty, target.source
                )));
            }
            let nullable = source.nullable || target.combine == Combine::Sum;
            Ok(Attribute::new(&target.name, source.ty, nullable))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let dimensions = spec.dimensions.iter().map(|t| t.dimension.clone()).collect();
    Schema::new(dimensions, attributes)
}

/// Folds `next` into `acc`. A sum that overflows sets `overflowed`, after
/// which the slot stays null for every later cell of the same target.
fn fold(combine: Combine, acc: &mut Value, overflowed: &mut bool, next: &Value) {
    match combine {
        Combine::First => {}
        Combine::Last => *acc = next.clone(),
        Combine::Sum => {
            if *overflowed || next.is_null() {
                return;
            }
            let sum = match (&*acc, next) {
                (Value::Null, v) => Some(v.clone()),
                (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int),
                (a, b) => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => Some(Value::float(x + y)).filter(|v| !v.is_null()),
                    _ => None,
                },
            };
            match sum {
                Some(value) => *acc = value,
                None => {
                    *acc = Value::Null;
                    *overflowed = true;
                }
            }
        }
        Combine::Min | Combine::Max => {
            if next.is_null() {
                return;
            }
            let wanted = if combine == Combine::Min {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            };
            if acc.is_null() || next.partial_order(acc) == Some(wanted) {
                *acc = next.clone();
            }
        }
    }
}

/// Remaps every source cell into the target coordinate space, coalescing
/// collisions with the declared combine functions.
///
/// Source cells with a null coordinate value are dropped. A coordinate
/// outside a target dimension's range fails the whole materialization with
/// [`EngineError::DimensionOverflow`].
pub(crate) fn execute(
    input: &MaterializedArray,
    spec: &RedimensionSpec,
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let source = input.schema();
    let dim_fields = spec
        .dimensions
        .iter()
        .map(|t| Field::resolve(source, &t.source).map(|(f, _)| f))
        .collect::<Result<Vec<_>, _>>()?;
    let attr_fields = spec
        .attributes
        .iter()
        .map(|t| Field::resolve(source, &t.source).map(|(f, _)| f))
        .collect::<Result<Vec<_>, _>>()?;

    let chunked: Vec<Vec<(Coords, &Coords, Vec<Value>)>> = input
        .chunks()
        .par_iter()
        .map(|(_, chunk)| {
            let mut out = Vec::with_capacity(chunk.len());
            'cells: for (coords, values) in chunk.iter() {
                let mut target = Vec::with_capacity(dim_fields.len());
                for (field, dim) in dim_fields.iter().zip(&schema.dimensions) {
                    let Some(c) = field.read(coords, values).as_i64() else {
                        continue 'cells;
                    };
                    dim.check(c)?;
                    target.push(c);
                }
                let carried = attr_fields.iter().map(|f| f.read(coords, values)).collect();
                out.push((target, coords, carried));
            }
            Ok::<_, EngineError>(out)
        })
        .collect::<Result<_, EngineError>>()?;
    let mut cells: Vec<(Coords, &Coords, Vec<Value>)> = chunked.into_iter().flatten().collect();
    cells.par_sort_unstable_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    let width = spec.attributes.len();
    let merged: Vec<(Coords, Vec<Value>)> = cells
        .into_iter()
        .map(|(target, _, values)| (target, values, vec![false; width]))
        .coalesce(|(target, mut acc, mut overflowed), (next_target, next, next_overflowed)| {
            if target == next_target {
                let slots = acc.iter_mut().zip(overflowed.iter_mut());
                for (((slot, flag), value), attr) in slots.zip(&next).zip(&spec.attributes) {
                    fold(attr.combine, slot, flag, value);
                }
                Ok((target, acc, overflowed))
            } else {
                Err(((target, acc, overflowed), (next_target, next, next_overflowed)))
            }
        })
        .map(|(target, values, _)| (target, values))
        .collect();
    Ok(MaterializedArray::from_cells(schema.clone(), merged))
}
