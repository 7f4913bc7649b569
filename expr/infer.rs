//! Output schemas of every operator, computed from parameters and input
//! schemas alone. Nothing here reads cell data.

use super::node::Op;
use crate::error::EngineError;
use crate::linalg::{product, svd, sweep};
use crate::model::{Attribute, Dimension, SYNTHETIC_CHUNK, ScalarType, Schema};
use crate::ops::{AggSpec, DeriveSpec, GroupBy, redimension, unpack};

/// Name of the synthetic dimension produced by attribute-key joins.
pub const ROW_DIM: &str = "row";

/// Name of the synthetic dimension produced by grouping on attributes.
pub const GROUP_DIM: &str = "group";

pub(crate) fn infer(op: &Op, inputs: &[&Schema]) -> Result<Schema, EngineError> {
    match (op, inputs) {
        (Op::Scan(handle), []) => Ok(handle.schema().clone()),
        (Op::Filter(predicate), [input]) => filter(input, predicate),
        (Op::Derive(specs), [input]) => derive(input, specs),
        (Op::Project(names), [input]) => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            input.project(&names)
        }
        (Op::RenameAttribute { from, to }, [input]) => input.rename_attribute(from, to),
        (Op::RenameDimension { from, to }, [input]) => input.rename_dimension(from, to),
        (Op::Join, [left, right]) => join(left, right),
        (Op::JoinOn { left: lk, right: rk }, [left, right]) => join_on(left, right, lk, rk),
        (Op::Merge, [left, right]) => merge(left, right),
        (Op::Aggregate { aggregates, group_by }, [input]) => aggregate(input, aggregates, group_by),
        (Op::Redimension(spec), [input]) => redimension::infer(input, spec),
        (Op::Unpack { dimension }, [input]) => unpack::infer(input, dimension),
        (Op::Sweep { axis, .. }, [matrix, vector]) => sweep::infer(matrix, *axis, vector),
        (Op::Product(kind), [input]) => product::infer(input, *kind),
        (Op::Svd(part), [input]) => svd::infer(input, *part),
        (op, inputs) => Err(EngineError::schema(format!(
            "{} cannot take {} inputs",
            op.name(),
            inputs.len()
        ))),
    }
}

fn filter(input: &Schema, predicate: &super::scalar::Scalar) -> Result<Schema, EngineError> {
    let typing = predicate.bind(input)?.typing();
    match typing.ty {
        None | Some(ScalarType::Bool) => Ok(input.clone()),
        Some(other) => Err(EngineError::TypeMismatch(format!(
            "filter predicate must be bool, found {other}"
        ))),
    }
}

/// Appends one attribute per spec. Each spec is bound against the schema
/// built so far, so it may read attributes derived before it.
fn derive(input: &Schema, specs: &[DeriveSpec]) -> Result<Schema, EngineError> {
    let mut schema = input.clone();
    for spec in specs {
        let typing = spec.expr.bind(&schema)?.typing();
        let attribute = Attribute::new(
            &spec.name,
            typing.ty.unwrap_or(ScalarType::Float64),
            spec.nullable.unwrap_or(typing.nullable),
        );
        schema = schema.with_attributes([attribute])?;
    }
    Ok(schema)
}

/// Right dimensions must be a subset of the left ones; shared ranges are
/// intersected and the left chunking is kept.
fn join(left: &Schema, right: &Schema) -> Result<Schema, EngineError> {
    let aligned = left.aligned_dimensions(&right.dimensions)?;
    let dimensions = left
        .dimensions
        .iter()
        .map(|dim| {
            aligned
                .iter()
                .find(|a| a.name == dim.name)
                .cloned()
                .unwrap_or_else(|| dim.clone())
        })
        .collect();
    let attributes = left
        .attributes
        .iter()
        .chain(&right.attributes)
        .cloned()
        .collect();
    Schema::new(dimensions, attributes)
}

fn join_on(left: &Schema, right: &Schema, left_keys: &[String], right_keys: &[String]) -> Result<Schema, EngineError> {
    if left_keys.is_empty() || left_keys.len() != right_keys.len() {
        return Err(EngineError::schema(format!(
            "join_on needs matching non-empty key lists, found {left_keys:?} and {right_keys:?}"
        )));
    }
    for (lk, rk) in left_keys.iter().zip(right_keys) {
        let l = &left.attributes[left.require_attribute(lk)?];
        let r = &right.attributes[right.require_attribute(rk)?];
        if l.ty != r.ty {
            return Err(EngineError::TypeMismatch(format!(
                "join key '{lk}' is {} but '{rk}' is {}",
                l.ty, r.ty
            )));
        }
    }
    let as_attribute = |d: &Dimension| Attribute::required(&d.name, ScalarType::Int64);
    let attributes = left
        .dimensions
        .iter()
        .map(as_attribute)
        .chain(left.attributes.iter().cloned())
        .chain(right.dimensions.iter().map(as_attribute))
        .chain(
            right
                .attributes
                .iter()
                .filter(|a| !right_keys.contains(&a.name))
                .cloned(),
        )
        .collect();
    Schema::new(
        vec![Dimension::unbounded(ROW_DIM, 0, SYNTHETIC_CHUNK)],
        attributes,
    )
}

/// Same dimension names in the same order and identical attribute names and
/// types. Ranges are unioned; nullability is widened.
fn merge(left: &Schema, right: &Schema) -> Result<Schema, EngineError> {
    let same_dims = left.ndim() == right.ndim()
        && left
            .dimensions
            .iter()
            .zip(&right.dimensions)
            .all(|(l, r)| l.name == r.name);
    let same_attrs = left.attributes.len() == right.attributes.len()
        && left
            .attributes
            .iter()
            .zip(&right.attributes)
            .all(|(l, r)| l.name == r.name && l.ty == r.ty);
    if !same_dims || !same_attrs {
        return Err(EngineError::schema(format!(
            "merge inputs are not compatible: {left} vs {right}"
        )));
    }
    let dimensions = left
        .dimensions
        .iter()
        .zip(&right.dimensions)
        .map(|(l, r)| Dimension {
            lo: l.lo.min(r.lo),
            hi: l.hi.max(r.hi),
            ..l.clone()
        })
        .collect();
    let attributes = left
        .attributes
        .iter()
        .zip(&right.attributes)
        .map(|(l, r)| Attribute::new(&l.name, l.ty, l.nullable || r.nullable))
        .collect();
    Schema::new(dimensions, attributes)
}

fn aggregate(input: &Schema, aggregates: &[AggSpec], group_by: &GroupBy) -> Result<Schema, EngineError> {
    if aggregates.is_empty() {
        return Err(EngineError::schema("aggregate needs at least one reduction"));
    }
    let (dimensions, mut attributes) = match group_by {
        GroupBy::Dimensions(names) if names.is_empty() => (vec![Dimension::new("i", 0, 0, 1)], Vec::new()),
        GroupBy::Dimensions(names) => {
            let dims = names
                .iter()
                .map(|n| input.require_dimension(n).map(|i| input.dimensions[i].clone()))
                .collect::<Result<Vec<_>, _>>()?;
            (dims, Vec::new())
        }
        GroupBy::Attributes(names) if names.is_empty() => {
            return Err(EngineError::schema("grouping by attributes needs at least one attribute"));
        }
        GroupBy::Attributes(names) => {
            let keys = names
                .iter()
                .map(|n| input.require_attribute(n).map(|i| input.attributes[i].clone()))
                .collect::<Result<Vec<_>, _>>()?;
            (
                vec![Dimension::unbounded(GROUP_DIM, 0, SYNTHETIC_CHUNK)],
                keys,
            )
        }
    };
    for spec in aggregates {
        let ty = match &spec.input {
            Some(name) => Some(input.attributes[input.require_attribute(name)?].ty),
            None => None,
        };
        attributes.push(spec.output_attribute(ty)?);
    }
    Schema::new(dimensions, attributes)
}
