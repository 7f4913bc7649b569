use ahash::AHashMap;
use rayon::prelude::*;
use std::cmp::Ordering;

use crate::error::EngineError;
use crate::model::{Attribute, KeyPart, MaterializedArray, ScalarType, Schema, Value};

/// Reductions available to `aggregate`. Every one keeps a partial state that
/// merges associatively and commutatively, so chunk order never matters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFn {
    /// Non-null values of the input attribute, or every cell when no input is named.
    Count,
    Sum,
    Avg,
    Min,
    Max,
    /// Sample variance (n - 1 denominator).
    Var,
    Stdev,
}

impl AggFn {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Var => "var",
            Self::Stdev => "stdev",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggSpec {
    pub func: AggFn,
    pub input: Option<String>,
    pub output: String,
}

impl AggSpec {
    pub fn new(func: AggFn, input: &str, output: &str) -> Self {
        Self {
            func,
            input: Some(input.to_string()),
            output: output.to_string(),
        }
    }

    pub fn count_cells(output: &str) -> Self {
        Self {
            func: AggFn::Count,
            input: None,
            output: output.to_string(),
        }
    }

    pub fn sum(input: &str, output: &str) -> Self {
        Self::new(AggFn::Sum, input, output)
    }

    pub fn avg(input: &str, output: &str) -> Self {
        Self::new(AggFn::Avg, input, output)
    }

    /// Output attribute produced for an input of type `ty`.
    pub(crate) fn output_attribute(&self, ty: Option<ScalarType>) -> Result<Attribute, EngineError> {
        let numeric = |ty: Option<ScalarType>| match ty {
            Some(t) if t.is_numeric() => Ok(t),
            other => Err(EngineError::TypeMismatch(format!(
                "{}({}) needs a numeric attribute, found {:?}",
                self.func.describe(),
                self.input.as_deref().unwrap_or("*"),
                other
            ))),
        };
        Ok(match self.func {
            AggFn::Count => Attribute::required(&self.output, ScalarType::Int64),
            AggFn::Sum => Attribute::nullable(&self.output, numeric(ty)?),
            AggFn::Avg | AggFn::Var | AggFn::Stdev => {
                numeric(ty)?;
                Attribute::nullable(&self.output, ScalarType::Float64)
            }
            AggFn::Min | AggFn::Max => {
                let ty = ty.ok_or_else(|| {
                    EngineError::schema(format!("{} needs an input attribute", self.func.describe()))
                })?;
                Attribute::nullable(&self.output, ty)
            }
        })
    }
}

/// What the cells are partitioned by.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupBy {
    /// Output keeps these dimensions. An empty list is a single global group.
    Dimensions(Vec<String>),
    /// Output is indexed by a synthetic `group` dimension, numbered in key
    /// order, and carries the key attributes.
    Attributes(Vec<String>),
}

impl GroupBy {
    pub fn dims(names: &[&str]) -> Self {
        Self::Dimensions(names.iter().map(|n| n.to_string()).collect())
    }

    pub fn attrs(names: &[&str]) -> Self {
        Self::Attributes(names.iter().map(|n| n.to_string()).collect())
    }
}

/// Running state shared by every reduction.
#[derive(Clone, Debug, Default)]
struct Accumulator {
    cells: u64,
    count: u64,
    int_sum: i128,
    float_sum: CompensatedSum,
    mean: f64,
    m2: f64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn push(&mut self, value: Option<&Value>) {
        self.cells += 1;
        let Some(value) = value else {
            return;
        };
        if value.is_null() {
            return;
        }
        self.count += 1;
        if let Value::Int(i) = value {
            self.int_sum += i128::from(*i);
        }
        if let Some(x) = value.as_f64() {
            self.float_sum.add(x);
            // Welford update.
            let delta = x - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (x - self.mean);
        }
        keep_extreme(&mut self.min, value, Ordering::Less);
        keep_extreme(&mut self.max, value, Ordering::Greater);
    }

    fn merge(&mut self, other: Accumulator) {
        self.cells += other.cells;
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            let cells = self.cells;
            *self = other;
            self.cells = cells;
            return;
        }
        // Chan et al. pairwise combination of mean and M2.
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count += other.count;
        self.int_sum += other.int_sum;
        self.float_sum.merge(other.float_sum);
        if let Some(v) = other.min {
            keep_extreme(&mut self.min, &v, Ordering::Less);
        }
        if let Some(v) = other.max {
            keep_extreme(&mut self.max, &v, Ordering::Greater);
        }
    }

    fn finish(&self, func: AggFn, counts_cells: bool, ty: ScalarType) -> Value {
        match func {
            AggFn::Count => {
                let n = if counts_cells { self.cells } else { self.count };
                Value::Int(n as i64)
            }
            _ if self.count == 0 => Value::Null,
            AggFn::Sum if ty == ScalarType::Int64 => {
                i64::try_from(self.int_sum).map_or(Value::Null, Value::Int)
            }
            AggFn::Sum => Value::float(self.float_sum.value()),
            AggFn::Avg => Value::float(self.mean),
            AggFn::Var if self.count < 2 => Value::Null,
            AggFn::Var => Value::float(self.m2 / (self.count - 1) as f64),
            AggFn::Stdev if self.count < 2 => Value::Null,
            AggFn::Stdev => Value::float((self.m2 / (self.count - 1) as f64).sqrt()),
            AggFn::Min => self.min.clone().unwrap_or(Value::Null),
            AggFn::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

/// Neumaier-compensated running sum.
#[derive(Clone, Copy, Debug, Default)]
struct CompensatedSum {
    sum: f64,
    carry: f64,
}

impl CompensatedSum {
    fn add(&mut self, x: f64) {
        let t = self.sum + x;
        if self.sum.abs() >= x.abs() {
            self.carry += (self.sum - t) + x;
        } else {
            self.carry += (x - t) + self.sum;
        }
        self.sum = t;
    }

    fn merge(&mut self, other: CompensatedSum) {
        self.add(other.sum);
        self.carry += other.carry;
    }

    fn value(&self) -> f64 {
        self.sum + self.carry
    }
}

fn keep_extreme(slot: &mut Option<Value>, candidate: &Value, wanted: Ordering) {
    let replace = match slot {
        None => true,
        Some(current) => candidate.partial_order(current) == Some(wanted),
    };
    if replace {
        *slot = Some(candidate.clone());
    }
}

type Partials = AHashMap<Vec<KeyPart>, Vec<Accumulator>>;

fn merge_partials(mut into: Partials, from: Partials) -> Partials {
    for (key, accs) in from {
        match into.get_mut(&key) {
            Some(existing) => {
                for (a, b) in existing.iter_mut().zip(accs) {
                    a.merge(b);
                }
            }
            None => {
                into.insert(key, accs);
            }
        }
    }
    into
}

/// Grouped reduction with a redistribution barrier: each chunk builds
/// partial states, partials merge across chunks, then one output cell is
/// emitted per group that received at least one input cell.
pub(crate) fn execute(
    input: &MaterializedArray,
    aggregates: &[AggSpec],
    group_by: &GroupBy,
    schema: &Schema,
) -> Result<MaterializedArray, EngineError> {
    let source = input.schema();
    let inputs: Vec<Option<usize>> = aggregates
        .iter()
        .map(|spec| {
            spec.input
                .as_deref()
                .map(|name| source.require_attribute(name))
                .transpose()
        })
        .collect::<Result<_, _>>()?;

    enum KeySource {
        Dim(usize),
        Attr(usize),
    }
    let key_sources: Vec<KeySource> = match group_by {
        GroupBy::Dimensions(names) => names
            .iter()
            .map(|n| source.require_dimension(n).map(KeySource::Dim))
            .collect::<Result<_, _>>()?,
        GroupBy::Attributes(names) => names
            .iter()
            .map(|n| source.require_attribute(n).map(KeySource::Attr))
            .collect::<Result<_, _>>()?,
    };

    let partials: Partials = input
        .chunks()
        .par_iter()
        .map(|(_, chunk)| {
            let mut local = Partials::new();
            for (coords, values) in chunk.iter() {
                let key: Vec<KeyPart> = key_sources
                    .iter()
                    .map(|src| match src {
                        KeySource::Dim(i) => KeyPart::Int(coords[*i]),
                        KeySource::Attr(i) => values[*i].key(),
                    })
                    .collect();
                let accs = local
                    .entry(key)
                    .or_insert_with(|| vec![Accumulator::default(); aggregates.len()]);
                for (acc, idx) in accs.iter_mut().zip(&inputs) {
                    acc.push(idx.map(|i| &values[i]));
                }
            }
            local
        })
        .reduce(Partials::new, merge_partials);

    let key_width = key_sources.len();
    let output_types: Vec<ScalarType> = schema.attributes[schema.attributes.len() - aggregates.len()..]
        .iter()
        .map(|a| a.ty)
        .collect();
    let finish = |accs: &[Accumulator]| -> Vec<Value> {
        accs.iter()
            .zip(aggregates)
            .zip(&output_types)
            .map(|((acc, spec), ty)| acc.finish(spec.func, spec.input.is_none(), *ty))
            .collect()
    };

    let cells: Vec<(Vec<i64>, Vec<Value>)> = match group_by {
        GroupBy::Dimensions(_) if key_width == 0 => partials
            .into_iter()
            .map(|(_, accs)| (vec![0], finish(&accs)))
            .collect(),
        GroupBy::Dimensions(_) => partials
            .into_iter()
            .map(|(key, accs)| {
                let coords = key
                    .iter()
                    .map(|part| match part {
                        KeyPart::Int(c) => *c,
                        _ => 0,
                    })
                    .collect();
                (coords, finish(&accs))
            })
            .collect(),
        GroupBy::Attributes(_) => {
            let mut groups: Vec<(Vec<KeyPart>, Vec<Accumulator>)> = partials.into_iter().collect();
            groups.sort_unstable_by(|a, b| a.0.cmp(&b.0));
            groups
                .into_iter()
                .enumerate()
                .map(|(group, (key, accs))| {
                    let mut row: Vec<Value> = key.iter().map(KeyPart::to_value).collect();
                    row.extend(finish(&accs));
                    (vec![group as i64], row)
                })
                .collect()
        }
    };
    Ok(MaterializedArray::from_cells(schema.clone(), cells))
}
