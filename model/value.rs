use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Declared type of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Bool,
    Int64,
    Float64,
    String,
}

impl ScalarType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::String => "string",
        }
    }

    /// Common type of two numeric operands; `None` when the pair does not unify.
    pub fn unify(self, other: Self) -> Option<Self> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Self::Int64, Self::Float64) | (Self::Float64, Self::Int64) => Some(Self::Float64),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// The payload of one attribute at one cell.
///
/// `Null` is a present value; a cell that does not exist at all is simply
/// absent from its chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

impl Value {
    /// Non-finite results are folded into `Null` so that NaN never leaks
    /// into a materialized array.
    #[inline]
    pub fn float(value: f64) -> Self {
        if value.is_finite() {
            Self::Float(value)
        } else {
            Self::Null
        }
    }

    pub fn str(value: &str) -> Self {
        Self::Str(Arc::from(value))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ScalarType::Bool),
            Self::Int(_) => Some(ScalarType::Int64),
            Self::Float(_) => Some(ScalarType::Float64),
            Self::Str(_) => Some(ScalarType::String),
        }
    }

    /// Whether this value may be stored in an attribute of type `ty`.
    pub fn conforms_to(&self, ty: ScalarType) -> bool {
        match self.scalar_type() {
            None => true,
            Some(own) => own == ty,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Hashable identity used for grouping and key joins. Floats compare by
    /// numeric value after normalizing negative zero.
    pub fn key(&self) -> KeyPart {
        match self {
            Self::Null => KeyPart::Null,
            Self::Bool(v) => KeyPart::Bool(*v),
            Self::Int(v) => KeyPart::Int(*v),
            Self::Float(v) => {
                let normalized = if *v == 0.0 { 0.0 } else { *v };
                KeyPart::Float(ordered_bits(normalized))
            }
            Self::Str(v) => KeyPart::Str(v.clone()),
        }
    }

    /// Total order used by `min`/`max` reductions and comparisons. Numbers of
    /// either kind compare numerically; values of unrelated kinds do not order.
    pub fn partial_order(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.as_ref().cmp(b.as_ref())),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Parses the text form written by [`fmt::Display`]; `\N` is null.
    pub fn parse(text: &str, ty: ScalarType) -> Option<Self> {
        if text == NULL_TEXT {
            return Some(Self::Null);
        }
        match ty {
            ScalarType::Bool => match text {
                "true" => Some(Self::Bool(true)),
                "false" => Some(Self::Bool(false)),
                _ => None,
            },
            ScalarType::Int64 => text.parse().ok().map(Self::Int),
            ScalarType::Float64 => text.parse().ok().map(Self::Float),
            ScalarType::String => Some(Self::str(text.strip_prefix(ESCAPE).unwrap_or(text))),
        }
    }
}

/// Text form of a null cell. Strings starting with a backslash get one
/// more on output so that a literal `\N` string stays distinct.
pub const NULL_TEXT: &str = "\\N";

const ESCAPE: char = '\\';

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(NULL_TEXT),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => {
                let mut buffer = ryu::Buffer::new();
                f.write_str(buffer.format(*v))
            }
            Self::Str(v) => {
                if v.starts_with(ESCAPE) {
                    f.write_str("\\")?;
                }
                f.write_str(v)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::str(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

const SIGN: u64 = 1 << 63;

/// Maps a float onto a `u64` whose unsigned order is the numeric order.
fn ordered_bits(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits & SIGN == 0 { bits | SIGN } else { !bits }
}

fn from_ordered_bits(bits: u64) -> f64 {
    f64::from_bits(if bits & SIGN == 0 { !bits } else { bits & !SIGN })
}

/// Hashable projection of a [`Value`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Arc<str>),
}

impl KeyPart {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(v) => Value::Bool(*v),
            Self::Int(v) => Value::Int(*v),
            Self::Float(bits) => Value::Float(from_ordered_bits(*bits)),
            Self::Str(v) => Value::Str(v.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(Value::float(f64::NAN), Value::Null);
        assert_eq!(Value::float(f64::INFINITY), Value::Null);
        assert_eq!(Value::float(1.5), Value::Float(1.5));
    }

    #[test]
    fn numeric_values_order_across_kinds() {
        let ord = Value::Int(2).partial_order(&Value::Float(2.5));
        assert_eq!(ord, Some(Ordering::Less));
        assert_eq!(Value::str("A").partial_order(&Value::Int(1)), None);
    }

    #[test]
    fn text_form_round_trips_through_parse() {
        for (value, ty) in [
            (Value::Int(-7), ScalarType::Int64),
            (Value::Float(0.25), ScalarType::Float64),
            (Value::Bool(true), ScalarType::Bool),
            (Value::str("rs123"), ScalarType::String),
            (Value::str(NULL_TEXT), ScalarType::String),
            (Value::str("\\\\N"), ScalarType::String),
            (Value::str("a\\N"), ScalarType::String),
            (Value::Null, ScalarType::Float64),
        ] {
            let text = value.to_string();
            assert_eq!(Value::parse(&text, ty), Some(value));
        }
    }

    #[test]
    fn negative_zero_groups_with_zero() {
        assert_eq!(Value::Float(-0.0).key(), Value::Float(0.0).key());
    }

    #[test]
    fn float_keys_sort_numerically() {
        let xs = [-1e300, -2.5, -1.0, -f64::MIN_POSITIVE, 0.0, 1e-300, 1.0, 2.5, 1e300];
        let keys: Vec<KeyPart> = xs.iter().map(|x| Value::Float(*x).key()).collect();
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]), "{keys:?}");
        for (x, key) in xs.iter().zip(&keys) {
            assert_eq!(key.to_value(), Value::Float(*x));
        }
    }
}
