//! Per-cell expressions used by `filter` and `derive`.
//!
//! A [`Scalar`] names attributes and dimensions; [`Scalar::bind`] resolves
//! those names against a schema once, infers the result type, and returns a
//! [`BoundScalar`] that evaluates cells without further lookups.
//!
//! Evaluation never fails. Null operands, division by zero, integer
//! overflow, square roots of negatives and non-finite results all yield
//! [`Value::Null`].

use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use crate::error::EngineError;
use crate::model::{Schema, ScalarType, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Sqrt,
    Abs,
    IsNull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

/// An unbound per-cell expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Attr(String),
    Dim(String),
    Lit(Value),
    Unary(UnaryOp, Box<Scalar>),
    Binary(BinaryOp, Box<Scalar>, Box<Scalar>),
    /// First operand unless it is null.
    Coalesce(Box<Scalar>, Box<Scalar>),
    /// A null or false condition selects the `else` branch.
    If(Box<Scalar>, Box<Scalar>, Box<Scalar>),
    InSet(Box<Scalar>, Vec<Value>),
    Cast(Box<Scalar>, ScalarType),
}

pub fn attr(name: &str) -> Scalar {
    Scalar::Attr(name.to_string())
}

pub fn dim(name: &str) -> Scalar {
    Scalar::Dim(name.to_string())
}

pub fn lit(value: impl Into<Value>) -> Scalar {
    Scalar::Lit(value.into())
}

pub fn null() -> Scalar {
    Scalar::Lit(Value::Null)
}

pub fn if_then_else(cond: Scalar, then: Scalar, otherwise: Scalar) -> Scalar {
    Scalar::If(Box::new(cond), Box::new(then), Box::new(otherwise))
}

impl Scalar {
    fn binary(self, op: BinaryOp, rhs: Scalar) -> Scalar {
        Scalar::Binary(op, Box::new(self), Box::new(rhs))
    }

    fn unary(self, op: UnaryOp) -> Scalar {
        Scalar::Unary(op, Box::new(self))
    }

    pub fn cmp_eq(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn cmp_ne(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn cmp_lt(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn cmp_le(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn cmp_gt(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn cmp_ge(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Ge, rhs)
    }

    /// Inclusive range test.
    pub fn between(self, lo: Scalar, hi: Scalar) -> Scalar {
        self.clone().cmp_ge(lo).and(self.cmp_le(hi))
    }

    pub fn and(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Or, rhs)
    }

    pub fn not(self) -> Scalar {
        self.unary(UnaryOp::Not)
    }

    pub fn sqrt(self) -> Scalar {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn abs(self) -> Scalar {
        self.unary(UnaryOp::Abs)
    }

    pub fn is_null(self) -> Scalar {
        self.unary(UnaryOp::IsNull)
    }

    pub fn coalesce(self, fallback: Scalar) -> Scalar {
        Scalar::Coalesce(Box::new(self), Box::new(fallback))
    }

    pub fn in_set<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Scalar {
        Scalar::InSet(Box::new(self), values.into_iter().map(Into::into).collect())
    }

    pub fn cast(self, ty: ScalarType) -> Scalar {
        Scalar::Cast(Box::new(self), ty)
    }

    /// Names of every attribute the expression reads.
    pub fn referenced_attributes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let Scalar::Attr(name) = node {
                out.push(name.as_str());
            }
        });
        out
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Scalar)) {
        f(self);
        match self {
            Scalar::Attr(_) | Scalar::Dim(_) | Scalar::Lit(_) => {}
            Scalar::Unary(_, inner) | Scalar::InSet(inner, _) | Scalar::Cast(inner, _) => {
                inner.visit(f)
            }
            Scalar::Binary(_, a, b) | Scalar::Coalesce(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Scalar::If(c, a, b) => {
                c.visit(f);
                a.visit(f);
                b.visit(f);
            }
        }
    }

    /// Resolves names against `schema` and infers the result type.
    pub fn bind(&self, schema: &Schema) -> Result<BoundScalar, EngineError> {
        let bound = bind_inner(self, schema)?;
        Ok(BoundScalar {
            node: bound.node,
            typing: bound.typing,
        })
    }
}

impl Add for Scalar {
    type Output = Scalar;
    fn add(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Add, rhs)
    }
}

impl Sub for Scalar {
    type Output = Scalar;
    fn sub(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Sub, rhs)
    }
}

impl Mul for Scalar {
    type Output = Scalar;
    fn mul(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Mul, rhs)
    }
}

impl Div for Scalar {
    type Output = Scalar;
    fn div(self, rhs: Scalar) -> Scalar {
        self.binary(BinaryOp::Div, rhs)
    }
}

impl Neg for Scalar {
    type Output = Scalar;
    fn neg(self) -> Scalar {
        self.unary(UnaryOp::Neg)
    }
}

/// Result type of a bound expression. `ty` is `None` only for a bare null
/// literal, which unifies with anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Typing {
    pub ty: Option<ScalarType>,
    pub nullable: bool,
}

#[derive(Clone, Debug)]
enum Node {
    Attr(usize),
    Dim(usize),
    Lit(Value),
    Unary(UnaryOp, Box<Node>),
    Arith(BinaryOp, ScalarType, Box<Node>, Box<Node>),
    Compare(BinaryOp, Box<Node>, Box<Node>),
    Logic(BinaryOp, Box<Node>, Box<Node>),
    Coalesce(Box<Node>, Box<Node>),
    If(Box<Node>, Box<Node>, Box<Node>),
    InSet(Box<Node>, Arc<[Value]>),
    Cast(Box<Node>, ScalarType),
}

struct Bound {
    node: Node,
    typing: Typing,
}

/// An expression resolved against one schema.
#[derive(Clone, Debug)]
pub struct BoundScalar {
    node: Node,
    typing: Typing,
}

impl BoundScalar {
    pub fn typing(&self) -> Typing {
        self.typing
    }

    /// Evaluates the expression at one cell.
    #[inline]
    pub fn eval(&self, coords: &[i64], values: &[Value]) -> Value {
        eval(&self.node, coords, values)
    }

    /// Evaluates a predicate; null counts as false.
    #[inline]
    pub fn test(&self, coords: &[i64], values: &[Value]) -> bool {
        matches!(self.eval(coords, values), Value::Bool(true))
    }
}

fn typing(ty: ScalarType, nullable: bool) -> Typing {
    Typing {
        ty: Some(ty),
        nullable,
    }
}

fn unify(a: Typing, b: Typing, context: &str) -> Result<Typing, EngineError> {
    let ty = match (a.ty, b.ty) {
        (None, other) | (other, None) => other,
        (Some(x), Some(y)) => Some(x.unify(y).ok_or_else(|| {
            EngineError::TypeMismatch(format!("{context}: cannot combine {x} with {y}"))
        })?),
    };
    Ok(Typing {
        ty,
        nullable: a.nullable || b.nullable,
    })
}

fn bind_inner(expr: &Scalar, schema: &Schema) -> Result<Bound, EngineError> {
    Ok(match expr {
        Scalar::Attr(name) => {
            let idx = schema.attribute_index(name).ok_or_else(|| {
                EngineError::schema(format!("expression references undefined attribute '{name}'"))
            })?;
            let attr = &schema.attributes[idx];
            Bound {
                node: Node::Attr(idx),
                typing: typing(attr.ty, attr.nullable),
            }
        }
        Scalar::Dim(name) => {
            let idx = schema.dimension_index(name).ok_or_else(|| {
                EngineError::schema(format!("expression references undefined dimension '{name}'"))
            })?;
            Bound {
                node: Node::Dim(idx),
                typing: typing(ScalarType::Int64, false),
            }
        }
        Scalar::Lit(value) => Bound {
            node: Node::Lit(value.clone()),
            typing: Typing {
                ty: value.scalar_type(),
                nullable: value.is_null(),
            },
        },
        Scalar::Unary(op, inner) => {
            let inner = bind_inner(inner, schema)?;
            let t = inner.typing;
            let out = match op {
                UnaryOp::Neg | UnaryOp::Abs => {
                    require_numeric(t, "negation")?;
                    // `i64::MIN` has no integer negation.
                    Typing {
                        nullable: t.nullable || t.ty == Some(ScalarType::Int64),
                        ..t
                    }
                }
                UnaryOp::Sqrt => {
                    require_numeric(t, "sqrt")?;
                    typing(ScalarType::Float64, true)
                }
                UnaryOp::Not => {
                    require_type(t, ScalarType::Bool, "not")?;
                    typing(ScalarType::Bool, t.nullable)
                }
                UnaryOp::IsNull => typing(ScalarType::Bool, false),
            };
            Bound {
                node: Node::Unary(*op, Box::new(inner.node)),
                typing: out,
            }
        }
        Scalar::Binary(op, a, b) => {
            let a = bind_inner(a, schema)?;
            let b = bind_inner(b, schema)?;
            let context = format!("operator '{}'", op.symbol());
            match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                    require_numeric(a.typing, &context)?;
                    require_numeric(b.typing, &context)?;
                    let joined = unify(a.typing, b.typing, &context)?;
                    let ty = if *op == BinaryOp::Div {
                        ScalarType::Float64
                    } else {
                        joined.ty.unwrap_or(ScalarType::Float64)
                    };
                    // Integer overflow, float overflow and division by zero all yield null.
                    Bound {
                        node: Node::Arith(*op, ty, Box::new(a.node), Box::new(b.node)),
                        typing: typing(ty, true),
                    }
                }
                op if op.is_comparison() => {
                    let joined = unify(a.typing, b.typing, &context)?;
                    if matches!(joined.ty, Some(ScalarType::Bool))
                        && !matches!(op, BinaryOp::Eq | BinaryOp::Ne)
                    {
                        return Err(EngineError::TypeMismatch(format!(
                            "{context}: booleans only support equality"
                        )));
                    }
                    Bound {
                        node: Node::Compare(*op, Box::new(a.node), Box::new(b.node)),
                        typing: typing(ScalarType::Bool, joined.nullable),
                    }
                }
                _ => {
                    require_type(a.typing, ScalarType::Bool, &context)?;
                    require_type(b.typing, ScalarType::Bool, &context)?;
                    Bound {
                        node: Node::Logic(*op, Box::new(a.node), Box::new(b.node)),
                        typing: typing(ScalarType::Bool, a.typing.nullable || b.typing.nullable),
                    }
                }
            }
        }
        Scalar::Coalesce(a, b) => {
            let a = bind_inner(a, schema)?;
            let b = bind_inner(b, schema)?;
            let joined = unify(a.typing, b.typing, "coalesce")?;
            Bound {
                node: Node::Coalesce(Box::new(a.node), Box::new(b.node)),
                typing: Typing {
                    ty: joined.ty,
                    nullable: a.typing.nullable && b.typing.nullable,
                },
            }
        }
        Scalar::If(cond, then, otherwise) => {
            let cond = bind_inner(cond, schema)?;
            require_type(cond.typing, ScalarType::Bool, "if condition")?;
            let then = bind_inner(then, schema)?;
            let otherwise = bind_inner(otherwise, schema)?;
            let joined = unify(then.typing, otherwise.typing, "if branches")?;
            Bound {
                node: Node::If(Box::new(cond.node), Box::new(then.node), Box::new(otherwise.node)),
                typing: joined,
            }
        }
        Scalar::InSet(inner, values) => {
            let inner = bind_inner(inner, schema)?;
            for value in values {
                let t = Typing {
                    ty: value.scalar_type(),
                    nullable: false,
                };
                unify(inner.typing, t, "set membership")?;
            }
            Bound {
                node: Node::InSet(Box::new(inner.node), values.iter().cloned().collect()),
                typing: typing(ScalarType::Bool, inner.typing.nullable),
            }
        }
        Scalar::Cast(inner, target) => {
            let inner = bind_inner(inner, schema)?;
            let castable = match (inner.typing.ty, target) {
                (None, _) => true,
                (Some(from), to) if from == *to => true,
                (Some(ScalarType::String), _) | (_, ScalarType::String) => false,
                _ => true,
            };
            if !castable {
                return Err(EngineError::TypeMismatch(format!(
                    "cannot cast {:?} to {target}",
                    inner.typing.ty
                )));
            }
            let narrowing = inner.typing.ty == Some(ScalarType::Float64) && *target == ScalarType::Int64;
            Bound {
                node: Node::Cast(Box::new(inner.node), *target),
                typing: typing(*target, inner.typing.nullable || narrowing),
            }
        }
    })
}

fn require_numeric(t: Typing, context: &str) -> Result<(), EngineError> {
    match t.ty {
        None => Ok(()),
        Some(ty) if ty.is_numeric() => Ok(()),
        Some(ty) => Err(EngineError::TypeMismatch(format!(
            "{context} needs a numeric operand, found {ty}"
        ))),
    }
}

fn require_type(t: Typing, expected: ScalarType, context: &str) -> Result<(), EngineError> {
    match t.ty {
        None => Ok(()),
        Some(ty) if ty == expected => Ok(()),
        Some(ty) => Err(EngineError::TypeMismatch(format!(
            "{context} needs a {expected} operand, found {ty}"
        ))),
    }
}

fn eval(node: &Node, coords: &[i64], values: &[Value]) -> Value {
    match node {
        Node::Attr(idx) => values[*idx].clone(),
        Node::Dim(idx) => Value::Int(coords[*idx]),
        Node::Lit(value) => value.clone(),
        Node::Unary(op, inner) => {
            let v = eval(inner, coords, values);
            match op {
                UnaryOp::IsNull => Value::Bool(v.is_null()),
                UnaryOp::Not => v.as_bool().map_or(Value::Null, |b| Value::Bool(!b)),
                UnaryOp::Neg => match v {
                    Value::Int(i) => i.checked_neg().map_or(Value::Null, Value::Int),
                    Value::Float(f) => Value::Float(-f),
                    _ => Value::Null,
                },
                UnaryOp::Abs => match v {
                    Value::Int(i) => i.checked_abs().map_or(Value::Null, Value::Int),
                    Value::Float(f) => Value::Float(f.abs()),
                    _ => Value::Null,
                },
                UnaryOp::Sqrt => match v.as_f64() {
                    Some(x) if x >= 0.0 => Value::float(x.sqrt()),
                    _ => Value::Null,
                },
            }
        }
        Node::Arith(op, ty, a, b) => {
            let a = eval(a, coords, values);
            let b = eval(b, coords, values);
            arith(*op, *ty, &a, &b)
        }
        Node::Compare(op, a, b) => {
            let a = eval(a, coords, values);
            let b = eval(b, coords, values);
            if a.is_null() || b.is_null() {
                return Value::Null;
            }
            let ord = match a.partial_order(&b) {
                Some(ord) => ord,
                None => return Value::Null,
            };
            Value::Bool(match op {
                BinaryOp::Eq => ord.is_eq(),
                BinaryOp::Ne => ord.is_ne(),
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                BinaryOp::Ge => ord.is_ge(),
                _ => return Value::Null,
            })
        }
        Node::Logic(op, a, b) => {
            let a = eval(a, coords, values).as_bool();
            let b = eval(b, coords, values).as_bool();
            // Three-valued logic: a known dominating operand decides.
            match (op, a, b) {
                (BinaryOp::And, Some(false), _) | (BinaryOp::And, _, Some(false)) => {
                    Value::Bool(false)
                }
                (BinaryOp::And, Some(true), Some(true)) => Value::Bool(true),
                (BinaryOp::Or, Some(true), _) | (BinaryOp::Or, _, Some(true)) => Value::Bool(true),
                (BinaryOp::Or, Some(false), Some(false)) => Value::Bool(false),
                _ => Value::Null,
            }
        }
        Node::Coalesce(a, b) => {
            let a = eval(a, coords, values);
            if a.is_null() { eval(b, coords, values) } else { a }
        }
        Node::If(cond, then, otherwise) => {
            if matches!(eval(cond, coords, values), Value::Bool(true)) {
                eval(then, coords, values)
            } else {
                eval(otherwise, coords, values)
            }
        }
        Node::InSet(inner, set) => {
            let v = eval(inner, coords, values);
            if v.is_null() {
                return Value::Null;
            }
            Value::Bool(
                set.iter()
                    .any(|candidate| v.partial_order(candidate).is_some_and(|o| o.is_eq())),
            )
        }
        Node::Cast(inner, target) => cast(eval(inner, coords, values), *target),
    }
}

fn arith(op: BinaryOp, ty: ScalarType, a: &Value, b: &Value) -> Value {
    if ty == ScalarType::Int64 {
        let (x, y) = match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => (x, y),
            _ => return Value::Null,
        };
        let out = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            _ => None,
        };
        return out.map_or(Value::Null, Value::Int);
    }
    let (x, y) = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => return Value::Null,
    };
    match op {
        BinaryOp::Add => Value::float(x + y),
        BinaryOp::Sub => Value::float(x - y),
        BinaryOp::Mul => Value::float(x * y),
        BinaryOp::Div if y == 0.0 => Value::Null,
        BinaryOp::Div => Value::float(x / y),
        _ => Value::Null,
    }
}

fn cast(value: Value, target: ScalarType) -> Value {
    match (value, target) {
        (Value::Null, _) => Value::Null,
        (Value::Bool(b), ScalarType::Bool) => Value::Bool(b),
        (Value::Bool(b), ScalarType::Int64) => Value::Int(i64::from(b)),
        (Value::Bool(b), ScalarType::Float64) => Value::Float(if b { 1.0 } else { 0.0 }),
        (Value::Int(i), ScalarType::Bool) => Value::Bool(i != 0),
        (Value::Int(i), ScalarType::Int64) => Value::Int(i),
        (Value::Int(i), ScalarType::Float64) => Value::Float(i as f64),
        (Value::Float(f), ScalarType::Bool) => Value::Bool(f != 0.0),
        (Value::Float(f), ScalarType::Int64) => float_to_int(f).map_or(Value::Null, Value::Int),
        (Value::Float(f), ScalarType::Float64) => Value::Float(f),
        (Value::Str(s), ScalarType::String) => Value::Str(s),
        _ => Value::Null,
    }
}

/// Truncates toward zero; `None` for NaN and for values outside the `i64` range.
fn float_to_int(f: f64) -> Option<i64> {
    let t = f.trunc();
    (t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attribute, Dimension};

    fn schema() -> Schema {
        Schema::new(
            vec![Dimension::new("variant_id", 0, 99, 10)],
            vec![
                Attribute::required("ref", ScalarType::String),
                Attribute::required("alt", ScalarType::String),
                Attribute::nullable("af", ScalarType::Float64),
                Attribute::required("count", ScalarType::Int64),
            ],
        )
        .unwrap()
    }

    fn row(r: &str, a: &str, af: Option<f64>, count: i64) -> Vec<Value> {
        vec![Value::str(r), Value::str(a), af.into(), Value::Int(count)]
    }

    #[test]
    fn undefined_attribute_is_a_schema_error() {
        let err = attr("qual").cmp_gt(lit(30.0)).bind(&schema()).unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn division_by_zero_is_null_not_fatal() {
        let bound = (attr("count") / lit(0i64)).bind(&schema()).unwrap();
        assert_eq!(bound.typing().ty, Some(ScalarType::Float64));
        assert!(bound.typing().nullable);
        assert_eq!(bound.eval(&[0], &row("A", "G", None, 4)), Value::Null);
    }

    #[test]
    fn null_operands_propagate() {
        let bound = (attr("af") * lit(2.0)).bind(&schema()).unwrap();
        assert_eq!(bound.eval(&[0], &row("A", "G", None, 1)), Value::Null);
        assert_eq!(
            bound.eval(&[0], &row("A", "G", Some(0.25), 1)),
            Value::Float(0.5)
        );
    }

    #[test]
    fn transition_predicate_matches_purine_and_pyrimidine_swaps() {
        let ti = attr("ref")
            .cmp_eq(lit("A"))
            .and(attr("alt").cmp_eq(lit("G")))
            .or(attr("ref").cmp_eq(lit("C")).and(attr("alt").cmp_eq(lit("T"))));
        let bound = ti.bind(&schema()).unwrap();
        assert!(bound.test(&[0], &row("A", "G", None, 0)));
        assert!(bound.test(&[0], &row("C", "T", None, 0)));
        assert!(!bound.test(&[0], &row("A", "C", None, 0)));
    }

    #[test]
    fn coalesce_supplies_a_declared_fill() {
        let bound = attr("af").coalesce(lit(0.0)).bind(&schema()).unwrap();
        assert!(!bound.typing().nullable);
        assert_eq!(bound.eval(&[0], &row("A", "G", None, 0)), Value::Float(0.0));
    }

    #[test]
    fn dimensions_are_addressable() {
        let bound = dim("variant_id").cmp_lt(lit(10i64)).bind(&schema()).unwrap();
        assert!(bound.test(&[3], &row("A", "G", None, 0)));
        assert!(!bound.test(&[12], &row("A", "G", None, 0)));
    }

    #[test]
    fn string_arithmetic_is_rejected() {
        let err = (attr("ref") + lit(1i64)).bind(&schema()).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch(_)));
    }

    #[test]
    fn integer_overflow_becomes_null() {
        let sum = (attr("count") + lit(1i64)).bind(&schema()).unwrap();
        assert!(sum.typing().nullable);
        assert_eq!(sum.eval(&[0], &row("A", "G", None, i64::MAX)), Value::Null);
        assert_eq!(sum.eval(&[0], &row("A", "G", None, 41)), Value::Int(42));

        let product = (attr("count") * attr("count")).bind(&schema()).unwrap();
        assert_eq!(product.eval(&[0], &row("A", "G", None, i64::MAX / 2)), Value::Null);
    }

    #[test]
    fn negating_the_smallest_integer_is_null() {
        for expr in [-attr("count"), attr("count").abs()] {
            let bound = expr.bind(&schema()).unwrap();
            assert!(bound.typing().nullable);
            assert_eq!(bound.eval(&[0], &row("A", "G", None, i64::MIN)), Value::Null);
            assert_eq!(bound.eval(&[0], &row("A", "G", None, -3)).as_i64().map(i64::abs), Some(3));
        }
    }

    #[test]
    fn float_overflow_is_typed_nullable() {
        let squared = (attr("count").cast(ScalarType::Float64) * lit(1e308)).bind(&schema()).unwrap();
        assert!(squared.typing().nullable);
        assert_eq!(squared.eval(&[0], &row("A", "G", None, 10)), Value::Null);
        assert_eq!(squared.eval(&[0], &row("A", "G", None, 0)), Value::Float(0.0));
    }

    #[test]
    fn out_of_range_float_casts_are_null() {
        let bound = attr("af").cast(ScalarType::Int64).bind(&schema()).unwrap();
        assert!(bound.typing().nullable);
        assert_eq!(bound.eval(&[0], &row("A", "G", Some(-2.7), 0)), Value::Int(-2));
        assert_eq!(bound.eval(&[0], &row("A", "G", Some(1e19), 0)), Value::Null);
        assert_eq!(bound.eval(&[0], &row("A", "G", Some(-1e19), 0)), Value::Null);
        assert_eq!(cast(Value::Float(f64::NAN), ScalarType::Int64), Value::Null);
        assert_eq!(cast(Value::Float(-9.223372036854775808e18), ScalarType::Int64), Value::Int(i64::MIN));
    }

    #[test]
    fn three_valued_logic_short_circuits_on_known_operands() {
        let bound = attr("af")
            .cmp_gt(lit(0.5))
            .and(lit(false))
            .bind(&schema())
            .unwrap();
        assert_eq!(bound.eval(&[0], &row("A", "G", None, 0)), Value::Bool(false));
    }
}
