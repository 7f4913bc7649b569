#![deny(unused_variables)]
#![deny(clippy::no_effect_underscore_binding)]

//! A lazily-evaluated, chunk-parallel multidimensional array engine with the
//! dense linear algebra and population-genetics analyses built on top of it.
//!
//! Arrays live in a [`model::Catalog`]. Analysis code wraps them in
//! [`expr::ArrayExpr`] nodes, chains operators, and asks an
//! [`expr::Evaluator`] to materialize the result. Nothing touches cell data
//! until that request.

pub mod error;

#[path = "../model/mod.rs"]
pub mod model;

#[path = "../expr/mod.rs"]
pub mod expr;

#[path = "../ops/mod.rs"]
pub mod ops;

#[path = "../linalg/mod.rs"]
pub mod linalg;

#[path = "../genomics/mod.rs"]
pub mod genomics;

#[path = "../shared/mod.rs"]
pub mod shared;

pub use error::EngineError;
pub use expr::{ArrayExpr, Evaluator};
pub use model::{ArrayHandle, Catalog, Schema};
