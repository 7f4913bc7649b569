use thiserror::Error;

use crate::linalg::faer_ndarray::FaerLinalgError;

/// Failures surfaced by catalog, expression and evaluation calls.
///
/// Null propagation is deliberately absent: division by zero and null
/// operands produce [`crate::model::Value::Null`] cells, and only become an
/// error when forced into a non-nullable attribute.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("A null value was produced for the non-nullable attribute '{attribute}'.")]
    NullIntoNonNullable { attribute: String },

    #[error("An array named '{0}' already exists in the catalog.")]
    NameCollision(String),

    #[error("No array named '{0}' exists in the catalog.")]
    NotFound(String),

    #[error(
        "Coordinate {coordinate} is outside the declared range [{lo}, {hi}] of dimension '{dimension}'."
    )]
    DimensionOverflow {
        dimension: String,
        coordinate: i64,
        lo: i64,
        hi: i64,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("A cell already exists at coordinate {0:?}.")]
    DuplicateCell(Vec<i64>),

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog persistence error: {0}")]
    Persist(String),

    #[error("Nothing to analyze: {0}")]
    EmptyInput(String),

    #[error("Failed to build the worker pool: {0}")]
    ThreadPool(String),
}

impl EngineError {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }
}

impl From<csv::Error> for EngineError {
    fn from(err: csv::Error) -> Self {
        Self::Persist(err.to_string())
    }
}
