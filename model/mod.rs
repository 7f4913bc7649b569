pub mod array;
pub mod catalog;
pub mod schema;
pub mod value;

pub use array::{ArrayBuilder, Chunk, ChunkMap, Coords, MaterializedArray, Row};
pub use catalog::{ArrayHandle, Catalog, Lifetime};
pub use schema::{Attribute, Dimension, Schema, SYNTHETIC_CHUNK, UNBOUNDED};
pub use value::{KeyPart, ScalarType, Value};
