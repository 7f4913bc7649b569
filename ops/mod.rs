//! Physical implementations of the array operators.
//!
//! Each executor takes already-materialized inputs plus the schema the
//! expression layer inferred, and fans out over chunks with rayon. Chunk-local
//! maps (filter, derive, project) never coordinate across chunks; aggregate,
//! key joins and redimension gather partial results behind a barrier first.

pub mod aggregate;
pub mod derive;
pub mod filter;
pub mod join;
pub mod redimension;
pub mod unpack;

pub use aggregate::{AggFn, AggSpec, GroupBy};
pub use derive::DeriveSpec;
pub use redimension::{Combine, RedimensionSpec, TargetAttribute, TargetDimension};
