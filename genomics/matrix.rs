//! Building blocks shared by the PCA and LD pipelines: per-genotype allele
//! counts, per-site frequencies, and densification of a site selection into
//! a `samples x 0..N-1` matrix.

use super::dataset::{SAMPLE_DIM, VARIANT_DIM};
use crate::error::EngineError;
use crate::expr::{ArrayExpr, attr, if_then_else, lit};
use crate::model::{Dimension, UNBOUNDED};
use crate::ops::{AggSpec, Combine, DeriveSpec, GroupBy, RedimensionSpec};

/// Name of the dense column dimension.
pub const COL_DIM: &str = "col";

/// Adds `copies` (alternate allele copies, 0..=ploidy) and `ploidy`.
pub fn allele_copies(genotypes: &ArrayExpr) -> Result<ArrayExpr, EngineError> {
    let allele2 = attr("allele2");
    genotypes.derive(vec![
        DeriveSpec::new("copies", attr("allele1") + allele2.clone().coalesce(lit(0i64))).not_null(),
        DeriveSpec::new("ploidy", if_then_else(allele2.is_null(), lit(1i64), lit(2i64))).not_null(),
    ])
}

/// Per-site `alt_copies`, `alleles`, `called` and alternate allele frequency `af`.
pub fn site_frequencies(copies: &ArrayExpr) -> Result<ArrayExpr, EngineError> {
    copies
        .aggregate(
            vec![
                AggSpec::sum("copies", "alt_copies"),
                AggSpec::sum("ploidy", "alleles"),
                AggSpec::count_cells("called"),
            ],
            GroupBy::dims(&[VARIANT_DIM]),
        )?
        .derive_one("af", attr("alt_copies") / attr("alleles"))
}

/// Sites whose frequency lies in `[min_af, max_af]` and that are called in
/// every one of `samples` samples. Dense products treat a missing call as
/// unknown rather than zero, so incomplete sites are left out.
pub fn common_sites(
    frequencies: &ArrayExpr,
    min_af: f64,
    max_af: f64,
    samples: i64,
) -> Result<ArrayExpr, EngineError> {
    frequencies.filter(
        attr("af")
            .between(lit(min_af), lit(max_af))
            .and(attr("called").cmp_eq(lit(samples))),
    )
}

/// Assigns each selected site a dense column number `0..N-1` in variant
/// order: `[variant_id] <col, af>`.
pub fn column_index(sites: &ArrayExpr, variant_dim: &Dimension) -> Result<ArrayExpr, EngineError> {
    let unpacked = sites.unpack("k")?;
    unpacked.redimension(
        RedimensionSpec::new()
            .dimension(variant_dim.clone(), VARIANT_DIM)
            .attribute_from(COL_DIM, "k", Combine::First)
            .attribute("af", Combine::First),
    )
}

/// Per-column vector `[col] <af>` from a column index.
pub fn column_frequencies(columns: &ArrayExpr, matrix_chunk: i64) -> Result<ArrayExpr, EngineError> {
    columns.redimension(
        RedimensionSpec::new()
            .dimension(Dimension::new(COL_DIM, 0, UNBOUNDED, matrix_chunk), COL_DIM)
            .attribute("af", Combine::First),
    )
}

/// Dense genotype matrix `[sample_id, col] <g>` holding allele copies.
pub fn genotype_matrix(
    copies: &ArrayExpr,
    columns: &ArrayExpr,
    sample_dim: &Dimension,
    matrix_chunk: i64,
) -> Result<ArrayExpr, EngineError> {
    let joined = copies.project(&["copies"])?.join(&columns.project(&[COL_DIM])?)?;
    joined.redimension(
        RedimensionSpec::new()
            .dimension(sample_dim.clone(), SAMPLE_DIM)
            .dimension(Dimension::new(COL_DIM, 0, UNBOUNDED, matrix_chunk), COL_DIM)
            .attribute_from("g", "copies", Combine::First),
    )
}

/// The declared sample and variant axes of a genotype array.
pub fn genotype_axes(genotypes: &ArrayExpr) -> Result<(Dimension, Dimension), EngineError> {
    let schema = genotypes.schema();
    let sample = schema.require_dimension(SAMPLE_DIM)?;
    let variant = schema.require_dimension(VARIANT_DIM)?;
    Ok((schema.dimensions[sample].clone(), schema.dimensions[variant].clone()))
}
