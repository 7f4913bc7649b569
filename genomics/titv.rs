//! Transition/transversion ratio over biallelic SNVs.
//!
//! A site qualifies when `ref` and `alt` are each one of `A`, `C`, `G`, `T`
//! and differ. `A<->G` and `C<->T` are transitions; every other qualifying
//! change is a transversion. Multi-allelic `alt` fields never qualify.

use super::dataset::{Dataset, SAMPLE_DIM};
use super::matrix::allele_copies;
use crate::error::EngineError;
use crate::expr::{ArrayExpr, Evaluator, Scalar, attr, if_then_else, lit};
use crate::ops::{AggSpec, DeriveSpec, GroupBy};

const BASES: [&str; 4] = ["A", "C", "G", "T"];

fn is_change(from: &str, to: &str) -> Scalar {
    attr("ref").cmp_eq(lit(from)).and(attr("alt").cmp_eq(lit(to)))
}

/// Qualifying sites of a variant array with `transition`, `ti` and `tv`
/// (0/1 indicators) appended.
pub fn snv_flags(variants: &ArrayExpr) -> Result<ArrayExpr, EngineError> {
    let snvs = variants.filter(
        attr("ref")
            .in_set(BASES)
            .and(attr("alt").in_set(BASES))
            .and(attr("ref").cmp_ne(attr("alt"))),
    )?;
    let transition = is_change("A", "G")
        .or(is_change("G", "A"))
        .or(is_change("C", "T"))
        .or(is_change("T", "C"));
    snvs.derive(vec![
        DeriveSpec::new("transition", transition).not_null(),
        DeriveSpec::new("ti", if_then_else(attr("transition"), lit(1i64), lit(0i64))).not_null(),
        DeriveSpec::new("tv", lit(1i64) - attr("ti")).not_null(),
    ])
}

/// Population counts: every qualifying site counted once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TiTvSummary {
    pub snps: u64,
    pub transitions: u64,
    pub transversions: u64,
}

impl TiTvSummary {
    /// `None` when there are no transversions.
    pub fn ratio(&self) -> Option<f64> {
        (self.transversions > 0).then(|| self.transitions as f64 / self.transversions as f64)
    }
}

/// Single-cell aggregate with `snps`, `transitions` and `transversions`.
pub fn population_counts(variants: &ArrayExpr) -> Result<ArrayExpr, EngineError> {
    snv_flags(variants)?.aggregate(
        vec![
            AggSpec::count_cells("snps"),
            AggSpec::sum("ti", "transitions"),
            AggSpec::sum("tv", "transversions"),
        ],
        GroupBy::dims(&[]),
    )
}

pub fn summarize(ev: &mut Evaluator, dataset: &Dataset) -> Result<TiTvSummary, EngineError> {
    let counts = population_counts(&dataset.variants(ev)?)?;
    let handle = ev.materialize(&counts)?;
    let array = handle.array();
    let read = |name: &str| {
        array
            .value(&[0], name)
            .and_then(|v| v.as_i64())
            .map_or(0, |v| v.max(0) as u64)
    };
    let summary = TiTvSummary {
        snps: read("snps"),
        transitions: read("transitions"),
        transversions: read("transversions"),
    };
    ev.release(&counts);
    log::info!(
        "ti={} tv={} over {} SNVs",
        summary.transitions,
        summary.transversions,
        summary.snps
    );
    Ok(summary)
}

/// Per-sample ratio `[sample_id] <ti, tv, ratio>`: each genotype contributes
/// its alternate allele copies to `ti` or `tv` by its site's class. `ratio`
/// is null for samples without transversion copies.
pub fn per_sample(genotypes: &ArrayExpr, variants: &ArrayExpr) -> Result<ArrayExpr, EngineError> {
    let flags = snv_flags(variants)?.project(&["ti", "tv"])?;
    let copies = allele_copies(genotypes)?.project(&["copies"])?;
    copies
        .join(&flags)?
        .derive(vec![
            DeriveSpec::new("ti_copies", attr("copies") * attr("ti")),
            DeriveSpec::new("tv_copies", attr("copies") * attr("tv")),
        ])?
        .aggregate(
            vec![AggSpec::sum("ti_copies", "ti"), AggSpec::sum("tv_copies", "tv")],
            GroupBy::dims(&[SAMPLE_DIM]),
        )?
        .derive_one("ratio", attr("ti") / attr("tv"))
}
