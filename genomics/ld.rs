//! Pairwise linkage disequilibrium (`r` and `r²`) between common sites.

use super::dataset::Dataset;
use super::matrix::{allele_copies, column_index, common_sites, genotype_axes, genotype_matrix, site_frequencies};
use crate::error::EngineError;
use crate::expr::{ArrayExpr, Evaluator, attr, lit};
use crate::linalg::{self, Axis, SweepOp, VALUE_ATTR};
use crate::model::ArrayHandle;

/// Closed interval `[start, end]` on one chromosome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LdRegion {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
}

impl LdRegion {
    pub fn new(chrom: &str, start: i64, end: i64) -> Self {
        Self {
            chrom: chrom.to_string(),
            start,
            end,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LdOptions {
    pub region: Option<LdRegion>,
    pub min_af: f64,
    pub max_af: f64,
}

impl Default for LdOptions {
    fn default() -> Self {
        Self {
            region: None,
            min_af: 0.1,
            max_af: 0.9,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LdPlan {
    /// `[variant_id] <col, af, chrom, pos>`: which site each matrix index is.
    pub sites: ArrayExpr,
    /// `[col, col_t] <value>` site covariance.
    pub covariance: ArrayExpr,
    /// `[col, col_t] <r, r2>`.
    pub correlation: ArrayExpr,
}

impl LdPlan {
    pub fn new(
        genotypes: &ArrayExpr,
        variants: &ArrayExpr,
        options: &LdOptions,
        matrix_chunk: i64,
    ) -> Result<Self, EngineError> {
        let (sample_dim, variant_dim) = genotype_axes(genotypes)?;
        let samples = sample_dim.hi - sample_dim.lo + 1;

        let genotypes = match &options.region {
            Some(region) => {
                let inside = variants
                    .filter(
                        attr("chrom")
                            .cmp_eq(lit(region.chrom.as_str()))
                            .and(attr("pos").between(lit(region.start), lit(region.end))),
                    )?
                    .project(&["pos"])?;
                let names: Vec<String> = genotypes.schema().attributes.iter().map(|a| a.name.clone()).collect();
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                genotypes.join(&inside)?.project(&names)?
            }
            None => genotypes.clone(),
        };

        let copies = allele_copies(&genotypes)?;
        let frequencies = site_frequencies(&copies)?;
        let selected = common_sites(&frequencies, options.min_af, options.max_af, samples)?;
        let columns = column_index(&selected, &variant_dim)?;
        let matrix = genotype_matrix(&copies, &columns, &sample_dim, matrix_chunk)?;

        let centered = linalg::center(&matrix, Axis::Columns)?;
        let covariance = linalg::crossprod(&centered)?;
        let cols = covariance.schema().dimensions[0].name.clone();
        let cols_t = covariance.schema().dimensions[1].name.clone();

        let sd = linalg::diag(&covariance)?
            .derive_one("sd", attr(VALUE_ATTR).sqrt())?
            .project(&["sd"])?;
        let correlation = covariance
            .sweep(Axis::Rows, &sd, SweepOp::Divide)?
            .sweep(Axis::Columns, &sd.rename_dimension(&cols, &cols_t)?, SweepOp::Divide)?
            .rename_attribute(VALUE_ATTR, "r")?
            .derive_one("r2", attr("r") * attr("r"))?;

        let sites = columns.join(&variants.project(&["chrom", "pos"])?)?;
        Ok(Self {
            sites,
            covariance,
            correlation,
        })
    }
}

#[derive(Debug)]
pub struct LdResult {
    pub correlation: ArrayHandle,
    pub sites: ArrayHandle,
}

pub fn run(ev: &mut Evaluator, dataset: &Dataset, options: &LdOptions) -> Result<LdResult, EngineError> {
    let plan = LdPlan::new(
        &dataset.genotypes(ev)?,
        &dataset.variants(ev)?,
        options,
        ev.config().matrix_chunk,
    )?;
    let sites = ev.materialize(&plan.sites)?;
    if sites.cell_count() == 0 {
        return Err(EngineError::EmptyInput(match &options.region {
            Some(r) => format!("no common site with complete calls in {}:{}-{}", r.chrom, r.start, r.end),
            None => "no common site with complete calls".to_string(),
        }));
    }
    log::info!("LD over {} sites", sites.cell_count());
    ev.materialize(&plan.covariance)?;
    let correlation = ev.materialize(&plan.correlation)?;
    ev.release(&plan.covariance);
    Ok(LdResult { correlation, sites })
}
