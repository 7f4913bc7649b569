//! Principal components of a genotype dataset.
//!
//! Common sites are densified into a `samples x sites` matrix of allele
//! copies, each column is centered and scaled by `1/sqrt(p(1-p))`, and the
//! sample covariance `X·Xᵗ/(m-1)` is decomposed. Scores are
//! `U[:, 0..k] · diag(d[0..k])`.

use super::dataset::Dataset;
use super::matrix::{
    COL_DIM, allele_copies, column_frequencies, column_index, common_sites, genotype_axes, genotype_matrix,
    site_frequencies,
};
use crate::error::EngineError;
use crate::expr::{ArrayExpr, Evaluator, attr, dim, lit};
use crate::linalg::{self, Axis, COMPONENT_DIM, SvdExprs, SweepOp};
use crate::model::ArrayHandle;

#[derive(Clone, Debug, PartialEq)]
pub struct PcaOptions {
    pub components: usize,
    pub min_af: f64,
    pub max_af: f64,
    /// Replaces the standardized value of monomorphic columns, which would
    /// otherwise be null and poison the products.
    pub zero_variance_fill: Option<f64>,
}

impl Default for PcaOptions {
    fn default() -> Self {
        Self {
            components: 10,
            min_af: 0.1,
            max_af: 0.9,
            zero_variance_fill: None,
        }
    }
}

/// Lazy stages of the pipeline, kept so callers can inspect or reuse them.
#[derive(Clone, Debug)]
pub struct PcaPlan {
    /// `[variant_id] <col, af>` for every selected site.
    pub columns: ArrayExpr,
    /// Centered and scaled `[sample_id, col]` matrix.
    pub standardized: ArrayExpr,
    /// `[sample_id, sample_id_t]` covariance.
    pub covariance: ArrayExpr,
    pub svd: SvdExprs,
}

impl PcaPlan {
    pub fn new(genotypes: &ArrayExpr, options: &PcaOptions, matrix_chunk: i64) -> Result<Self, EngineError> {
        let (sample_dim, variant_dim) = genotype_axes(genotypes)?;
        let samples = sample_dim.hi - sample_dim.lo + 1;

        let copies = allele_copies(genotypes)?;
        let frequencies = site_frequencies(&copies)?;
        let sites = common_sites(&frequencies, options.min_af, options.max_af, samples)?;
        let columns = column_index(&sites, &variant_dim)?;
        let matrix = genotype_matrix(&copies, &columns, &sample_dim, matrix_chunk)?;

        let centered = linalg::center(&matrix, Axis::Columns)?;
        let scale = column_frequencies(&columns, matrix_chunk)?
            .derive_one("scale", (attr("af") * (lit(1.0) - attr("af"))).sqrt())?
            .project(&["scale"])?;
        let mut standardized = centered.sweep(Axis::Columns, &scale, SweepOp::Divide)?;
        if let Some(fill) = options.zero_variance_fill {
            standardized = standardized
                .derive_one("filled", attr("g").coalesce(lit(fill)))?
                .project(&["filled"])?;
        }
        let covariance = linalg::tcrossprod(&standardized)?;
        let svd = linalg::svd(&covariance)?;
        Ok(Self {
            columns,
            standardized,
            covariance,
            svd,
        })
    }

    /// `[sample_id, component] <value>` for the first `k` components.
    pub fn scores(&self, k: usize) -> Result<ArrayExpr, EngineError> {
        let leading = dim(COMPONENT_DIM).cmp_lt(lit(k as i64));
        let u = self.svd.u.filter(leading.clone())?;
        let d = self.svd.d.filter(leading)?;
        u.sweep(Axis::Columns, &d, SweepOp::Multiply)
    }
}

#[derive(Debug)]
pub struct PcaResult {
    pub scores: ArrayHandle,
    /// Singular values of the covariance matrix, largest first.
    pub singular_values: Vec<f64>,
    /// Number of sites that entered the matrix.
    pub sites: usize,
}

pub fn run(ev: &mut Evaluator, dataset: &Dataset, options: &PcaOptions) -> Result<PcaResult, EngineError> {
    let genotypes = dataset.genotypes(ev)?;
    let plan = PcaPlan::new(&genotypes, options, ev.config().matrix_chunk)?;
    let columns = ev.materialize(&plan.columns)?;
    let sites = columns.cell_count();
    if sites == 0 {
        return Err(EngineError::EmptyInput(format!(
            "no site has allele frequency in [{}, {}] and a call for every sample",
            options.min_af, options.max_af
        )));
    }
    log::info!("PCA over {sites} sites");

    ev.materialize(&plan.covariance)?;
    let d = ev.materialize(&plan.svd.d)?;
    let singular_values: Vec<f64> = d
        .rows()
        .iter()
        .filter_map(|row| row.values[0].as_f64())
        .collect();
    let k = options.components.min(singular_values.len());
    let scores = ev.materialize(&plan.scores(k)?)?;
    ev.release(&plan.columns);
    ev.release(&plan.covariance);
    Ok(PcaResult {
        scores,
        singular_values,
        sites,
    })
}

/// Matrix column of each selected site, in the order the columns were built.
pub fn column_of(columns: &ArrayHandle) -> Vec<(i64, i64)> {
    columns
        .rows()
        .into_iter()
        .filter_map(|row| {
            let col = row.values[columns.schema().attribute_index(COL_DIM)?].as_i64()?;
            Some((row.coords[0], col))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::dataset::{Genotype, VariantRecord};
    use crate::genomics::test_evaluator;
    use crate::linalg::{SvdFactors, VALUE_ATTR};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    // Allele copies per sample (rows) and site (columns); -1 is a missing call.
    const COPIES: [[i64; 5]; 4] = [
        [0, 1, 2, 0, 1],
        [1, 1, 2, 0, 1],
        [2, 0, 2, 0, 1],
        [1, 0, 1, 0, -1],
    ];

    fn dataset(ev: &Evaluator) -> Dataset {
        let samples: Vec<String> = (0..4).map(|i| format!("s{i}")).collect();
        let variants: Vec<VariantRecord> = (0..5).map(|j| VariantRecord::new("1", 100 * (j + 1), "A", "G")).collect();
        let mut calls = Vec::new();
        for (s, row) in COPIES.iter().enumerate() {
            for (v, &c) in row.iter().enumerate() {
                if c >= 0 {
                    let call = Genotype::diploid(i64::from(c == 2), i64::from(c >= 1));
                    calls.push((s, v, call));
                }
            }
        }
        Dataset::declare(ev.catalog(), "pca", &samples, &variants, calls, ev.config()).unwrap()
    }

    fn expected_covariance() -> Array2<f64> {
        let x: Array2<f64> = array![[0., 1., 2.], [1., 1., 2.], [2., 0., 2.], [1., 0., 1.]];
        let p: [f64; 3] = [0.5, 0.25, 0.875];
        let mut z = x.clone();
        for j in 0..3 {
            let mean = x.column(j).mean().unwrap();
            let scale = (p[j] * (1.0 - p[j])).sqrt();
            z.column_mut(j).mapv_inplace(|v| (v - mean) / scale);
        }
        z.dot(&z.t()) / 2.0
    }

    #[test]
    fn rare_and_incomplete_sites_are_excluded() {
        let mut ev = test_evaluator();
        let data = dataset(&ev);
        let plan = PcaPlan::new(&data.genotypes(&ev).unwrap(), &PcaOptions::default(), 4).unwrap();
        let columns = ev.materialize(&plan.columns).unwrap();
        assert_eq!(column_of(&columns), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn scores_match_a_direct_decomposition() {
        let mut ev = test_evaluator();
        let data = dataset(&ev);
        let options = PcaOptions {
            components: 2,
            ..PcaOptions::default()
        };
        let result = run(&mut ev, &data, &options).unwrap();
        assert_eq!(result.sites, 3);

        let direct = SvdFactors::compute(&expected_covariance()).unwrap();
        assert_eq!(result.singular_values.len(), direct.rank());
        for (got, want) in result.singular_values.iter().zip(direct.d.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-9);
        }
        assert_eq!(result.scores.cell_count(), 8);
        for i in 0..4 {
            for k in 0..2 {
                let got = result.scores.array().value(&[i, k], VALUE_ATTR).unwrap().as_f64().unwrap();
                let want = direct.u[[i as usize, k as usize]] * direct.d[k as usize];
                assert_abs_diff_eq!(got, want, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn no_common_sites_is_an_error() {
        let mut ev = test_evaluator();
        let data = dataset(&ev);
        let options = PcaOptions {
            min_af: 0.95,
            max_af: 1.0,
            ..PcaOptions::default()
        };
        assert!(matches!(run(&mut ev, &data, &options), Err(EngineError::EmptyInput(_))));
    }
}
