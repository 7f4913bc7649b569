//! Hardy-Weinberg equilibrium chi-square per site.

use super::dataset::{Dataset, VARIANT_DIM};
use crate::error::EngineError;
use crate::expr::{ArrayExpr, Evaluator, Scalar, attr, if_then_else, lit};
use crate::model::ArrayHandle;
use crate::ops::{AggSpec, DeriveSpec, GroupBy};

fn indicator(condition: Scalar) -> Scalar {
    if_then_else(condition, lit(1i64), lit(0i64))
}

fn deviation(observed: &str, expected: &str) -> Scalar {
    let diff = attr(observed) - attr(expected);
    (diff.clone() * diff) / attr(expected)
}

/// `[variant_id] <AA, Aa, aa, n, p, q, e_AA, e_Aa, e_aa, chi2>` over diploid
/// calls with alleles `0`/`1`. `A` is the reference allele, so `p` is the
/// reference frequency. `chi2` is null for a site with an expected count of
/// zero, which only that site's row reflects.
pub fn hwe_table(genotypes: &ArrayExpr) -> Result<ArrayExpr, EngineError> {
    let biallelic = genotypes.filter(
        attr("allele2")
            .is_null()
            .not()
            .and(attr("allele1").in_set([0i64, 1]))
            .and(attr("allele2").in_set([0i64, 1])),
    )?;
    let dosage = attr("allele1") + attr("allele2");
    let classified = biallelic.derive(vec![
        DeriveSpec::new("hom_ref", indicator(dosage.clone().cmp_eq(lit(0i64)))).not_null(),
        DeriveSpec::new("het", indicator(dosage.clone().cmp_eq(lit(1i64)))).not_null(),
        DeriveSpec::new("hom_alt", indicator(dosage.cmp_eq(lit(2i64)))).not_null(),
    ])?;
    let counts = classified.aggregate(
        vec![
            AggSpec::sum("hom_ref", "AA"),
            AggSpec::sum("het", "Aa"),
            AggSpec::sum("hom_alt", "aa"),
        ],
        GroupBy::dims(&[VARIANT_DIM]),
    )?;
    counts.derive(vec![
        DeriveSpec::new("n", attr("AA") + attr("Aa") + attr("aa")),
        DeriveSpec::new("p", (lit(2i64) * attr("AA") + attr("Aa")) / (lit(2i64) * attr("n"))),
        DeriveSpec::new("q", lit(1.0) - attr("p")),
        DeriveSpec::new("e_AA", attr("n") * attr("p") * attr("p")),
        DeriveSpec::new("e_Aa", lit(2.0) * attr("n") * attr("p") * attr("q")),
        DeriveSpec::new("e_aa", attr("n") * attr("q") * attr("q")),
        DeriveSpec::new(
            "chi2",
            deviation("AA", "e_AA") + deviation("Aa", "e_Aa") + deviation("aa", "e_aa"),
        ),
    ])
}

pub fn run(ev: &mut Evaluator, dataset: &Dataset) -> Result<ArrayHandle, EngineError> {
    let table = hwe_table(&dataset.genotypes(ev)?)?;
    let handle = ev.materialize(&table)?;
    let undefined = handle
        .rows()
        .iter()
        .filter(|row| row.values.last().is_some_and(|v| v.is_null()))
        .count();
    log::info!(
        "HWE over {} sites ({undefined} without a defined statistic)",
        handle.cell_count()
    );
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::dataset::{Genotype, VariantRecord};
    use crate::genomics::test_evaluator;
    use crate::model::Value;
    use approx::assert_relative_eq;

    fn dataset(ev: &Evaluator) -> Dataset {
        let samples: Vec<String> = (0..100).map(|i| format!("s{i}")).collect();
        let variants = vec![
            VariantRecord::new("1", 10, "A", "G"),
            VariantRecord::new("1", 20, "C", "T"),
        ];
        let mut calls = Vec::new();
        for s in 0..100 {
            let first = match s {
                0..50 => Genotype::diploid(0, 0),
                50..90 => Genotype::diploid(0, 1),
                _ => Genotype::diploid(1, 1),
            };
            calls.push((s, 0, first));
            let second = if s == 0 {
                Genotype {
                    allele1: 1,
                    allele2: None,
                    phased: false,
                }
            } else {
                Genotype::diploid(0, 0)
            };
            calls.push((s, 1, second));
        }
        Dataset::declare(ev.catalog(), "hwe", &samples, &variants, calls, ev.config()).unwrap()
    }

    fn float(handle: &ArrayHandle, site: i64, name: &str) -> f64 {
        handle.array().value(&[site], name).and_then(|v| v.as_f64()).unwrap()
    }

    #[test]
    fn chi_square_of_a_textbook_site() {
        let mut ev = test_evaluator();
        let data = dataset(&ev);
        let table = run(&mut ev, &data).unwrap();
        assert_eq!(table.array().value(&[0], "AA"), Some(&Value::Int(50)));
        assert_eq!(table.array().value(&[0], "Aa"), Some(&Value::Int(40)));
        assert_eq!(table.array().value(&[0], "aa"), Some(&Value::Int(10)));
        assert_relative_eq!(float(&table, 0, "p"), 0.7, epsilon = 1e-12);
        assert_relative_eq!(float(&table, 0, "q"), 0.3, epsilon = 1e-12);
        assert_relative_eq!(float(&table, 0, "e_AA"), 49.0, epsilon = 1e-9);
        assert_relative_eq!(float(&table, 0, "e_Aa"), 42.0, epsilon = 1e-9);
        assert_relative_eq!(float(&table, 0, "e_aa"), 9.0, epsilon = 1e-9);
        let expected = 1.0 / 49.0 + 4.0 / 42.0 + 1.0 / 9.0;
        assert_relative_eq!(float(&table, 0, "chi2"), expected, epsilon = 1e-9);
    }

    #[test]
    fn monomorphic_sites_have_no_statistic() {
        let mut ev = test_evaluator();
        let data = dataset(&ev);
        let table = run(&mut ev, &data).unwrap();
        // The haploid call is left out, leaving 99 homozygous reference calls.
        assert_eq!(table.array().value(&[1], "n"), Some(&Value::Int(99)));
        assert_eq!(table.array().value(&[1], "e_aa"), Some(&Value::Float(0.0)));
        assert_eq!(table.array().value(&[1], "chi2"), Some(&Value::Null));
        assert!(table.array().value(&[0], "chi2").is_some_and(|v| !v.is_null()));
    }
}
