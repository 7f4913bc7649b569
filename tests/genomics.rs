use approx::assert_relative_eq;
use genoarray::genomics::{Dataset, LdOptions, LdRegion, PcaOptions, hwe, ld, pca, titv, vcf};
use genoarray::model::Value;
use genoarray::shared::EngineConfig;
use genoarray::{Catalog, EngineError, Evaluator};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn config() -> EngineConfig {
    EngineConfig {
        workers: 2,
        sample_chunk: 4,
        variant_chunk: 2,
        matrix_chunk: 3,
        ..EngineConfig::default()
    }
}

/// Writes a VCF whose header names `samples` columns and whose data lines
/// are `(chrom, pos, ref, alt, genotypes)`.
fn write_vcf(dir: &Path, name: &str, samples: usize, records: &[(&str, i64, &str, &str, Vec<&str>)]) -> PathBuf {
    let mut text = String::from("##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT");
    for s in 0..samples {
        text.push_str(&format!("\tS{s}"));
    }
    text.push('\n');
    for (chrom, pos, reference, alt, calls) in records {
        assert_eq!(calls.len(), samples);
        text.push_str(&format!("{chrom}\t{pos}\t.\t{reference}\t{alt}\t.\tPASS\t.\tGT\t{}\n", calls.join("\t")));
    }
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn ingest(path: PathBuf) -> (Evaluator, Dataset) {
    let catalog = Catalog::new();
    let dataset = vcf::ingest(&catalog, "vcf", &[path], None, &config()).unwrap();
    (Evaluator::new(Arc::new(catalog), config()).unwrap(), dataset)
}

fn repeat(call: &'static str, n: usize) -> Vec<&'static str> {
    vec![call; n]
}

#[test]
fn titv_counts_only_biallelic_snvs() {
    let dir = tempfile::tempdir().unwrap();
    let het = || vec!["0/1", "0/0"];
    let path = write_vcf(
        dir.path(),
        "titv.vcf",
        2,
        &[
            ("1", 10, "A", "G", het()),
            ("1", 20, "C", "T", het()),
            ("1", 30, "A", "C", het()),
            ("1", 40, "G", "T", het()),
            ("1", 50, "A", "G,T", het()),
            ("1", 60, "AT", "A", het()),
        ],
    );
    let (mut ev, dataset) = ingest(path);
    let summary = titv::summarize(&mut ev, &dataset).unwrap();
    assert_eq!(summary.snps, 4);
    assert_eq!(summary.transitions, 2);
    assert_eq!(summary.transversions, 2);
    assert_relative_eq!(summary.ratio().unwrap(), 1.0);
}

#[test]
fn saved_catalog_gives_the_same_titv() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_vcf(
        dir.path(),
        "titv.vcf",
        3,
        &[
            ("2", 5, "C", "T", vec!["0/1", "1/1", "./."]),
            ("2", 7, "G", "A", vec!["0/0", "0/1", "0/1"]),
            ("10", 1, "T", "G", vec!["1|0", "0/0", "1"]),
        ],
    );
    let (mut ev, dataset) = ingest(path);
    let before = titv::summarize(&mut ev, &dataset).unwrap();

    let saved = dir.path().join("catalog");
    ev.catalog().save(&saved).unwrap();
    let mut reopened = Evaluator::new(Arc::new(Catalog::open(&saved).unwrap()), config()).unwrap();
    let after = titv::summarize(&mut reopened, &Dataset::named("vcf")).unwrap();
    assert_eq!(before, after);
    assert_eq!(after.transitions, 2);
    assert_eq!(after.transversions, 1);
}

#[test]
fn hwe_statistic_from_genotype_counts() {
    let dir = tempfile::tempdir().unwrap();
    let mut site = repeat("0/0", 50);
    site.extend(repeat("0/1", 40));
    site.extend(repeat("1/1", 10));
    let path = write_vcf(
        dir.path(),
        "hwe.vcf",
        100,
        &[
            ("1", 100, "A", "G", site),
            ("1", 200, "C", "T", repeat("0/0", 100)),
        ],
    );
    let (mut ev, dataset) = ingest(path);
    let table = hwe::run(&mut ev, &dataset).unwrap();
    assert_eq!(table.cell_count(), 2);

    let site = table.array();
    assert_eq!(site.value(&[0], "AA"), Some(&Value::Int(50)));
    assert_eq!(site.value(&[0], "Aa"), Some(&Value::Int(40)));
    assert_eq!(site.value(&[0], "aa"), Some(&Value::Int(10)));
    let p = site.value(&[0], "p").and_then(Value::as_f64).unwrap();
    assert_relative_eq!(p, 0.7, epsilon = 1e-12);
    let chi2 = site.value(&[0], "chi2").and_then(Value::as_f64).unwrap();
    assert_relative_eq!(chi2, 1.0 / 49.0 + 4.0 / 42.0 + 1.0 / 9.0, epsilon = 1e-9);

    assert_eq!(site.value(&[1], "chi2"), Some(&Value::Null));
}

#[test]
fn first_component_separates_two_groups() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_vcf(
        dir.path(),
        "pca.vcf",
        6,
        &[
            ("1", 1, "A", "G", vec!["0/0", "0/0", "0/1", "1/1", "1/1", "0/1"]),
            ("1", 2, "C", "T", vec!["0/0", "0/1", "0/0", "1/1", "0/1", "1/1"]),
            ("1", 3, "G", "A", vec!["0/1", "0/0", "0/0", "0/1", "1/1", "1/1"]),
            ("1", 4, "T", "C", vec!["0/0", "0/0", "0/0", "1/1", "1/1", "1/1"]),
            ("1", 5, "A", "C", vec!["0/0", "0/0", "0/0", "0/0", "0/0", "0/1"]),
            ("1", 6, "A", "T", vec!["0/1", "0/1", "./.", "0/1", "0/1", "0/1"]),
        ],
    );
    let (mut ev, dataset) = ingest(path);
    let options = PcaOptions {
        components: 2,
        ..PcaOptions::default()
    };
    let result = pca::run(&mut ev, &dataset, &options).unwrap();

    assert_eq!(result.sites, 4);
    assert_eq!(result.scores.cell_count(), 12);
    assert!(result.singular_values.windows(2).all(|pair| pair[0] >= pair[1]));
    assert!(result.singular_values[0] > 0.0);

    let pc1: Vec<f64> = (0..6)
        .map(|s| result.scores.array().value(&[s, 0], "value").and_then(Value::as_f64).unwrap())
        .collect();
    let group_a = pc1[..3].iter().all(|&x| x < 0.0) || pc1[..3].iter().all(|&x| x > 0.0);
    assert!(group_a, "first group split on PC1: {pc1:?}");
    assert!(pc1[0].signum() != pc1[3].signum());
    assert!(pc1[3..].iter().all(|&x| x.signum() == pc1[3].signum()));
}

#[test]
fn pca_without_common_sites_reports_empty_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_vcf(dir.path(), "rare.vcf", 3, &[("1", 1, "A", "G", vec!["0/0", "0/0", "0/0"])]);
    let (mut ev, dataset) = ingest(path);
    let result = pca::run(&mut ev, &dataset, &PcaOptions::default());
    assert!(matches!(result, Err(EngineError::EmptyInput(_))));
}

#[test]
fn ld_within_a_region() {
    let dir = tempfile::tempdir().unwrap();
    let dosage = vec!["0/0", "0/1", "1/1", "0/1", "0/0"];
    let flipped = vec!["1/1", "0/1", "0/0", "0/1", "1/1"];
    let path = write_vcf(
        dir.path(),
        "ld.vcf",
        5,
        &[
            ("chr1", 100, "A", "G", dosage.clone()),
            ("chr1", 150, "C", "T", dosage.clone()),
            ("chr1", 180, "G", "T", flipped),
            ("chr2", 120, "A", "C", dosage),
        ],
    );
    let (mut ev, dataset) = ingest(path);
    let options = LdOptions {
        region: Some(LdRegion::new("chr1", 100, 160)),
        ..LdOptions::default()
    };
    let result = ld::run(&mut ev, &dataset, &options).unwrap();
    assert_eq!(result.sites.cell_count(), 2);
    assert_eq!(result.correlation.cell_count(), 4);
    let r = result.correlation.array().value(&[0, 1], "r").and_then(Value::as_f64).unwrap();
    assert_relative_eq!(r, 1.0, epsilon = 1e-9);

    let everywhere = ld::run(&mut ev, &dataset, &LdOptions::default()).unwrap();
    assert_eq!(everywhere.sites.cell_count(), 4);
    let anti = everywhere.correlation.array().value(&[0, 2], "r").and_then(Value::as_f64).unwrap();
    assert_relative_eq!(anti, -1.0, epsilon = 1e-9);
    let r2 = everywhere.correlation.array().value(&[0, 2], "r2").and_then(Value::as_f64).unwrap();
    assert_relative_eq!(r2, 1.0, epsilon = 1e-9);

    let nowhere = LdOptions {
        region: Some(LdRegion::new("chr3", 0, 1_000)),
        ..LdOptions::default()
    };
    assert!(matches!(ld::run(&mut ev, &dataset, &nowhere), Err(EngineError::EmptyInput(_))));
}
