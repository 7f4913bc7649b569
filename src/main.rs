#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use genoarray::genomics::{Dataset, LdOptions, LdRegion, PcaOptions, hwe, ld, pca, titv, vcf};
use genoarray::shared::{EngineConfig, write_tsv_file};
use genoarray::{ArrayHandle, Catalog, Evaluator};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Args, Debug)]
struct InputArgs {
    /// VCF file (plain or gzip); repeat to read several files as one dataset
    #[arg(long = "file", value_name = "VCF")]
    files: Vec<PathBuf>,

    /// How many records to read per file
    #[arg(long, value_name = "N")]
    nlimit: Option<usize>,

    /// Saved catalog to read the dataset from instead of VCF files
    #[arg(long, value_name = "DIR", conflicts_with = "files")]
    catalog: Option<PathBuf>,

    /// Dataset name inside the catalog
    #[arg(long, default_value = "vcf")]
    prefix: String,
}

#[derive(Parser, Debug)]
#[command(
    name = "genoarray",
    version,
    about = "Population-genetics analyses on a lazy, chunk-parallel array engine."
)]
struct Cli {
    /// Engine configuration file (TOML); GENOARRAY_WORKERS overrides the worker count
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read VCF files and save them as a catalog directory
    #[command(about = "Convert VCF files into a saved catalog")]
    Ingest {
        #[command(flatten)]
        input: InputArgs,

        /// Directory to write the catalog to
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },

    /// Count transitions and transversions over biallelic SNVs
    #[command(about = "Count ti/tv on VCF files")]
    Titv {
        #[command(flatten)]
        input: InputArgs,

        /// Write per-sample ti, tv and ratio to this TSV file
        #[arg(long, value_name = "PATH")]
        per_sample: Option<PathBuf>,
    },

    /// Principal components of the samples over common sites
    #[command(about = "Project samples onto principal components (outputs: TSV of scores)")]
    Pca {
        #[command(flatten)]
        input: InputArgs,

        /// Number of components to keep
        #[arg(long, default_value = "10")]
        components: usize,

        /// Lowest allele frequency of a site used for the matrix
        #[arg(long, default_value = "0.1")]
        min_af: f64,

        /// Highest allele frequency of a site used for the matrix
        #[arg(long, default_value = "0.9")]
        max_af: f64,

        /// Standardized value used for monomorphic sites
        #[arg(long)]
        zero_variance_fill: Option<f64>,

        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Pairwise r and r² between common sites
    #[command(about = "Linkage disequilibrium matrix (outputs: TSV of r and r2)")]
    Ld {
        #[command(flatten)]
        input: InputArgs,

        /// Restrict to CHROM:START-END (inclusive)
        #[arg(long, value_parser = parse_region)]
        region: Option<LdRegion>,

        #[arg(long, default_value = "0.1")]
        min_af: f64,

        #[arg(long, default_value = "0.9")]
        max_af: f64,

        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Write the variant behind each matrix index to this TSV file
        #[arg(long, value_name = "PATH")]
        sites_output: Option<PathBuf>,
    },

    /// Hardy-Weinberg chi-square per site
    #[command(about = "Hardy-Weinberg equilibrium test (outputs: TSV per site)")]
    Hwe {
        #[command(flatten)]
        input: InputArgs,

        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn parse_region(text: &str) -> Result<LdRegion, String> {
    let (chrom, span) = text
        .rsplit_once(':')
        .ok_or_else(|| format!("expected CHROM:START-END, found '{text}'"))?;
    let (start, end) = span
        .split_once('-')
        .ok_or_else(|| format!("expected START-END after ':', found '{span}'"))?;
    let start: i64 = start.trim().parse().map_err(|e| format!("bad start '{start}': {e}"))?;
    let end: i64 = end.trim().parse().map_err(|e| format!("bad end '{end}': {e}"))?;
    if start > end {
        return Err(format!("region start {start} is after its end {end}"));
    }
    Ok(LdRegion::new(chrom, start, end))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    })
}

/// The evaluator plus the dataset named by `input`, read from VCF files or
/// from a saved catalog. Also returns the number of VCF records read.
fn open_dataset(
    input: &InputArgs,
    config: EngineConfig,
) -> Result<(Evaluator, Dataset, usize), Box<dyn std::error::Error>> {
    let (catalog, dataset, records) = match &input.catalog {
        Some(dir) => {
            let catalog = Catalog::open(dir)?;
            let dataset = Dataset::named(&input.prefix);
            let records = catalog.lookup(&dataset.variants)?.cell_count();
            (catalog, dataset, records)
        }
        None => {
            let catalog = Catalog::new();
            let data = vcf::read(&input.files, input.nlimit)?;
            let records = data.variants.len();
            let dataset = Dataset::declare(
                &catalog,
                &input.prefix,
                &data.samples,
                &data.variants,
                data.calls,
                &config,
            )?;
            (catalog, dataset, records)
        }
    };
    let ev = Evaluator::new(Arc::new(catalog), config)?;
    Ok((ev, dataset, records))
}

fn export(handle: &ArrayHandle, path: Option<&Path>) -> CliResult {
    if let Some(path) = path {
        write_tsv_file(handle.array(), path)?;
        println!("Results written to {}", path.display());
    }
    Ok(())
}

fn run_ingest(config: EngineConfig, input: InputArgs, out: PathBuf) -> CliResult {
    let (ev, dataset, records) = open_dataset(&input, config)?;
    ev.catalog().save(&out)?;
    println!(
        "Saved {records} records as '{}', '{}' and '{}' in {}",
        dataset.samples,
        dataset.variants,
        dataset.genotypes,
        out.display()
    );
    Ok(())
}

fn run_titv(config: EngineConfig, input: InputArgs, per_sample: Option<PathBuf>) -> CliResult {
    let (mut ev, dataset, records) = open_dataset(&input, config)?;
    let summary = titv::summarize(&mut ev, &dataset)?;
    let ratio = summary
        .ratio()
        .map_or_else(|| "nan".to_string(), |r| r.to_string());
    println!(
        "tot={records} ti={}  tv={}  ti/tv={ratio}",
        summary.transitions, summary.transversions
    );
    if let Some(path) = per_sample {
        let expr = titv::per_sample(&dataset.genotypes(&ev)?, &dataset.variants(&ev)?)?;
        let handle = ev.materialize(&expr)?;
        export(&handle, Some(&path))?;
    }
    Ok(())
}

fn run_pca(config: EngineConfig, input: InputArgs, options: PcaOptions, output: Option<PathBuf>) -> CliResult {
    let (mut ev, dataset, _) = open_dataset(&input, config)?;
    let result = pca::run(&mut ev, &dataset, &options)?;
    println!(
        "PCA over {} sites; leading singular values: {}",
        result.sites,
        result
            .singular_values
            .iter()
            .take(options.components)
            .map(|d| format!("{d:.4}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    export(&result.scores, output.as_deref())
}

fn run_ld(
    config: EngineConfig,
    input: InputArgs,
    options: LdOptions,
    output: Option<PathBuf>,
    sites_output: Option<PathBuf>,
) -> CliResult {
    let (mut ev, dataset, _) = open_dataset(&input, config)?;
    let result = ld::run(&mut ev, &dataset, &options)?;
    println!(
        "LD over {} sites ({} pairs)",
        result.sites.cell_count(),
        result.correlation.cell_count()
    );
    export(&result.correlation, output.as_deref())?;
    export(&result.sites, sites_output.as_deref())
}

fn run_hwe(config: EngineConfig, input: InputArgs, output: Option<PathBuf>) -> CliResult {
    let (mut ev, dataset, _) = open_dataset(&input, config)?;
    let table = hwe::run(&mut ev, &dataset)?;
    println!("HWE statistics for {} sites", table.cell_count());
    export(&table, output.as_deref())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { config, command } = Cli::parse();
    let Some(command) = command else {
        let _ = Cli::command().print_help();
        println!();
        return;
    };

    let result = load_config(config.as_deref()).and_then(|config| match command {
        Commands::Ingest { input, out } => run_ingest(config, input, out),
        Commands::Titv { input, per_sample } => run_titv(config, input, per_sample),
        Commands::Pca {
            input,
            components,
            min_af,
            max_af,
            zero_variance_fill,
            output,
        } => run_pca(
            config,
            input,
            PcaOptions {
                components,
                min_af,
                max_af,
                zero_variance_fill,
            },
            output,
        ),
        Commands::Ld {
            input,
            region,
            min_af,
            max_af,
            output,
            sites_output,
        } => run_ld(
            config,
            input,
            LdOptions {
                region,
                min_af,
                max_af,
            },
            output,
            sites_output,
        ),
        Commands::Hwe { input, output } => run_hwe(config, input, output),
    });

    if let Err(e) = result {
        if let Some(vcf::VcfError::NoInput) = e.downcast_ref::<vcf::VcfError>() {
            eprintln!("Error: must specify a VCF file with --file or a saved catalog with --catalog");
        } else {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_parse() {
        assert_eq!(parse_region("chr1:100-200").unwrap(), LdRegion::new("chr1", 100, 200));
        assert!(parse_region("chr1:200-100").is_err());
        assert!(parse_region("chr1").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn repeated_files_accumulate() {
        let cli = Cli::parse_from(["genoarray", "titv", "--file", "a.vcf", "--file", "b.vcf.gz", "--nlimit", "5"]);
        match cli.command {
            Some(Commands::Titv { input, .. }) => {
                assert_eq!(input.files.len(), 2);
                assert_eq!(input.nlimit, Some(5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
