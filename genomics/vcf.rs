//! Plain-text and gzip VCF ingest into a [`Dataset`].

use flate2::read::MultiGzDecoder;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::dataset::{Call, Dataset, Genotype, VariantRecord};
use crate::error::EngineError;
use crate::model::Catalog;
use crate::shared::EngineConfig;

const PROGRESS_EVERY: usize = 1000;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum VcfError {
    #[error("Failed to read VCF file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("'{path}' lists samples {found:?}, but earlier files listed {expected:?}.")]
    SampleMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("'{0}' has no #CHROM header line.")]
    MissingHeader(PathBuf),
    #[error("No VCF files were given.")]
    NoInput,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Everything read from one or more VCF files, before registration.
#[derive(Debug, Default)]
pub struct VcfData {
    pub samples: Vec<String>,
    pub variants: Vec<VariantRecord>,
    pub calls: Vec<Call>,
}

impl VcfData {
    /// Orders variants by natural chromosome order, then position, keeping
    /// file order for ties, and renumbers the calls to match.
    fn sort_variants(&mut self) {
        let mut order: Vec<usize> = (0..self.variants.len()).collect();
        order.sort_by(|&a, &b| {
            let (va, vb) = (&self.variants[a], &self.variants[b]);
            match natord::compare(&va.chrom, &vb.chrom) {
                Ordering::Equal => va.pos.cmp(&vb.pos),
                other => other,
            }
        });
        let mut new_index = vec![0usize; order.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }
        let mut variants: Vec<Option<VariantRecord>> = std::mem::take(&mut self.variants).into_iter().map(Some).collect();
        self.variants = order.iter().filter_map(|&old| variants[old].take()).collect();
        for call in &mut self.calls {
            call.1 = new_index[call.1];
        }
        self.calls.sort_unstable_by_key(|&(s, v, _)| (s, v));
    }
}

fn open(path: &Path) -> Result<Box<dyn BufRead>, VcfError> {
    let io_err = |source| VcfError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let is_gzip = reader.fill_buf().map_err(io_err)?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        let decoder: Box<dyn Read> = Box::new(MultiGzDecoder::new(reader));
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(reader))
    }
}

/// `0/1`, `1|0`, `0` or `./.`. Any missing allele makes the whole call missing.
fn parse_genotype(field: &str) -> Option<Genotype> {
    let gt = field.split(':').next().unwrap_or(field);
    let phased = gt.contains('|');
    let mut alleles = gt.split(['/', '|']);
    let allele1 = alleles.next()?.parse::<i64>().ok()?;
    let allele2 = match alleles.next() {
        Some(a) => Some(a.parse::<i64>().ok()?),
        None => None,
    };
    if alleles.next().is_some() {
        return None;
    }
    Some(Genotype {
        allele1,
        allele2,
        phased,
    })
}

/// Reads one file into `data`, appending variants and calls. At most
/// `nlimit` data records are read when a limit is given.
fn read_file(path: &Path, nlimit: Option<usize>, data: &mut VcfData, first: bool) -> Result<usize, VcfError> {
    log::info!("Processing VCF file {}", path.display());
    let reader = open(path)?;
    let malformed = |line: usize, message: String| VcfError::Malformed {
        path: path.to_path_buf(),
        line,
        message,
    };
    let mut samples: Option<Vec<String>> = None;
    let mut records = 0usize;
    let mut snvs = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| VcfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let line_no = line_no + 1;
        if line.starts_with("##") || line.trim().is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('#') {
            let found: Vec<String> = header.split('\t').skip(9).map(str::to_string).collect();
            if first {
                data.samples = found.clone();
            } else if found != data.samples {
                return Err(VcfError::SampleMismatch {
                    path: path.to_path_buf(),
                    expected: data.samples.clone(),
                    found,
                });
            }
            samples = Some(found);
            continue;
        }
        let Some(samples) = samples.as_ref() else {
            return Err(VcfError::MissingHeader(path.to_path_buf()));
        };
        if nlimit.is_some_and(|limit| records >= limit) {
            break;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 8 {
            return Err(malformed(line_no, format!("expected at least 8 columns, found {}", fields.len())));
        }
        let pos = fields[1]
            .parse::<i64>()
            .map_err(|err| malformed(line_no, format!("bad position '{}': {err}", fields[1])))?;
        let mut variant = VariantRecord::new(fields[0], pos, fields[3], fields[4]);
        variant.id = (fields[2] != ".").then(|| fields[2].to_string());
        if variant.reference.len() == 1 && variant.alt.len() == 1 && variant.alt != "." {
            snvs += 1;
        }

        let variant_index = data.variants.len();
        if fields.len() > 9 {
            let gt_index = fields[8].split(':').position(|key| key == "GT");
            if let Some(gt_index) = gt_index {
                if fields.len() - 9 != samples.len() {
                    return Err(malformed(
                        line_no,
                        format!("{} genotype columns for {} samples", fields.len() - 9, samples.len()),
                    ));
                }
                for (sample, field) in fields[9..].iter().enumerate() {
                    let gt = field.split(':').nth(gt_index).unwrap_or(".");
                    if let Some(call) = parse_genotype(gt) {
                        data.calls.push((sample, variant_index, call));
                    }
                }
            }
        }
        data.variants.push(variant);
        records += 1;
        if records % PROGRESS_EVERY == 0 {
            log::info!("num records={records} tot={} snvs={snvs}", data.variants.len());
        }
    }
    if samples.is_none() {
        return Err(VcfError::MissingHeader(path.to_path_buf()));
    }
    Ok(records)
}

/// Reads every file in order; all files must list the same samples.
pub fn read(paths: &[PathBuf], nlimit: Option<usize>) -> Result<VcfData, VcfError> {
    if paths.is_empty() {
        return Err(VcfError::NoInput);
    }
    let mut data = VcfData::default();
    for (i, path) in paths.iter().enumerate() {
        let records = read_file(path, nlimit, &mut data, i == 0)?;
        log::info!("Read {records} records from {}", path.display());
    }
    data.sort_variants();
    Ok(data)
}

/// Reads the files and registers them as the dataset `prefix`.
pub fn ingest(
    catalog: &Catalog,
    prefix: &str,
    paths: &[PathBuf],
    nlimit: Option<usize>,
    config: &EngineConfig,
) -> Result<Dataset, VcfError> {
    let data = read(paths, nlimit)?;
    Ok(Dataset::declare(
        catalog,
        prefix,
        &data.samples,
        &data.variants,
        data.calls,
        config,
    )?)
}
