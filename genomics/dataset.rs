use crate::error::EngineError;
use crate::expr::{ArrayExpr, Evaluator};
use crate::model::{ArrayBuilder, Attribute, Catalog, Dimension, ScalarType, Schema, Value};
use crate::shared::EngineConfig;

pub const SAMPLE_DIM: &str = "sample_id";
pub const VARIANT_DIM: &str = "variant_id";

/// One site as read from a VCF data line. Bases are upper-cased; `alt` keeps
/// every alternate allele joined by commas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantRecord {
    pub chrom: String,
    pub pos: i64,
    pub id: Option<String>,
    pub reference: String,
    pub alt: String,
}

impl VariantRecord {
    pub fn new(chrom: &str, pos: i64, reference: &str, alt: &str) -> Self {
        Self {
            chrom: chrom.to_string(),
            pos,
            id: None,
            reference: reference.to_ascii_uppercase(),
            alt: alt.to_ascii_uppercase(),
        }
    }
}

/// A called genotype. `allele2` is `None` for haploid calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Genotype {
    pub allele1: i64,
    pub allele2: Option<i64>,
    pub phased: bool,
}

impl Genotype {
    pub fn diploid(allele1: i64, allele2: i64) -> Self {
        Self {
            allele1,
            allele2: Some(allele2),
            phased: false,
        }
    }
}

/// One call: sample index, variant index and the genotype.
pub type Call = (usize, usize, Genotype);

/// Names of the three catalog arrays that make up one genotype dataset.
///
/// * `<prefix>_samples[sample_id]`: `sample`
/// * `<prefix>_variants[variant_id]`: `chrom`, `pos`, `id`, `ref`, `alt`
/// * `<prefix>_genotypes[sample_id, variant_id]`: `allele1`, `allele2`, `phased`
///
/// A missing call is an absent genotype cell, never a null one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset {
    pub samples: String,
    pub variants: String,
    pub genotypes: String,
}

impl Dataset {
    pub fn named(prefix: &str) -> Self {
        Self {
            samples: format!("{prefix}_samples"),
            variants: format!("{prefix}_variants"),
            genotypes: format!("{prefix}_genotypes"),
        }
    }

    /// Builds and registers the three arrays. Fails with
    /// [`EngineError::NameCollision`] if any of the names is taken.
    pub fn declare(
        catalog: &Catalog,
        prefix: &str,
        samples: &[String],
        variants: &[VariantRecord],
        calls: impl IntoIterator<Item = Call>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let names = Self::named(prefix);
        let sample_dim = axis(SAMPLE_DIM, samples.len(), config.sample_chunk);
        let variant_dim = axis(VARIANT_DIM, variants.len(), config.variant_chunk);

        let mut sample_rows = ArrayBuilder::new(samples_schema(sample_dim.clone())?);
        for (i, name) in samples.iter().enumerate() {
            sample_rows.insert(vec![i as i64], vec![Value::str(name)])?;
        }

        let mut variant_rows = ArrayBuilder::new(variants_schema(variant_dim.clone())?);
        for (i, v) in variants.iter().enumerate() {
            variant_rows.insert(
                vec![i as i64],
                vec![
                    Value::str(&v.chrom),
                    Value::Int(v.pos),
                    v.id.as_deref().map_or(Value::Null, Value::str),
                    Value::str(&v.reference),
                    Value::str(&v.alt),
                ],
            )?;
        }

        let mut genotype_rows = ArrayBuilder::new(genotypes_schema(sample_dim, variant_dim)?);
        for (sample, variant, call) in calls {
            genotype_rows.insert(
                vec![sample as i64, variant as i64],
                vec![
                    Value::Int(call.allele1),
                    Value::from(call.allele2),
                    Value::Bool(call.phased),
                ],
            )?;
        }

        for name in [&names.samples, &names.variants, &names.genotypes] {
            if catalog.contains(name) {
                return Err(EngineError::NameCollision(name.clone()));
            }
        }
        let genotype_count = genotype_rows.len();
        catalog.declare_array(&names.samples, sample_rows.finish())?;
        catalog.declare_array(&names.variants, variant_rows.finish())?;
        catalog.declare_array(&names.genotypes, genotype_rows.finish())?;
        log::info!(
            "Registered dataset '{prefix}': {} samples, {} variants, {} called genotypes",
            samples.len(),
            variants.len(),
            genotype_count
        );
        Ok(names)
    }

    pub fn samples(&self, ev: &Evaluator) -> Result<ArrayExpr, EngineError> {
        ev.scan(&self.samples)
    }

    pub fn variants(&self, ev: &Evaluator) -> Result<ArrayExpr, EngineError> {
        ev.scan(&self.variants)
    }

    pub fn genotypes(&self, ev: &Evaluator) -> Result<ArrayExpr, EngineError> {
        ev.scan(&self.genotypes)
    }

    /// Drops the three arrays from the catalog.
    pub fn drop_from(&self, catalog: &Catalog) -> Result<(), EngineError> {
        for name in [&self.samples, &self.variants, &self.genotypes] {
            catalog.drop_array(name)?;
        }
        Ok(())
    }
}

fn axis(name: &str, len: usize, chunk: i64) -> Dimension {
    Dimension::new(name, 0, (len as i64 - 1).max(0), chunk)
}

pub fn samples_schema(sample_dim: Dimension) -> Result<Schema, EngineError> {
    Schema::new(
        vec![sample_dim],
        vec![Attribute::required("sample", ScalarType::String)],
    )
}

pub fn variants_schema(variant_dim: Dimension) -> Result<Schema, EngineError> {
    Schema::new(
        vec![variant_dim],
        vec![
            Attribute::required("chrom", ScalarType::String),
            Attribute::required("pos", ScalarType::Int64),
            Attribute::nullable("id", ScalarType::String),
            Attribute::required("ref", ScalarType::String),
            Attribute::required("alt", ScalarType::String),
        ],
    )
}

pub fn genotypes_schema(sample_dim: Dimension, variant_dim: Dimension) -> Result<Schema, EngineError> {
    Schema::new(
        vec![sample_dim, variant_dim],
        vec![
            Attribute::required("allele1", ScalarType::Int64),
            Attribute::nullable("allele2", ScalarType::Int64),
            Attribute::required("phased", ScalarType::Bool),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaring_twice_collides_without_partial_writes() {
        let catalog = Catalog::new();
        let config = EngineConfig::default();
        let samples = vec!["s1".to_string(), "s2".to_string()];
        let variants = vec![VariantRecord::new("1", 100, "a", "g")];
        let calls = vec![(0, 0, Genotype::diploid(0, 1))];
        let names = Dataset::declare(&catalog, "demo", &samples, &variants, calls.clone(), &config).unwrap();
        assert_eq!(names.genotypes, "demo_genotypes");
        assert_eq!(catalog.len(), 3);

        let err = Dataset::declare(&catalog, "demo", &samples, &variants, calls, &config).unwrap_err();
        assert!(matches!(err, EngineError::NameCollision(_)));
        assert_eq!(catalog.len(), 3);

        let variants = catalog.lookup("demo_variants").unwrap();
        assert_eq!(variants.array().value(&[0], "ref"), Some(&Value::str("A")));
        let genotypes = catalog.lookup("demo_genotypes").unwrap();
        assert_eq!(genotypes.cell_count(), 1);
        assert!(genotypes.array().get(&[1, 0]).is_none());
    }
}
