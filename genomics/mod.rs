//! Population-genetics analyses composed from the array operators: VCF
//! ingest, Ti/Tv, PCA, LD and Hardy-Weinberg tests.

pub mod dataset;
pub mod hwe;
pub mod ld;
pub mod matrix;
pub mod pca;
pub mod titv;
pub mod vcf;

pub use dataset::{Call, Dataset, Genotype, SAMPLE_DIM, VARIANT_DIM, VariantRecord};
pub use ld::{LdOptions, LdRegion, LdResult};
pub use pca::{PcaOptions, PcaResult};
pub use titv::TiTvSummary;
pub use vcf::{VcfData, VcfError};

#[cfg(test)]
pub(crate) fn test_evaluator() -> crate::expr::Evaluator {
    let config = crate::shared::EngineConfig {
        workers: 2,
        ..crate::shared::EngineConfig::default()
    };
    crate::expr::Evaluator::new(std::sync::Arc::new(crate::model::Catalog::new()), config).unwrap()
}
