//! Primitive codecs of the sample index.

pub mod allele;
pub mod genotype;
pub mod variant;
