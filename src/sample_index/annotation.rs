//! Conversion of variant annotation into the annotation index.
//!
//! The annotation index of a variant is one summary byte (see `bits`) plus one
//! population frequency range code per configured population.

use std::collections::BTreeMap;

use super::codec::genotype::GenotypeCode;
use super::conf::POP_FREQ_THRESHOLD_001;
use super::schema::{columns::ColumnKind, range_code, SampleIndexSchema};
use super::store::{Row, RowKey};

/// Bits of the annotation summary byte.
pub mod bits {
    pub const PROTEIN_CODING: u8 = 1 << 0;
    pub const LOF: u8 = 1 << 1;
    pub const LOF_EXTENDED: u8 = 1 << 2;
    pub const LOF_EXTENDED_BASIC: u8 = 1 << 3;
    pub const POP_FREQ_ANY_001: u8 = 1 << 4;
    pub const CLINICAL: u8 = 1 << 5;
    pub const MISSENSE: u8 = 1 << 6;
    pub const INTERGENIC: u8 = 1 << 7;
}

pub const PROTEIN_CODING_BIOTYPE: &str = "protein_coding";
pub const MISSENSE_VARIANT: &str = "missense_variant";
pub const INTERGENIC_VARIANT: &str = "intergenic_variant";
pub const BASIC_FLAG: &str = "basic";

/// Consequence terms counted as loss of function.
pub const LOF_SET: &[&str] = &[
    "frameshift_variant",
    "incomplete_terminal_codon_variant",
    "start_lost",
    "stop_gained",
    "stop_lost",
    "splice_acceptor_variant",
    "splice_donor_variant",
    "feature_truncation",
    "transcript_ablation",
];

/// Consequence terms counted as extended loss of function.
pub const LOF_EXTENDED_SET: &[&str] = &[
    "frameshift_variant",
    "incomplete_terminal_codon_variant",
    "start_lost",
    "stop_gained",
    "stop_lost",
    "splice_acceptor_variant",
    "splice_donor_variant",
    "feature_truncation",
    "transcript_ablation",
    MISSENSE_VARIANT,
    "inframe_deletion",
    "inframe_insertion",
];

/// Biotypes with their own bit.
pub const BIOTYPE_SET: &[&str] = &[PROTEIN_CODING_BIOTYPE];

/// Consequence of a variant on one transcript.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConsequenceType {
    #[serde(default)]
    pub gene: Option<String>,
    #[serde(default)]
    pub biotype: Option<String>,
    #[serde(default)]
    pub transcript_flags: Vec<String>,
    /// Sequence ontology terms, e.g., `missense_variant`.
    #[serde(default)]
    pub terms: Vec<String>,
}

/// Frequency of the alternative allele in one population.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PopulationFrequency {
    pub study: String,
    pub population: String,
    pub alt_allele_freq: f64,
}

/// The parts of a variant annotation that are indexed.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VariantAnnotation {
    #[serde(default)]
    pub consequence_types: Vec<ConsequenceType>,
    #[serde(default)]
    pub population_frequencies: Vec<PopulationFrequency>,
    /// Whether there is clinical evidence for the variant.
    #[serde(default)]
    pub clinical: bool,
}

/// Annotation index of one variant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotationIndexEntry {
    /// Summary byte.
    pub summary: u8,
    /// One range code per configured population.
    pub pop_freq: Vec<u8>,
}

/// Converts annotations for one schema.
#[derive(Debug, Clone)]
pub struct AnnotationIndexConverter<'a> {
    schema: &'a SampleIndexSchema,
}

impl<'a> AnnotationIndexConverter<'a> {
    pub fn new(schema: &'a SampleIndexSchema) -> Self {
        Self { schema }
    }

    /// Compute the annotation index of `annotation`.
    pub fn convert(&self, annotation: &VariantAnnotation) -> AnnotationIndexEntry {
        let mut summary = 0u8;
        let cts = &annotation.consequence_types;

        for ct in cts {
            let has = |set: &[&str]| ct.terms.iter().any(|t| set.contains(&t.as_str()));
            if ct.biotype.as_deref() == Some(PROTEIN_CODING_BIOTYPE) {
                summary |= bits::PROTEIN_CODING;
            }
            if has(LOF_SET) {
                summary |= bits::LOF;
            }
            if has(LOF_EXTENDED_SET) {
                summary |= bits::LOF_EXTENDED;
                if ct.transcript_flags.iter().any(|f| f == BASIC_FLAG) {
                    summary |= bits::LOF_EXTENDED_BASIC;
                }
            }
            if ct.terms.iter().any(|t| t == MISSENSE_VARIANT) {
                summary |= bits::MISSENSE;
            }
        }
        if cts
            .iter()
            .flat_map(|ct| ct.terms.iter())
            .all(|t| t == INTERGENIC_VARIANT)
        {
            summary |= bits::INTERGENIC;
        }
        if annotation.clinical {
            summary |= bits::CLINICAL;
        }

        let conf = &self.schema.configuration.population_frequency;
        let freqs = conf
            .populations
            .iter()
            .map(|p| {
                annotation
                    .population_frequencies
                    .iter()
                    .find(|f| f.study == p.study && f.population == p.population)
                    .map(|f| f.alt_allele_freq)
                    .unwrap_or(0.0)
            })
            .collect::<Vec<_>>();
        if freqs.iter().all(|af| *af < POP_FREQ_THRESHOLD_001) {
            summary |= bits::POP_FREQ_ANY_001;
        }
        let pop_freq = freqs
            .iter()
            .map(|af| range_code(*af, &conf.thresholds) as u8)
            .collect();

        AnnotationIndexEntry { summary, pop_freq }
    }
}

/// Accumulates annotation index entries per genotype for one row.
#[derive(Debug, Default)]
pub struct AnnotationIndexBuilder {
    genotypes: BTreeMap<GenotypeCode, (Vec<u8>, Vec<u8>)>,
}

impl AnnotationIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the entry of the next variant with `genotype`.
    pub fn add(&mut self, genotype: GenotypeCode, entry: &AnnotationIndexEntry) {
        let (summaries, pop_freqs) = self.genotypes.entry(genotype).or_default();
        summaries.push(entry.summary);
        pop_freqs.extend_from_slice(&entry.pop_freq);
    }

    /// Whether nothing was added since the last reset.
    pub fn is_empty(&self) -> bool {
        self.genotypes.is_empty()
    }

    /// Emit the annotation and population frequency columns and reset.
    pub fn build_and_reset(&mut self, key: RowKey) -> Row {
        let mut row = Row::new(key);
        for (genotype, (summaries, pop_freqs)) in std::mem::take(&mut self.genotypes) {
            row.put(ColumnKind::Annotation.column(genotype.label()), summaries);
            row.put(ColumnKind::PopFreq.column(genotype.label()), pop_freqs);
        }
        row
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sample_index::conf::{Population, SampleIndexConfiguration};

    fn ct(biotype: &str, terms: &[&str], flags: &[&str]) -> ConsequenceType {
        ConsequenceType {
            gene: Some("BRCA1".to_string()),
            biotype: Some(biotype.to_string()),
            transcript_flags: flags.iter().map(|s| s.to_string()).collect(),
            terms: terms.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn freq(study: &str, population: &str, af: f64) -> PopulationFrequency {
        PopulationFrequency {
            study: study.to_string(),
            population: population.to_string(),
            alt_allele_freq: af,
        }
    }

    #[rstest::rstest]
    #[case(vec![], bits::INTERGENIC | bits::POP_FREQ_ANY_001)]
    #[case(
        vec![ct("protein_coding", &["stop_gained"], &["basic"])],
        bits::PROTEIN_CODING | bits::LOF | bits::LOF_EXTENDED | bits::LOF_EXTENDED_BASIC
            | bits::POP_FREQ_ANY_001
    )]
    #[case(
        vec![ct("protein_coding", &["missense_variant"], &[])],
        bits::PROTEIN_CODING | bits::LOF_EXTENDED | bits::MISSENSE | bits::POP_FREQ_ANY_001
    )]
    #[case(
        vec![ct("lncRNA", &["intron_variant"], &["basic"]), ct("lncRNA", &["intergenic_variant"], &[])],
        bits::POP_FREQ_ANY_001
    )]
    #[case(vec![ct("", &["intergenic_variant"], &[])], bits::INTERGENIC | bits::POP_FREQ_ANY_001)]
    fn summary_bits(#[case] cts: Vec<ConsequenceType>, #[case] expected: u8) {
        let schema = SampleIndexSchema::default_schema();
        let annotation = VariantAnnotation {
            consequence_types: cts,
            ..Default::default()
        };
        let entry = AnnotationIndexConverter::new(&schema).convert(&annotation);
        assert_eq!(entry.summary, expected, "{:#010b}", entry.summary);
        assert_eq!(entry.pop_freq, vec![0, 0]);
    }

    #[test]
    fn pop_freq_any_requires_all_populations() {
        let schema = SampleIndexSchema::default_schema();
        let converter = AnnotationIndexConverter::new(&schema);

        let mut annotation = VariantAnnotation {
            population_frequencies: vec![freq("GNOMAD_GENOMES", "ALL", 0.0005)],
            clinical: true,
            ..Default::default()
        };
        let entry = converter.convert(&annotation);
        assert_eq!(entry.summary & bits::POP_FREQ_ANY_001, bits::POP_FREQ_ANY_001);
        assert_eq!(entry.summary & bits::CLINICAL, bits::CLINICAL);

        annotation
            .population_frequencies
            .push(freq("1kG_phase3", "ALL", 0.002));
        let entry = converter.convert(&annotation);
        assert_eq!(entry.summary & bits::POP_FREQ_ANY_001, 0);
        assert_eq!(entry.pop_freq, vec![1, 0]);
    }

    #[test]
    fn pop_freq_codes() {
        let conf = SampleIndexConfiguration::default()
            .add_population(Population::new("s1", "ALL"))
            .add_population(Population::new("s2", "ALL"));
        let schema = SampleIndexSchema::new(1, conf).expect("valid");
        let annotation = VariantAnnotation {
            population_frequencies: vec![
                freq("1kG_phase3", "ALL", 0.001),
                freq("GNOMAD_GENOMES", "ALL", 0.007),
                freq("s2", "ALL", 0.5),
            ],
            ..Default::default()
        };
        let entry = AnnotationIndexConverter::new(&schema).convert(&annotation);
        assert_eq!(entry.pop_freq, vec![1, 2, 0, 3]);
    }

    #[test]
    fn builder_columns() {
        let mut builder = AnnotationIndexBuilder::new();
        let het = GenotypeCode::HetRefUnphased;
        let hom = GenotypeCode::HomAltUnphased;
        builder.add(het, &AnnotationIndexEntry { summary: 1, pop_freq: vec![0, 1] });
        builder.add(hom, &AnnotationIndexEntry { summary: 2, pop_freq: vec![2, 3] });
        builder.add(het, &AnnotationIndexEntry { summary: 4, pop_freq: vec![1, 0] });

        let row = builder.build_and_reset(RowKey::new(1, "1", 0));
        assert!(builder.is_empty());
        assert_eq!(row.get("_A_0/1"), Some(&[1u8, 4][..]));
        assert_eq!(row.get("_PF_0/1"), Some(&[0u8, 1, 1, 0][..]));
        assert_eq!(row.get("_A_1/1"), Some(&[2u8][..]));
        assert_eq!(row.columns.len(), 4);
    }
}
