//! Variant queries and their translation into sample index queries.
//!
//! `VariantQuery` is the declarative query as handed in by the caller, with
//! the textual filter syntax of the variant store (`;` for AND, `,` for OR,
//! `!` for negation).  The `parser` module compiles it into a
//! `SampleIndexQuery` that can be evaluated against stored entries.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::common::{self, QueryOperation, Values};

use super::file_index::VariantClass;

pub mod index;
pub mod parser;
pub mod range;

/// Supporting code for query parsing.
pub mod error {
    /// Error type for parsing queries.
    #[derive(thiserror::Error, Debug, Clone, PartialEq)]
    pub enum Error {
        #[error(transparent)]
        Values(#[from] crate::common::values::Error),
        #[error("cannot find comparison operator in {0:?}")]
        InvalidOperator(String),
        #[error("invalid number in {0:?}")]
        InvalidNumber(String),
        #[error("unknown variant type {0:?}")]
        UnknownVariantType(String),
        #[error("invalid genotype filter {0:?}")]
        InvalidGenotypeFilter(String),
        #[error("invalid region {0:?}")]
        InvalidRegion(String),
        #[error("both genotype and sample filters given")]
        GenotypeAndSample,
        #[error("query cannot be answered from the sample index: {0}")]
        NotSupported(String),
        #[error(transparent)]
        Metadata(#[from] crate::sample_index::metadata::Error),
    }
}

pub use error::Error;

/// A query against the variant store.
///
/// All filters are optional and combined with AND.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct VariantQuery {
    /// Regions, e.g., `1:1000-2000,2`.
    pub region: Option<String>,
    /// Gene names.
    pub gene: Option<String>,
    /// Genotypes per sample, e.g., `s1:0/1,1/1;s2:0/1`.
    pub genotype: Option<String>,
    /// Samples that must carry the variant, e.g., `s1;s2`.
    pub sample: Option<String>,
    /// Variant types, e.g., `SNV,INDEL`.
    #[serde(rename = "type")]
    pub types: Option<String>,
    /// FILTER values, e.g., `PASS`.
    pub filter: Option<String>,
    /// QUAL comparison, e.g., `>=20`.
    pub qual: Option<String>,
    /// Per sample data comparisons, e.g., `s1:DP>=10`.
    pub sample_data: Option<String>,
    /// Files the variant must be called in.
    pub file: Option<String>,
    /// Consequence types, e.g., `missense_variant,stop_gained`.
    pub consequence_type: Option<String>,
    /// Transcript biotypes, e.g., `protein_coding`.
    pub biotype: Option<String>,
    /// Transcript flags, e.g., `basic`.
    pub transcript_flag: Option<String>,
    /// Protein substitution scores, e.g., `sift<0.2`.
    pub protein_substitution: Option<String>,
    /// Alternative allele frequencies, e.g., `GNOMAD_GENOMES:ALL<0.001`.
    pub population_frequency_alt: Option<String>,
    /// Clinical significance, e.g., `pathogenic`.
    pub clinical_significance: Option<String>,
}

impl VariantQuery {
    /// Whether no filter is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A genomic region, 1-based and inclusive.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GenomicRegion {
    pub chrom: String,
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl std::str::FromStr for GenomicRegion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidRegion(s.to_string());
        let s = s.trim();
        let Some((chrom, range)) = s.split_once(':') else {
            return if s.is_empty() {
                Err(invalid())
            } else {
                Ok(Self {
                    chrom: s.to_string(),
                    start: None,
                    end: None,
                })
            };
        };
        let parse = |x: &str| x.replace(',', "").parse::<u32>().map_err(|_| invalid());
        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (parse(start)?, parse(end)?),
            None => {
                let pos = parse(range)?;
                (pos, pos)
            }
        };
        if start > end {
            return Err(invalid());
        }
        Ok(Self {
            chrom: chrom.to_string(),
            start: Some(start),
            end: Some(end),
        })
    }
}

/// Parse the regions of a query.
pub fn parse_regions(value: &str) -> Result<Vec<GenomicRegion>, Error> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Variant types as used in queries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum VariantType {
    Snv,
    Snp,
    Mnv,
    Mnp,
    Indel,
    Insertion,
    Deletion,
    Sv,
    Cnv,
    Duplication,
    Inversion,
    Translocation,
    Breakend,
    Symbolic,
}

impl VariantType {
    /// The type classes that may hold variants of this type, and whether
    /// the classes hold exactly the variants of this type.
    pub fn classes(&self) -> (&'static [VariantClass], bool) {
        match self {
            VariantType::Snv | VariantType::Snp => (&[VariantClass::Snv], true),
            VariantType::Mnv | VariantType::Mnp => (&[VariantClass::Mnv], true),
            VariantType::Indel => (&[VariantClass::Indel], true),
            VariantType::Insertion | VariantType::Deletion => {
                (&[VariantClass::Indel, VariantClass::Symbolic], false)
            }
            VariantType::Symbolic => (&[VariantClass::Symbolic], true),
            VariantType::Sv
            | VariantType::Cnv
            | VariantType::Duplication
            | VariantType::Inversion
            | VariantType::Translocation
            | VariantType::Breakend => (&[VariantClass::Symbolic], false),
        }
    }
}

/// Comparison operators of numeric filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum Operator {
    #[strum(serialize = "<<")]
    LtOrMissing,
    #[strum(serialize = ">>")]
    GtOrMissing,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(to_string = "=", serialize = "==")]
    Eq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
}

/// Split `key<op>value` into its parts, e.g., `sift<0.2`.
pub fn parse_op_value(s: &str) -> Result<(String, Operator, String), Error> {
    let start = s
        .find(&['<', '>', '=', '!'][..])
        .ok_or_else(|| Error::InvalidOperator(s.to_string()))?;
    let len = s[start..]
        .chars()
        .take_while(|c| matches!(c, '<' | '>' | '=' | '!'))
        .count();
    let op = s[start..start + len]
        .parse::<Operator>()
        .map_err(|_| Error::InvalidOperator(s.to_string()))?;
    Ok((
        s[..start].trim().to_string(),
        op,
        s[start + len..].trim().to_string(),
    ))
}

/// Parse the numeric value of a comparison.
pub fn parse_number(s: &str) -> Result<f64, Error> {
    s.parse::<f64>()
        .map_err(|_| Error::InvalidNumber(s.to_string()))
}

/// Parse a list of variant types.
pub fn parse_types(value: &str) -> Result<Values<VariantType>, Error> {
    let values = common::split_values(value)?;
    let types = values
        .values
        .iter()
        .map(|s| {
            s.parse::<VariantType>()
                .map_err(|_| Error::UnknownVariantType(s.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Values::new(values.op, types))
}

/// Genotypes per sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenotypeFilter {
    /// How samples are combined; `None` for a single sample.
    pub op: Option<QueryOperation>,
    /// The accepted genotypes of each sample.
    pub samples: IndexMap<String, Vec<String>>,
}

impl GenotypeFilter {
    /// Operation combining the samples, AND if there is only one.
    pub fn operation(&self) -> QueryOperation {
        self.op.unwrap_or(QueryOperation::And)
    }
}

/// Split text into tokens, each with the separator preceding it.
fn tokens_with_separators(value: &str) -> Vec<(Option<char>, &str)> {
    let mut result = Vec::new();
    let mut separator = None;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        if c == ';' || c == ',' {
            result.push((separator, &value[start..i]));
            separator = Some(c);
            start = i + 1;
        }
    }
    result.push((separator, &value[start..]));
    result
}

/// Parse a genotype filter, e.g., `s1:0/1,1/1;s2:0/1`.
///
/// A token containing `:` starts the next sample, the separator before it
/// decides how samples are combined.  Genotypes of one sample are always
/// separated by `,`.
pub fn parse_genotype_filter(value: &str) -> Result<GenotypeFilter, Error> {
    let invalid = || Error::InvalidGenotypeFilter(value.to_string());
    let mut filter = GenotypeFilter::default();
    let mut current: Option<String> = None;
    for (separator, token) in tokens_with_separators(value) {
        let token = token.trim();
        if let Some((sample, gt)) = token.split_once(':') {
            if let Some(separator) = separator {
                let op = if separator == ';' {
                    QueryOperation::And
                } else {
                    QueryOperation::Or
                };
                match filter.op {
                    Some(prev) if prev != op => {
                        return Err(common::values::Error::MixedOperators(value.to_string()).into())
                    }
                    _ => filter.op = Some(op),
                }
            }
            let sample = sample.trim().to_string();
            filter
                .samples
                .entry(sample.clone())
                .or_default()
                .push(gt.trim().to_string());
            current = Some(sample);
        } else {
            match (&current, separator) {
                (Some(sample), Some(',')) => filter
                    .samples
                    .entry(sample.clone())
                    .or_default()
                    .push(token.to_string()),
                _ => return Err(invalid()),
            }
        }
    }
    if filter.samples.values().flatten().any(|gt| gt.is_empty()) {
        return Err(invalid());
    }
    Ok(filter)
}

/// One comparison on a sample data field.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDataFilter {
    pub key: String,
    pub op: Operator,
    pub value: String,
}

/// Parse sample data filters, e.g., `s1:DP>=10;s2:DP>5`.
///
/// Tokens without sample prefix belong to the previous sample.
pub fn parse_sample_data(value: &str) -> Result<Values<(String, SampleDataFilter)>, Error> {
    let values = common::split_values(value)?;
    let mut result = Vec::new();
    let mut current: Option<String> = None;
    for token in values.values {
        let (sample, expr) = match token.split_once(':') {
            Some((sample, expr)) => (sample.trim().to_string(), expr),
            None => (
                current
                    .clone()
                    .ok_or_else(|| Error::InvalidOperator(token.to_string()))?,
                token,
            ),
        };
        let (key, op, value) = parse_op_value(expr)?;
        current = Some(sample.clone());
        result.push((sample, SampleDataFilter { key, op, value }));
    }
    Ok(Values::new(values.op, result))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[rstest::rstest]
    #[case("1", "1", None, None)]
    #[case("chr1:100-200", "chr1", Some(100), Some(200))]
    #[case("X:1,000-2,000", "X", Some(1000), Some(2000))]
    #[case("2:15", "2", Some(15), Some(15))]
    fn parse_region(
        #[case] s: &str,
        #[case] chrom: &str,
        #[case] start: Option<u32>,
        #[case] end: Option<u32>,
    ) -> Result<(), anyhow::Error> {
        let region: GenomicRegion = s.parse()?;
        assert_eq!(
            region,
            GenomicRegion {
                chrom: chrom.to_string(),
                start,
                end
            }
        );

        Ok(())
    }

    #[test]
    fn parse_region_invalid() {
        assert!("1:200-100".parse::<GenomicRegion>().is_err());
        assert!("1:x".parse::<GenomicRegion>().is_err());
        assert_eq!(parse_regions("1:1-10,2").map(|r| r.len()), Ok(2));
    }

    #[rstest::rstest]
    #[case(">=20", "", Operator::Ge, "20")]
    #[case("sift<0.2", "sift", Operator::Lt, "0.2")]
    #[case("GNOMAD_GENOMES:ALL<<0.01", "GNOMAD_GENOMES:ALL", Operator::LtOrMissing, "0.01")]
    #[case("DP=10", "DP", Operator::Eq, "10")]
    #[case("DP!=10", "DP", Operator::Ne, "10")]
    fn op_value(
        #[case] s: &str,
        #[case] key: &str,
        #[case] op: Operator,
        #[case] value: &str,
    ) -> Result<(), anyhow::Error> {
        assert_eq!(
            parse_op_value(s)?,
            (key.to_string(), op, value.to_string())
        );

        Ok(())
    }

    #[test]
    fn op_value_invalid() {
        assert!(parse_op_value("DP10").is_err());
        assert!(parse_op_value("DP<>10").is_err());
    }

    #[test]
    fn genotype_filters() -> Result<(), anyhow::Error> {
        let filter = parse_genotype_filter("s1:0/1,1/1;s2:0/1")?;
        assert_eq!(filter.op, Some(QueryOperation::And));
        assert_eq!(
            filter.samples,
            [
                ("s1".to_string(), vec!["0/1".to_string(), "1/1".to_string()]),
                ("s2".to_string(), vec!["0/1".to_string()]),
            ]
            .into_iter()
            .collect::<IndexMap<_, _>>()
        );

        let filter = parse_genotype_filter("s1:0/1,s2:!0/0")?;
        assert_eq!(filter.op, Some(QueryOperation::Or));
        assert_eq!(filter.samples["s2"], vec!["!0/0".to_string()]);

        let filter = parse_genotype_filter("s1:1|0")?;
        assert_eq!(filter.op, None);
        assert_eq!(filter.operation(), QueryOperation::And);

        assert!(parse_genotype_filter("s1:0/1;s2:0/1,s3:1/1").is_err());
        assert!(parse_genotype_filter("s1:0/1;1/1").is_err());
        assert!(parse_genotype_filter("0/1").is_err());
        assert!(parse_genotype_filter("s1:").is_err());

        Ok(())
    }

    #[test]
    fn variant_types() -> Result<(), anyhow::Error> {
        let types = parse_types("SNV,indel")?;
        assert_eq!(types.values, vec![VariantType::Snv, VariantType::Indel]);
        assert_eq!(types.op, Some(QueryOperation::Or));
        assert!(parse_types("FOO").is_err());
        assert_eq!(
            VariantType::Deletion.classes(),
            (&[VariantClass::Indel, VariantClass::Symbolic][..], false)
        );

        Ok(())
    }

    #[test]
    fn sample_data() -> Result<(), anyhow::Error> {
        let values = parse_sample_data("s1:DP>=10;s2:DP>5;GQ>20")?;
        assert_eq!(values.op, Some(QueryOperation::And));
        assert_eq!(
            values
                .values
                .iter()
                .map(|(s, f)| format!("{}:{}{}{}", s, f.key, f.op, f.value))
                .collect::<Vec<_>>(),
            vec!["s1:DP>=10", "s2:DP>5", "s2:GQ>20"]
        );

        Ok(())
    }

    #[test]
    fn variant_query_json() -> Result<(), anyhow::Error> {
        let query: VariantQuery =
            serde_json::from_str(r#"{"genotype": "s1:0/1", "type": "SNV"}"#)?;
        assert_eq!(query.genotype.as_deref(), Some("s1:0/1"));
        assert_eq!(query.types.as_deref(), Some("SNV"));
        assert!(!query.is_empty());
        assert!(VariantQuery::default().is_empty());

        Ok(())
    }
}
