//! In-memory representation of a stored sample index row.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use super::codec::genotype::GenotypeCode;
use super::codec::variant::{self, Variant, VariantIter};
use super::schema::columns::{self, ColumnKind};
use super::store::{Row, RowKey};

/// Supporting code for `SampleIndexEntry`.
pub mod error {
    use crate::sample_index::codec::genotype::GenotypeCode;

    /// Error type for reading entries.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("column {column} of genotype {genotype} has {actual} values, expected {expected}")]
        LengthMismatch {
            genotype: GenotypeCode,
            column: String,
            expected: usize,
            actual: usize,
        },
        #[error("genotype {0} has neither count nor variants")]
        MissingCount(GenotypeCode),
        #[error("unknown genotype label in column {0:?}")]
        UnknownGenotype(String),
        #[error("invalid value in column {0:?}")]
        InvalidColumn(String),
        #[error("variants of the entry were not loaded")]
        VariantsNotLoaded,
        #[error("problem decoding variants: {0}")]
        Variant(#[from] crate::sample_index::codec::variant::Error),
    }
}

pub use error::Error;

/// Columns of one genotype as read from a row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenotypeEntryParts {
    pub count: Option<usize>,
    pub variants: Option<Vec<u8>>,
    pub file_index: Option<Vec<u16>>,
    pub annotation: Option<Vec<u8>>,
    pub pop_freq: Option<Vec<u8>>,
    pub parents: Option<Vec<u8>>,
}

/// The data of one genotype within an entry.
///
/// All present per-variant arrays have exactly `count` values, population
/// frequencies have `count` values per population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeEntry {
    genotype: GenotypeCode,
    count: usize,
    variants: Option<Vec<u8>>,
    file_index: Option<Vec<u16>>,
    annotation: Option<Vec<u8>>,
    pop_freq: Option<Vec<u8>>,
    num_populations: usize,
    parents: Option<Vec<u8>>,
}

impl GenotypeEntry {
    /// Check the parts against each other and construct.
    pub fn new(
        genotype: GenotypeCode,
        parts: GenotypeEntryParts,
        num_populations: usize,
    ) -> Result<Self, Error> {
        let count = match (parts.count, &parts.variants) {
            (Some(count), _) => count,
            (None, Some(variants)) => variant::count(variants)?,
            (None, None) => return Err(Error::MissingCount(genotype)),
        };
        let check = |kind: ColumnKind, actual: Option<usize>, expected: usize| match actual {
            Some(actual) if actual != expected => Err(Error::LengthMismatch {
                genotype,
                column: kind.column(genotype.label()),
                expected,
                actual,
            }),
            _ => Ok(()),
        };
        check(
            ColumnKind::Variants,
            parts.variants.as_deref().map(variant::count).transpose()?,
            count,
        )?;
        check(ColumnKind::FileIndex, parts.file_index.as_ref().map(Vec::len), count)?;
        check(ColumnKind::Annotation, parts.annotation.as_ref().map(Vec::len), count)?;
        check(
            ColumnKind::PopFreq,
            parts.pop_freq.as_ref().map(Vec::len),
            count * num_populations,
        )?;
        check(ColumnKind::Parents, parts.parents.as_ref().map(Vec::len), count)?;

        Ok(Self {
            genotype,
            count,
            variants: parts.variants,
            file_index: parts.file_index,
            annotation: parts.annotation,
            pop_freq: parts.pop_freq,
            num_populations,
            parents: parts.parents,
        })
    }

    pub fn genotype(&self) -> GenotypeCode {
        self.genotype
    }

    /// Number of variants.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the variant payload was loaded.
    pub fn has_variants(&self) -> bool {
        self.variants.is_some()
    }

    /// Iterate the variants, fails if they were not loaded.
    pub fn variants<'a>(&'a self, chrom: &'a str, batch_start: u32) -> Result<VariantIter<'a>, Error> {
        let bytes = self.variants.as_deref().ok_or(Error::VariantsNotLoaded)?;
        Ok(VariantIter::new(chrom, batch_start, bytes))
    }

    /// File index values, if loaded.
    pub fn file_index(&self) -> Option<&[u16]> {
        self.file_index.as_deref()
    }

    /// Annotation summaries, if loaded.
    pub fn annotation(&self) -> Option<&[u8]> {
        self.annotation.as_deref()
    }

    /// Population frequency codes of the `i`-th variant, if loaded.
    pub fn pop_freq(&self, i: usize) -> Option<&[u8]> {
        let n = self.num_populations;
        self.pop_freq.as_deref().map(|pf| &pf[i * n..(i + 1) * n])
    }

    /// Joined parent genotypes, if loaded.
    pub fn parents(&self) -> Option<&[u8]> {
        self.parents.as_deref()
    }
}

/// All data of one sample in one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndexEntry {
    pub key: RowKey,
    pub genotypes: BTreeMap<GenotypeCode, GenotypeEntry>,
}

fn read_u16s(column: &str, value: &[u8]) -> Result<Vec<u16>, Error> {
    if value.len() % 2 != 0 {
        return Err(Error::InvalidColumn(column.to_string()));
    }
    Ok(value.chunks_exact(2).map(BigEndian::read_u16).collect())
}

/// Encode a count column value.
pub fn count_to_vec(count: usize) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    BigEndian::write_u32(&mut buf, count as u32);
    buf
}

impl SampleIndexEntry {
    /// Read the entry from a row with `num_populations` populations indexed.
    pub fn from_row(row: &Row, num_populations: usize) -> Result<Self, Error> {
        let mut parts: BTreeMap<GenotypeCode, GenotypeEntryParts> = BTreeMap::new();
        for (name, value) in &row.columns {
            let (kind, label) = columns::parse(name);
            let genotype = GenotypeCode::from_label(label)
                .ok_or_else(|| Error::UnknownGenotype(name.clone()))?;
            let part = parts.entry(genotype).or_default();
            match kind {
                ColumnKind::Variants => part.variants = Some(value.clone()),
                ColumnKind::FileIndex => part.file_index = Some(read_u16s(name, value)?),
                ColumnKind::Annotation => part.annotation = Some(value.clone()),
                ColumnKind::PopFreq => part.pop_freq = Some(value.clone()),
                ColumnKind::Parents => part.parents = Some(value.clone()),
                ColumnKind::Count => {
                    if value.len() != 4 {
                        return Err(Error::InvalidColumn(name.clone()));
                    }
                    part.count = Some(BigEndian::read_u32(value) as usize);
                }
            }
        }
        let genotypes = parts
            .into_iter()
            .map(|(genotype, parts)| {
                GenotypeEntry::new(genotype, parts, num_populations).map(|e| (genotype, e))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self {
            key: row.key.clone(),
            genotypes,
        })
    }

    /// Total number of variants over all genotypes.
    pub fn count(&self) -> usize {
        self.genotypes.values().map(GenotypeEntry::count).sum()
    }

    /// Decode all variants of one genotype.
    pub fn variants(&self, genotype: GenotypeCode) -> Result<Vec<Variant>, Error> {
        match self.genotypes.get(&genotype) {
            Some(entry) => Ok(entry
                .variants(&self.key.chrom, self.key.batch_start)?
                .collect::<Result<Vec<_>, _>>()?),
            None => Ok(Vec::new()),
        }
    }
}
