//! Accumulation of one sample index row on the write path.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use super::codec::genotype::GenotypeCode;
use super::codec::variant::{self, Variant};
use super::entry::count_to_vec;
use super::file_index::FileIndexConverter;
use super::schema::{columns::ColumnKind, SampleIndexSchema};
use super::store::{Row, RowKey};

/// Supporting code for `SampleIndexEntryBuilder`.
pub mod error {
    /// Error type for `SampleIndexEntryBuilder`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("variant {variant} is not on chromosome {chrom}")]
        WrongChromosome { variant: String, chrom: String },
        #[error("cannot encode variant: {0}")]
        Variant(#[from] crate::sample_index::codec::variant::Error),
    }
}

pub use error::Error;

/// Builds the variant, file index and count columns of one row.
///
/// Variants are expected in position order; short out-of-order stretches are
/// handled by insertion.  Not thread safe.
#[derive(Debug)]
pub struct SampleIndexEntryBuilder<'a> {
    key: RowKey,
    schema: &'a SampleIndexSchema,
    genotypes: BTreeMap<GenotypeCode, Vec<(Variant, u16)>>,
}

impl<'a> SampleIndexEntryBuilder<'a> {
    pub fn new(sample_id: u32, chrom: &str, batch_start: u32, schema: &'a SampleIndexSchema) -> Self {
        Self {
            key: RowKey::new(sample_id, chrom, batch_start),
            schema,
            genotypes: BTreeMap::new(),
        }
    }

    /// Key of the row being built.
    pub fn key(&self) -> &RowKey {
        &self.key
    }

    /// Whether no variant was added.
    pub fn is_empty(&self) -> bool {
        self.genotypes.is_empty()
    }

    /// Add `variant` with `genotype` and its file index.
    ///
    /// Returns `false` if the variant was already present from another file;
    /// the existing entry is then marked as multi-file.
    pub fn add(&mut self, genotype: GenotypeCode, variant: Variant, file_index: u16) -> Result<bool, Error> {
        if variant.chrom != self.key.chrom {
            return Err(Error::WrongChromosome {
                variant: variant.to_string(),
                chrom: self.key.chrom.clone(),
            });
        }
        if variant.pos < self.key.batch_start
            || variant.pos - self.key.batch_start >= super::schema::MAX_OFFSET
        {
            return Err(variant::Error::OffsetOutOfRange {
                pos: variant.pos,
                batch_start: self.key.batch_start,
            }
            .into());
        }

        let converter = FileIndexConverter::new(&self.schema.file_index);
        for entries in self.genotypes.values_mut() {
            if let Ok(i) = entries.binary_search_by(|(v, _)| v.sort_key().cmp(&variant.sort_key())) {
                tracing::trace!("{} seen in another file of {}", &variant, &self.key);
                entries[i].1 = converter.set_multi_file(entries[i].1);
                return Ok(false);
            }
        }

        let entries = self.genotypes.entry(genotype).or_default();
        match entries.last() {
            Some((last, _)) if last.sort_key() > variant.sort_key() => {
                let i = entries.partition_point(|(v, _)| v.sort_key() < variant.sort_key());
                entries.insert(i, (variant, file_index));
            }
            _ => entries.push((variant, file_index)),
        }
        Ok(true)
    }

    /// Whether `variant` was added with any genotype.
    pub fn contains_variant(&self, variant: &Variant) -> bool {
        self.genotypes.values().any(|entries| {
            entries
                .binary_search_by(|(v, _)| v.sort_key().cmp(&variant.sort_key()))
                .is_ok()
        })
    }

    /// The variants and file indices added so far, per genotype in order.
    pub fn entries(&self) -> impl Iterator<Item = (GenotypeCode, &[(Variant, u16)])> {
        self.genotypes.iter().map(|(gt, entries)| (*gt, entries.as_slice()))
    }

    /// Emit the row.
    pub fn build(&self) -> Result<Row, Error> {
        let mut row = Row::new(self.key.clone());
        for (genotype, entries) in &self.genotypes {
            let label = genotype.label();
            let variants = entries.iter().map(|(v, _)| v.clone()).collect::<Vec<_>>();
            let mut buf = Vec::new();
            variant::write_into(self.key.batch_start, &variants, &mut buf)?;
            row.put(ColumnKind::Variants.column(label), buf);

            let mut file_index = vec![0u8; 2 * entries.len()];
            for (i, (_, index)) in entries.iter().enumerate() {
                BigEndian::write_u16(&mut file_index[2 * i..2 * i + 2], *index);
            }
            row.put(ColumnKind::FileIndex.column(label), file_index);
            row.put(ColumnKind::Count.column(label), count_to_vec(entries.len()));
        }
        tracing::debug!(
            "built row {} with {} variants in {} genotypes",
            &self.key,
            self.genotypes.values().map(Vec::len).sum::<usize>(),
            self.genotypes.len()
        );
        Ok(row)
    }
}
