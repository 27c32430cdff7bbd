//! Evaluation of a single sample query on stored entries.

use super::codec::genotype;
use super::codec::variant::Variant;
use super::entry::{Error, GenotypeEntry, SampleIndexEntry};
use super::query::index::SingleSampleIndexQuery;

/// Filters the variants of entries with one sample query.
#[derive(Debug, Clone)]
pub struct SampleIndexEntryFilter<'a> {
    query: &'a SingleSampleIndexQuery,
}

impl<'a> SampleIndexEntryFilter<'a> {
    pub fn new(query: &'a SingleSampleIndexQuery) -> Self {
        Self { query }
    }

    /// Variants of `entry` that may match the query, in genotype and then
    /// position order.
    pub fn filter(&self, entry: &SampleIndexEntry) -> Result<Vec<Variant>, Error> {
        let mut result = Vec::new();
        for (gt, gt_entry) in &entry.genotypes {
            if !self.query.accepts_genotype(*gt) {
                continue;
            }
            let variants = gt_entry.variants(&entry.key.chrom, entry.key.batch_start)?;
            for (i, variant) in variants.enumerate() {
                let variant = variant?;
                if self.test(gt_entry, i) {
                    result.push(variant);
                } else {
                    tracing::trace!("{} ({}) filtered out", &variant, gt);
                }
            }
        }
        tracing::debug!(
            "{} of {} variants of {} in {} pass",
            result.len(),
            entry.count(),
            &self.query.sample,
            &entry.key
        );
        Ok(result)
    }

    /// Number of variants `filter()` returns, without decoding variants.
    pub fn filter_and_count(&self, entry: &SampleIndexEntry) -> Result<usize, Error> {
        let mut count = 0;
        for (gt, gt_entry) in &entry.genotypes {
            if !self.query.accepts_genotype(*gt) {
                continue;
            }
            if self.is_match_all(gt_entry) {
                count += gt_entry.count();
            } else {
                count += (0..gt_entry.count())
                    .filter(|i| self.test(gt_entry, *i))
                    .count();
            }
        }
        Ok(count)
    }

    /// Whether all variants of `gt_entry` pass without looking at them.
    fn is_match_all(&self, gt_entry: &GenotypeEntry) -> bool {
        let query = self.query;
        (query.file.is_empty() || gt_entry.file_index().is_none())
            && (query.annotation.is_empty()
                || (gt_entry.annotation().is_none() && gt_entry.pop_freq(0).is_none()))
            && (!query.has_parent_filters() || gt_entry.parents().is_none())
    }

    /// Whether the `i`-th variant of `gt_entry` may match.
    ///
    /// Columns that were not written pass.
    fn test(&self, gt_entry: &GenotypeEntry, i: usize) -> bool {
        let query = self.query;
        if let Some(file_index) = gt_entry.file_index() {
            if !query.file.test(file_index[i]) {
                return false;
            }
        }
        if let Some(annotation) = gt_entry.annotation() {
            if !query.annotation.test_summary(annotation[i]) {
                return false;
            }
        }
        if let Some(codes) = gt_entry.pop_freq(i) {
            if !query.annotation.pop_freq.test(codes) {
                return false;
            }
        }
        if query.has_parent_filters() {
            if let Some((father, mother)) = gt_entry.parents().and_then(|p| genotype::split(p[i])) {
                if !query.test_parents(father, mother) {
                    return false;
                }
            }
        }
        true
    }
}
