//! Execution of sample index queries against a store.

use std::collections::{BTreeMap, BTreeSet};

use super::codec::variant::Variant;
use super::entry::SampleIndexEntry;
use super::filter::SampleIndexEntryFilter;
use super::query::index::{SampleIndexQuery, SingleSampleIndexQuery};
use super::query::GenomicRegion;
use super::schema::{batch_start, BATCH_SIZE};
use super::store::{Row, RowKey, SampleIndexStore};
use crate::common::QueryOperation;

/// Supporting code for `SampleIndexDbAdaptor`.
pub mod error {
    /// Error type for running queries.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("problem reading the sample index: {0}")]
        Store(#[from] crate::sample_index::store::Error),
        #[error("problem decoding entry: {0}")]
        Entry(#[from] crate::sample_index::entry::Error),
    }
}

pub use error::Error;

/// Whether `variant` lies in any of `regions`, true if there are none.
fn in_regions(variant: &Variant, regions: &[GenomicRegion]) -> bool {
    regions.is_empty()
        || regions.iter().any(|region| {
            region.chrom == variant.chrom
                && region.start.map(|start| start <= variant.pos).unwrap_or(true)
                && region.end.map(|end| variant.pos <= end).unwrap_or(true)
        })
}

/// Runs sample index queries on a store.
pub struct SampleIndexDbAdaptor<'a> {
    store: &'a dyn SampleIndexStore,
}

impl<'a> SampleIndexDbAdaptor<'a> {
    pub fn new(store: &'a dyn SampleIndexStore) -> Self {
        Self { store }
    }

    /// Rows of one sample overlapping `regions`, all rows if there are none.
    fn rows(
        &self,
        version: u32,
        sample_id: u32,
        regions: &[GenomicRegion],
        count_only: bool,
    ) -> Result<Vec<Row>, Error> {
        if regions.is_empty() {
            return Ok(self.store.scan(version, sample_id, None, count_only)?);
        }
        let mut rows = BTreeMap::new();
        for region in regions {
            match (region.start, region.end) {
                (Some(start), Some(end)) => {
                    for batch in (batch_start(start)..=batch_start(end)).step_by(BATCH_SIZE as usize) {
                        let key = RowKey::new(sample_id, &region.chrom, batch);
                        if let Some(row) = self.store.get(version, &key, count_only)? {
                            rows.insert(row.key.clone(), row);
                        }
                    }
                }
                _ => {
                    for row in self
                        .store
                        .scan(version, sample_id, Some(&region.chrom), count_only)?
                    {
                        rows.insert(row.key.clone(), row);
                    }
                }
            }
        }
        Ok(rows.into_values().collect())
    }

    /// Variants of one sample passing its query.
    pub fn sample_variants(
        &self,
        query: &SampleIndexQuery,
        single: &SingleSampleIndexQuery,
    ) -> Result<BTreeSet<Variant>, Error> {
        let filter = SampleIndexEntryFilter::new(single);
        let mut result = BTreeSet::new();
        for row in self.rows(query.version, single.sample_id, &query.regions, false)? {
            let entry = SampleIndexEntry::from_row(&row, single.schema.num_populations())?;
            result.extend(
                filter
                    .filter(&entry)?
                    .into_iter()
                    .filter(|v| in_regions(v, &query.regions)),
            );
        }
        tracing::debug!("{} variants for sample {}", result.len(), &single.sample);
        Ok(result)
    }

    /// Variants passing `query`, in chromosome and position order.
    ///
    /// With AND, variants must pass the queries of all samples, with OR of
    /// any sample.
    pub fn query(&self, query: &SampleIndexQuery) -> Result<Vec<Variant>, Error> {
        let mut result: Option<BTreeSet<Variant>> = None;
        for single in &query.queries {
            let variants = self.sample_variants(query, single)?;
            result = Some(match (result, query.op) {
                (None, _) => variants,
                (Some(acc), QueryOperation::And) => acc.intersection(&variants).cloned().collect(),
                (Some(mut acc), QueryOperation::Or) => {
                    acc.extend(variants);
                    acc
                }
            });
        }
        Ok(result.unwrap_or_default().into_iter().collect())
    }

    /// Number of variants `query()` returns.
    ///
    /// Single sample queries over whole chromosomes are counted without
    /// decoding variants.
    pub fn count(&self, query: &SampleIndexQuery) -> Result<usize, Error> {
        let single = match query.queries.as_slice() {
            [single] if query.regions.iter().all(|r| r.start.is_none()) => single,
            _ => return Ok(self.query(query)?.len()),
        };
        let count_only = single.file.is_empty()
            && single.annotation.is_empty()
            && !single.has_parent_filters();
        let filter = SampleIndexEntryFilter::new(single);
        let mut count = 0;
        for row in self.rows(query.version, single.sample_id, &query.regions, count_only)? {
            let entry = SampleIndexEntry::from_row(&row, single.schema.num_populations())?;
            count += filter.filter_and_count(&entry)?;
        }
        tracing::debug!(
            "counted {} variants for sample {} (count only: {})",
            count,
            &single.sample,
            count_only
        );
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sample_index::builder::SampleIndexEntryBuilder;
    use crate::sample_index::codec::genotype::GenotypeCode;
    use crate::sample_index::file_index::{FileCall, FileIndexConverter};
    use crate::sample_index::query::index::{SampleAnnotationIndexQuery, SampleFileIndexQuery};
    use crate::sample_index::schema::SampleIndexSchema;
    use crate::sample_index::store::InMemoryStore;

    /// Store rows of two samples, each variant given as `chrom:pos:ref:alt`.
    fn store(schema: &SampleIndexSchema) -> Result<InMemoryStore, anyhow::Error> {
        let store = InMemoryStore::default();
        let samples: [(u32, &[&str]); 2] = [
            (1, &["1:100:A:C", "1:200:A:G", "1:1000100:C:T", "2:50:G:GA"]),
            (2, &["1:200:A:G", "1:1000100:C:T", "1:1000200:T:A"]),
        ];
        let converter = FileIndexConverter::new(&schema.file_index);
        for (sample_id, variants) in samples {
            let mut builders: BTreeMap<(String, u32), SampleIndexEntryBuilder> = BTreeMap::new();
            for variant in variants {
                let variant: Variant = variant.parse()?;
                let index = converter.create_file_index_value(0, &variant, &FileCall::default());
                let batch = batch_start(variant.pos);
                builders
                    .entry((variant.chrom.clone(), batch))
                    .or_insert_with(|| SampleIndexEntryBuilder::new(sample_id, &variant.chrom, batch, schema))
                    .add(GenotypeCode::HetRefUnphased, variant, index)?;
            }
            for builder in builders.values() {
                store.put(schema.version, &builder.build()?)?;
            }
        }
        Ok(store)
    }

    fn query(schema: &SampleIndexSchema, op: QueryOperation, sample_ids: &[u32]) -> SampleIndexQuery {
        SampleIndexQuery {
            version: schema.version,
            schema: schema.clone(),
            op,
            queries: sample_ids
                .iter()
                .map(|id| SingleSampleIndexQuery {
                    sample: format!("s{}", id),
                    sample_id: *id,
                    schema: schema.clone(),
                    genotypes: None,
                    file: SampleFileIndexQuery::new(schema.file_index.clone()),
                    annotation: SampleAnnotationIndexQuery::default(),
                    father_filter: None,
                    mother_filter: None,
                })
                .collect(),
            regions: Vec::new(),
        }
    }

    fn strings(variants: &[Variant]) -> Vec<String> {
        variants.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn and_or_across_samples() -> Result<(), anyhow::Error> {
        let schema = SampleIndexSchema::default_schema();
        let store = store(&schema)?;
        let adaptor = SampleIndexDbAdaptor::new(&store);

        let and = query(&schema, QueryOperation::And, &[1, 2]);
        assert_eq!(
            strings(&adaptor.query(&and)?),
            vec!["1:200:A:G", "1:1000100:C:T"]
        );
        assert_eq!(adaptor.count(&and)?, 2);

        let or = query(&schema, QueryOperation::Or, &[1, 2]);
        assert_eq!(
            strings(&adaptor.query(&or)?),
            vec![
                "1:100:A:C",
                "1:200:A:G",
                "1:1000100:C:T",
                "1:1000200:T:A",
                "2:50:G:GA"
            ]
        );
        assert_eq!(adaptor.count(&or)?, 5);

        Ok(())
    }

    #[test]
    fn regions() -> Result<(), anyhow::Error> {
        let schema = SampleIndexSchema::default_schema();
        let store = store(&schema)?;
        let adaptor = SampleIndexDbAdaptor::new(&store);

        let mut q = query(&schema, QueryOperation::And, &[1]);
        q.regions = vec!["1:150-1000150".parse()?];
        assert_eq!(
            strings(&adaptor.query(&q)?),
            vec!["1:200:A:G", "1:1000100:C:T"]
        );
        assert_eq!(adaptor.count(&q)?, 2);

        q.regions = vec!["2".parse()?, "1:100".parse()?];
        assert_eq!(strings(&adaptor.query(&q)?), vec!["1:100:A:C", "2:50:G:GA"]);

        q.regions = vec!["1".parse()?];
        assert_eq!(adaptor.count(&q)?, 3);

        Ok(())
    }

    #[test]
    fn count_single_sample() -> Result<(), anyhow::Error> {
        let schema = SampleIndexSchema::default_schema();
        let store = store(&schema)?;
        let adaptor = SampleIndexDbAdaptor::new(&store);

        let mut q = query(&schema, QueryOperation::And, &[1]);
        assert_eq!(adaptor.count(&q)?, 4);
        q.queries[0].genotypes = Some(vec![GenotypeCode::HomAltUnphased]);
        assert_eq!(adaptor.count(&q)?, 0);
        q.queries[0].genotypes = None;
        q.queries[0].file.filter_pass = Some(true);
        assert_eq!(adaptor.count(&q)?, 0);
        assert_eq!(adaptor.query(&q)?, vec![]);

        // unknown sample
        assert_eq!(adaptor.count(&query(&schema, QueryOperation::And, &[3]))?, 0);

        Ok(())
    }
}
