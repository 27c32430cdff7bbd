//! Implementation of `build` sub command.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::BufRead;

use indexmap::IndexMap;
use thousands::Separable;

use crate::common;
use crate::sample_index::annotation::{
    AnnotationIndexBuilder, AnnotationIndexConverter, AnnotationIndexEntry, VariantAnnotation,
};
use crate::sample_index::builder::SampleIndexEntryBuilder;
use crate::sample_index::codec::genotype;
use crate::sample_index::codec::variant::Variant;
use crate::sample_index::conf::SampleIndexConfiguration;
use crate::sample_index::entry::SampleIndexEntry;
use crate::sample_index::family::{join_parents, FamilyIndexBuilder};
use crate::sample_index::file_index::{FileCall, FileIndexConverter};
use crate::sample_index::metadata::StudyMetadata;
use crate::sample_index::schema::{batch_start, SampleIndexSchema};
use crate::sample_index::store::{RocksDbStore, Row, RowKey, SampleIndexStore};

/// Command line arguments for `build` sub command.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "build sample index from calls", long_about = None)]
pub struct Args {
    /// Path to the RocksDB directory, created if missing.
    #[clap(long)]
    pub path_db: String,
    /// Path to input JSONL file with one call per line, may be gzip-ed.
    #[clap(long)]
    pub path_in: String,
    /// Name of the study.
    #[clap(long)]
    pub study: String,
    /// Path to JSON file with a new index configuration; optional.
    #[clap(long)]
    pub path_config: Option<String>,
    /// Path to the pedigree file; optional.
    #[clap(long)]
    pub path_ped: Option<String>,
}

/// One call of a sample as read from the input file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallRecord {
    pub sample: String,
    /// Name of the file the call comes from.
    pub file: String,
    /// Variant as `chrom:pos:ref:alt`.
    pub variant: String,
    pub genotype: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub qual: Option<f64>,
    /// Per sample data, e.g., `DP`.
    #[serde(default)]
    pub sample_data: IndexMap<String, String>,
    #[serde(default)]
    pub father_genotype: Option<String>,
    #[serde(default)]
    pub mother_genotype: Option<String>,
    #[serde(default)]
    pub annotation: Option<VariantAnnotation>,
}

/// Father and mother per sample name.
pub type Pedigree = IndexMap<String, (Option<String>, Option<String>)>;

/// Read pedigree from PED lines (family, name, father, mother, ...).
pub fn read_pedigree<R: BufRead>(reader: R) -> Result<Pedigree, anyhow::Error> {
    let parent = |name: &str| match name {
        "0" | "." | "" => None,
        name => Some(name.to_string()),
    };
    let mut result = Pedigree::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line.split_whitespace().collect::<Vec<_>>();
        if fields.len() < 4 {
            anyhow::bail!("invalid PED line: {:?}", &line);
        }
        result.insert(fields[1].to_string(), (parent(fields[2]), parent(fields[3])));
    }
    Ok(result)
}

/// Counters of one build run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub records: usize,
    /// Records skipped because of their genotype.
    pub skipped: usize,
    pub rows: usize,
    /// Rows merged with a row written by an earlier run.
    pub merged: usize,
}

/// Annotation and joined parents' genotypes of the first call of a variant
/// in a row.
#[derive(Debug, Default)]
struct VariantExtras {
    annotation: Option<AnnotationIndexEntry>,
    parents: u8,
}

/// Row being accumulated.
struct PendingRow<'a> {
    builder: SampleIndexEntryBuilder<'a>,
    extras: BTreeMap<Variant, VariantExtras>,
    family: bool,
    /// Whether the row replaces a stored row.
    replaces: bool,
}

impl<'a> PendingRow<'a> {
    fn new(key: &RowKey, schema: &'a SampleIndexSchema, family: bool) -> Self {
        Self {
            builder: SampleIndexEntryBuilder::new(key.sample_id, &key.chrom, key.batch_start, schema),
            extras: BTreeMap::new(),
            family,
            replaces: false,
        }
    }

    /// Start from the variants of `existing`, written by an earlier run.
    fn seed(&mut self, existing: &Row, num_populations: usize) -> Result<(), anyhow::Error> {
        let entry = SampleIndexEntry::from_row(existing, num_populations)?;
        for (gt, gt_entry) in &entry.genotypes {
            let file_index = gt_entry.file_index().ok_or_else(|| {
                anyhow::anyhow!("row {} has no file index for {}", &entry.key, gt.label())
            })?;
            let variants = entry.variants(*gt)?;
            for (i, (variant, index)) in variants.into_iter().zip(file_index).enumerate() {
                let annotation = gt_entry.annotation().map(|summaries| AnnotationIndexEntry {
                    summary: summaries[i],
                    pop_freq: gt_entry.pop_freq(i).map(<[u8]>::to_vec).unwrap_or_default(),
                });
                let parents = gt_entry
                    .parents()
                    .map(|parents| parents[i])
                    .unwrap_or_else(|| join_parents(None, None));
                self.extras
                    .insert(variant.clone(), VariantExtras { annotation, parents });
                self.builder.add(*gt, variant, *index)?;
            }
        }
        self.replaces = true;
        Ok(())
    }

    /// Whether all variants of the row are annotated.
    fn annotated(&self) -> bool {
        self.extras.values().all(|extras| extras.annotation.is_some())
    }

    /// Write the row with its annotation and family columns.
    ///
    /// Returns whether annotation columns were written.
    fn flush(&self, store: &dyn SampleIndexStore, version: u32) -> Result<bool, anyhow::Error> {
        let mut row = self.builder.build()?;
        let annotated = self.annotated();
        let mut annotation_builder = AnnotationIndexBuilder::new();
        let mut family_builder = FamilyIndexBuilder::new();
        for (gt, entries) in self.builder.entries() {
            for (variant, _) in entries {
                let extras = self
                    .extras
                    .get(variant)
                    .ok_or_else(|| anyhow::anyhow!("no call recorded for {}", variant))?;
                if let (true, Some(annotation)) = (annotated, &extras.annotation) {
                    annotation_builder.add(gt, annotation);
                }
                if self.family {
                    family_builder.add_joined(gt, extras.parents);
                }
            }
        }
        row.merge(annotation_builder.build_and_reset(row.key.clone()));
        row.merge(family_builder.build_and_reset(row.key.clone()));
        if self.replaces {
            store.delete(version, &row.key)?;
        }
        store.put(version, &row)?;
        tracing::debug!(
            "wrote row {} with {} variants",
            &row.key,
            self.extras.len().separate_with_commas()
        );
        Ok(annotated)
    }
}

/// Build the index rows of configuration `version` from `reader`.
///
/// Calls must be grouped by sample and sorted by chromosome batch within
/// each sample.  Calls of the same variant in several files of a sample
/// have to be adjacent in the same batch.  Rows already stored from an
/// earlier run are merged with the new calls.
pub fn build_index<R: BufRead>(
    store: &dyn SampleIndexStore,
    metadata: &mut StudyMetadata,
    version: u32,
    reader: R,
    pedigree: &Pedigree,
) -> Result<BuildStats, anyhow::Error> {
    let schema = metadata.schema(version)?;
    let file_converter = FileIndexConverter::new(&schema.file_index);
    let annotation_converter = AnnotationIndexConverter::new(&schema);

    let mut stats = BuildStats::default();
    let mut pending: Option<PendingRow> = None;
    let mut flushed: HashSet<RowKey> = HashSet::new();
    let mut built: BTreeSet<String> = BTreeSet::new();
    let mut not_annotated: BTreeSet<String> = BTreeSet::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: CallRecord = serde_json::from_str(&line)
            .map_err(|e| anyhow::anyhow!("invalid call in line {}: {}", lineno + 1, e))?;
        stats.records += 1;

        if !genotype::valid_genotype(&record.genotype) {
            tracing::trace!("skipping {} with genotype {}", &record.variant, &record.genotype);
            stats.skipped += 1;
            continue;
        }
        let variant: Variant = record
            .variant
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid variant in line {}: {}", lineno + 1, e))?;

        let (sample_id, position) = metadata.register_file(&record.sample, &record.file);
        if position >= schema.file_index.max_files() {
            anyhow::bail!(
                "sample {} has more than {} files",
                &record.sample,
                schema.file_index.max_files()
            );
        }
        built.insert(record.sample.clone());

        let key = RowKey::new(sample_id, &variant.chrom, batch_start(variant.pos));
        if pending.as_ref().map(|row| row.builder.key() != &key).unwrap_or(true) {
            if let Some(row) = pending.take() {
                if !row.flush(store, version)? {
                    not_annotated.insert(record_sample(metadata, row.builder.key()));
                }
                stats.rows += 1;
                flushed.insert(row.builder.key().clone());
            }
            if flushed.contains(&key) {
                anyhow::bail!(
                    "input is not sorted, row {} seen again in line {}",
                    &key,
                    lineno + 1
                );
            }
            let family = pedigree
                .get(&record.sample)
                .map(|(father, mother)| father.is_some() || mother.is_some())
                .unwrap_or(false)
                || metadata.family_indexed(&record.sample, version);
            let mut next = PendingRow::new(&key, &schema, family);
            if let Some(existing) = store.get(version, &key, false)? {
                tracing::debug!("merging calls into stored row {}", &key);
                next.seed(&existing, schema.num_populations())?;
                stats.merged += 1;
            }
            pending = Some(next);
        }
        let row = pending
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no pending row for {}", &key))?;

        let call = FileCall {
            filter: record.filter.clone(),
            qual: record.qual,
            sample_data: record.sample_data.clone(),
        };
        let file_index = file_converter.create_file_index_value(position, &variant, &call);
        if !row.builder.contains_variant(&variant) {
            row.extras.insert(
                variant.clone(),
                VariantExtras {
                    annotation: record
                        .annotation
                        .as_ref()
                        .map(|annotation| annotation_converter.convert(annotation)),
                    parents: join_parents(
                        record.father_genotype.as_deref(),
                        record.mother_genotype.as_deref(),
                    ),
                },
            );
        }
        row.builder
            .add(genotype::encode(&record.genotype), variant, file_index)?;
    }
    if let Some(row) = pending.take() {
        if !row.flush(store, version)? {
            not_annotated.insert(record_sample(metadata, row.builder.key()));
        }
        stats.rows += 1;
    }

    for name in &built {
        let sample = metadata.sample_mut(name)?;
        // rows of earlier runs keep their annotation and family columns
        let rebuilt = !sample.built_versions.insert(version);
        if not_annotated.contains(name) {
            sample.annotated_versions.remove(&version);
        } else if !rebuilt {
            sample.annotated_versions.insert(version);
        }
        if let Some((father, mother)) = pedigree.get(name) {
            if father.is_some() || mother.is_some() {
                if rebuilt && !sample.family_versions.contains(&version) {
                    tracing::warn!(
                        "{} was indexed without parents before, family index stays incomplete",
                        name
                    );
                } else {
                    sample.family_versions.insert(version);
                }
            }
            sample.father = father.clone();
            sample.mother = mother.clone();
        }
    }
    store.put_study_metadata(metadata)?;

    Ok(stats)
}

/// Name of the sample of row `key`.
fn record_sample(metadata: &StudyMetadata, key: &RowKey) -> String {
    metadata
        .sample_name(key.sample_id)
        .map(str::to_string)
        .unwrap_or_default()
}

/// Main entry point for `build` sub command.
pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    tracing::info!("Opening sample index database");
    let store = RocksDbStore::open(&args.path_db)
        .map_err(|e| anyhow::anyhow!("could not open database {}: {}", &args.path_db, e))?;
    let mut metadata = match store.study_metadata()? {
        Some(metadata) if metadata.name != args.study => anyhow::bail!(
            "database holds study {:?}, not {:?}",
            &metadata.name,
            &args.study
        ),
        Some(metadata) => metadata,
        None => StudyMetadata::new(&args.study),
    };

    let version = match &args.path_config {
        Some(path_config) => {
            let configuration: SampleIndexConfiguration =
                serde_json::from_reader(common::io::open_read_maybe_gz(path_config)?)
                    .map_err(|e| anyhow::anyhow!("could not read {}: {}", path_config, e))?;
            metadata.add_configuration(configuration)?
        }
        None => metadata
            .latest_version()
            .ok_or_else(|| anyhow::anyhow!("study has no configuration"))?,
    };
    tracing::info!("Building sample index version {}", version);

    let pedigree = match &args.path_ped {
        Some(path_ped) => read_pedigree(common::io::open_read_maybe_gz(path_ped)?)?,
        None => Pedigree::new(),
    };

    let before_build = std::time::Instant::now();
    let stats = build_index(
        &store,
        &mut metadata,
        version,
        common::io::open_read_maybe_gz(&args.path_in)?,
        &pedigree,
    )?;
    tracing::info!(
        "... indexed {} calls ({} skipped) into {} rows ({} merged) in {:?}",
        stats.records.separate_with_commas(),
        stats.skipped.separate_with_commas(),
        stats.rows.separate_with_commas(),
        stats.merged.separate_with_commas(),
        before_build.elapsed()
    );

    tracing::info!(
        "All of `build` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

#[cfg(test)]
pub mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sample_index::codec::genotype::GenotypeCode;
    use crate::sample_index::entry::SampleIndexEntry;
    use crate::sample_index::store::InMemoryStore;

    pub const CALLS: &str = r#"{"sample": "child", "file": "trio.vcf", "variant": "1:100:A:C", "genotype": "0/1", "filter": "PASS", "qual": 50.0, "sample_data": {"DP": "30"}, "father_genotype": "0/0", "mother_genotype": "0/1", "annotation": {"consequence_types": [{"gene": "G1", "biotype": "protein_coding", "terms": ["missense_variant"]}]}}
{"sample": "child", "file": "trio.vcf", "variant": "1:200:C:T", "genotype": "1/1", "filter": "LowQual", "qual": 5.0, "father_genotype": "0/1", "mother_genotype": "0/1", "annotation": {"consequence_types": [{"gene": "G1", "biotype": "protein_coding", "terms": ["stop_gained"]}]}}
{"sample": "child", "file": "trio.vcf", "variant": "1:300:G:A", "genotype": "0/0"}
{"sample": "child", "file": "trio.vcf", "variant": "2:1000050:T:TA", "genotype": "0/1", "filter": "PASS", "qual": 40.0, "annotation": {"consequence_types": [{"terms": ["intergenic_variant"]}]}}
{"sample": "father", "file": "trio.vcf", "variant": "1:200:C:T", "genotype": "0/1", "filter": "PASS", "qual": 60.0, "annotation": {}}
{"sample": "mother", "file": "trio.vcf", "variant": "1:100:A:C", "genotype": "0/1", "filter": "PASS", "qual": 60.0}
{"sample": "mother", "file": "trio.vcf", "variant": "1:200:C:T", "genotype": "0/1", "filter": "PASS", "qual": 60.0}
"#;

    pub const PED: &str = "FAM\tchild\tfather\tmother\t1\t2\n\
                           FAM\tfather\t0\t0\t1\t1\n\
                           FAM\tmother\t0\t0\t2\t1\n";

    /// Build the trio index into `store`.
    pub fn build_trio(store: &dyn SampleIndexStore) -> Result<StudyMetadata, anyhow::Error> {
        let mut metadata = StudyMetadata::new("study");
        let pedigree = read_pedigree(PED.as_bytes())?;
        build_index(store, &mut metadata, 1, CALLS.as_bytes(), &pedigree)?;
        Ok(metadata)
    }

    #[test]
    fn pedigree() -> Result<(), anyhow::Error> {
        let pedigree = read_pedigree(PED.as_bytes())?;
        assert_eq!(
            pedigree.get("child"),
            Some(&(Some("father".to_string()), Some("mother".to_string())))
        );
        assert_eq!(pedigree.get("father"), Some(&(None, None)));
        assert!(read_pedigree("FAM child".as_bytes()).is_err());
        Ok(())
    }

    #[test]
    fn build_trio_rows() -> Result<(), anyhow::Error> {
        let store = InMemoryStore::default();
        let mut metadata = StudyMetadata::new("study");
        let pedigree = read_pedigree(PED.as_bytes())?;
        let stats = build_index(&store, &mut metadata, 1, CALLS.as_bytes(), &pedigree)?;
        assert_eq!(
            stats,
            BuildStats {
                records: 7,
                skipped: 1,
                rows: 4,
                merged: 0,
            }
        );

        let child = metadata.sample("child")?;
        assert_eq!(child.files, vec!["trio.vcf"]);
        assert_eq!(child.father.as_deref(), Some("father"));
        assert!(metadata.family_indexed("child", 1));
        assert!(!metadata.family_indexed("father", 1));
        assert!(metadata.all_annotated(&["child", "father"], 1));
        assert!(!metadata.all_annotated(&["mother"], 1));
        assert_eq!(store.study_metadata()?, Some(metadata.clone()));

        let schema = metadata.schema(1)?;
        let rows = store.scan(1, child.id, Some("1"), false)?;
        assert_eq!(rows.len(), 1);
        let entry = SampleIndexEntry::from_row(&rows[0], schema.num_populations())?;
        assert_eq!(entry.count(), 2);
        assert_eq!(
            entry.variants(GenotypeCode::HomAltUnphased)?,
            vec![Variant::new("1", 200, "C", "T")]
        );
        let het = &entry.genotypes[&GenotypeCode::HetRefUnphased];
        assert!(het.annotation().is_some());
        assert_eq!(
            het.parents(),
            Some(
                &[genotype::join(
                    GenotypeCode::HomRefUnphased,
                    GenotypeCode::HetRefUnphased
                )][..]
            )
        );

        let mother = metadata.sample("mother")?;
        let rows = store.scan(1, mother.id, None, false)?;
        let entry = SampleIndexEntry::from_row(&rows[0], schema.num_populations())?;
        assert_eq!(entry.genotypes[&GenotypeCode::HetRefUnphased].annotation(), None);
        assert_eq!(entry.genotypes[&GenotypeCode::HetRefUnphased].parents(), None);

        Ok(())
    }

    #[test]
    fn multi_file_calls() -> Result<(), anyhow::Error> {
        let calls = r#"{"sample": "s", "file": "a.vcf", "variant": "1:100:A:C", "genotype": "0/1", "filter": "PASS"}
{"sample": "s", "file": "b.vcf", "variant": "1:100:A:C", "genotype": "1/1"}
{"sample": "s", "file": "b.vcf", "variant": "1:150:A:G", "genotype": "0/1"}
"#;
        let store = InMemoryStore::default();
        let mut metadata = StudyMetadata::new("study");
        build_index(&store, &mut metadata, 1, calls.as_bytes(), &Pedigree::new())?;

        let sample = metadata.sample("s")?;
        assert!(sample.is_multi_file());
        let schema = metadata.schema(1)?;
        let rows = store.scan(1, sample.id, None, false)?;
        let entry = SampleIndexEntry::from_row(&rows[0], schema.num_populations())?;
        let het = &entry.genotypes[&GenotypeCode::HetRefUnphased];
        let file_index = het.file_index().unwrap_or_default();
        assert_eq!(file_index.len(), 2);
        assert!(schema.file_index.is_multi_file(file_index[0]));
        assert!(!schema.file_index.is_multi_file(file_index[1]));
        assert_eq!(schema.file_index.file_position.read(file_index[1]), 1);

        Ok(())
    }

    #[test]
    fn second_run_merges_rows() -> Result<(), anyhow::Error> {
        let store = InMemoryStore::default();
        let mut metadata = build_trio(&store)?;
        let calls = r#"{"sample": "child", "file": "extra.vcf", "variant": "1:150:A:G", "genotype": "0/1", "qual": 30.0}
{"sample": "child", "file": "extra.vcf", "variant": "1:200:C:T", "genotype": "1/1"}
"#;
        let pedigree = read_pedigree(PED.as_bytes())?;
        let stats = build_index(&store, &mut metadata, 1, calls.as_bytes(), &pedigree)?;
        assert_eq!(
            stats,
            BuildStats {
                records: 2,
                skipped: 0,
                rows: 1,
                merged: 1,
            }
        );

        let child = metadata.sample("child")?;
        assert_eq!(child.files, vec!["trio.vcf", "extra.vcf"]);
        assert!(metadata.family_indexed("child", 1));
        assert!(!metadata.all_annotated(&["child"], 1));
        assert!(metadata.all_annotated(&["father"], 1));

        let schema = metadata.schema(1)?;
        assert_eq!(store.scan(1, child.id, None, true)?.len(), 2);
        let rows = store.scan(1, child.id, Some("1"), false)?;
        let entry = SampleIndexEntry::from_row(&rows[0], schema.num_populations())?;
        assert_eq!(
            entry.variants(GenotypeCode::HetRefUnphased)?,
            vec![Variant::new("1", 100, "A", "C"), Variant::new("1", 150, "A", "G")]
        );
        let het = &entry.genotypes[&GenotypeCode::HetRefUnphased];
        assert_eq!(het.annotation(), None);
        assert_eq!(
            het.parents(),
            Some(
                &[
                    genotype::join(GenotypeCode::HomRefUnphased, GenotypeCode::HetRefUnphased),
                    join_parents(None, None),
                ][..]
            )
        );
        let hom = &entry.genotypes[&GenotypeCode::HomAltUnphased];
        let file_index = hom.file_index().unwrap_or_default();
        assert_eq!(file_index.len(), 1);
        assert!(schema.file_index.is_multi_file(file_index[0]));

        Ok(())
    }

    #[test]
    fn unsorted_input() {
        let calls = r#"{"sample": "s", "file": "a.vcf", "variant": "1:100:A:C", "genotype": "0/1"}
{"sample": "s", "file": "a.vcf", "variant": "2:100:A:C", "genotype": "0/1"}
{"sample": "s", "file": "a.vcf", "variant": "1:200:A:C", "genotype": "0/1"}
"#;
        let store = InMemoryStore::default();
        let mut metadata = StudyMetadata::new("study");
        let result = build_index(&store, &mut metadata, 1, calls.as_bytes(), &Pedigree::new());
        assert!(result.is_err());
    }

    #[test]
    fn rocksdb_round_trip() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::TempDir::new()?;
        let metadata = {
            let store = RocksDbStore::open(tmp_dir.path())?;
            build_trio(&store)?
        };
        let store = RocksDbStore::open_read_only(tmp_dir.path())?;
        assert_eq!(store.study_metadata()?, Some(metadata.clone()));
        let child = metadata.sample("child")?;
        assert_eq!(store.scan(1, child.id, None, true)?.len(), 2);
        Ok(())
    }
}
