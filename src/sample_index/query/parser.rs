//! Compilation of variant queries into sample index queries.

use std::collections::HashMap;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::common::{self, QueryOperation, Values};
use crate::sample_index::annotation::{
    bits, BASIC_FLAG, INTERGENIC_VARIANT, LOF_EXTENDED_SET, LOF_SET, MISSENSE_VARIANT,
    PROTEIN_CODING_BIOTYPE,
};
use crate::sample_index::codec::genotype::{self, GenotypeCode};
use crate::sample_index::conf::POP_FREQ_THRESHOLD_001;
use crate::sample_index::family::{is_fully_covered_parent_filter, parent_filter, ParentFilter};
use crate::sample_index::file_index::{VariantClass, PASS};
use crate::sample_index::metadata::StudyMetadata;
use crate::sample_index::schema::{RangeIndexField, SampleIndexSchema};

use super::index::{
    Coverage, PopulationFrequencyFilter, PopulationFrequencyQuery, SampleAnnotationIndexQuery,
    SampleFileIndexQuery, SampleIndexQuery, SingleSampleIndexQuery,
};
use super::range::{range_query, RangeQuery};
use super::{
    parse_genotype_filter, parse_number, parse_op_value, parse_regions, parse_sample_data,
    parse_types, Error, Operator, VariantQuery,
};

/// Which samples are read from the index and with which genotypes.
#[derive(Debug, Default)]
struct SamplePlan {
    op: QueryOperation,
    version: u32,
    /// Samples answered from their own rows, with their genotypes (`None`
    /// for any indexed genotype).
    samples: IndexMap<String, Option<Vec<GenotypeCode>>>,
    /// Father and mother filters of children.
    parents: HashMap<String, (Option<ParentFilter>, Option<ParentFilter>)>,
    /// Whether the genotype or sample clause is represented exactly.
    exact: bool,
}

/// How well the file query of one sample represents the file clauses.
#[derive(Debug, Clone, Copy, Default)]
struct FileCoverage {
    types: bool,
    filter: bool,
    qual: bool,
    sample_data: bool,
    file: bool,
}

/// Compiles `VariantQuery`s for one study.
#[derive(Debug, Clone)]
pub struct SampleIndexQueryParser<'a> {
    metadata: &'a StudyMetadata,
}

impl<'a> SampleIndexQueryParser<'a> {
    pub fn new(metadata: &'a StudyMetadata) -> Self {
        Self { metadata }
    }

    /// Whether the genotype or sample clause of `query` can be answered from
    /// the index.
    ///
    /// Under AND, at least one sample must only name genotypes with an
    /// alternative allele and no negation; under OR all samples must.
    pub fn valid_sample_index_query(&self, query: &VariantQuery) -> bool {
        match self.plan_samples(query) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("not a sample index query: {}", e);
                false
            }
        }
    }

    /// Compile `query`, returning the index query and the residual query.
    ///
    /// The residual query holds the clauses that still have to be checked
    /// on the variants returned from the index.
    pub fn parse(&self, query: VariantQuery) -> Result<(SampleIndexQuery, VariantQuery), Error> {
        let plan = self.plan_samples(&query)?;
        let schema = self.metadata.schema(plan.version)?;
        let names = plan.samples.keys().map(String::as_str).collect::<Vec<_>>();
        let all_annotated = self.metadata.all_annotated(&names, plan.version);
        tracing::debug!(
            "querying samples {:?} with sample index version {}",
            &names,
            plan.version
        );

        let (annotation, annotation_exact) =
            self.annotation_query_with_coverage(&schema, &query, all_annotated)?;
        let regions = match &query.region {
            Some(region) => parse_regions(region)?,
            None => Vec::new(),
        };

        let mut queries = Vec::new();
        let mut file_exact = FileCoverage {
            types: true,
            filter: true,
            qual: true,
            sample_data: true,
            file: true,
        };
        for (name, genotypes) in &plan.samples {
            let sample = self.metadata.sample(name)?;
            let (file, coverage) = self.file_query_with_coverage(&schema, &query, name)?;
            file_exact.types &= coverage.types;
            file_exact.filter &= coverage.filter;
            file_exact.qual &= coverage.qual;
            file_exact.sample_data &= coverage.sample_data;
            file_exact.file &= coverage.file;
            let (father_filter, mother_filter) =
                plan.parents.get(name).cloned().unwrap_or_default();
            queries.push(SingleSampleIndexQuery {
                sample: name.clone(),
                sample_id: sample.id,
                schema: schema.clone(),
                genotypes: genotypes.clone(),
                file,
                annotation: annotation.clone(),
                father_filter,
                mother_filter,
            });
        }

        // Clauses on file attributes describe one file of one sample.
        let single_sample = queries.len() == 1;
        let mut residual = query;
        if plan.exact {
            residual.genotype = None;
            residual.sample = None;
        }
        if file_exact.types {
            residual.types = None;
        }
        if single_sample && file_exact.filter {
            residual.filter = None;
        }
        if single_sample && file_exact.qual {
            residual.qual = None;
        }
        if file_exact.sample_data {
            residual.sample_data = None;
        }
        if single_sample && file_exact.file {
            residual.file = None;
        }
        if annotation_exact.consequence_type {
            residual.consequence_type = None;
        }
        if annotation_exact.biotype {
            residual.biotype = None;
        }
        if annotation_exact.population_frequency {
            residual.population_frequency_alt = None;
        }

        Ok((
            SampleIndexQuery {
                version: plan.version,
                schema,
                op: plan.op,
                queries,
                regions,
            },
            residual,
        ))
    }

    /// Compile the file clauses of `query` for `sample`.
    pub fn parse_file_query(
        &self,
        schema: &SampleIndexSchema,
        query: &VariantQuery,
        sample: &str,
    ) -> Result<SampleFileIndexQuery, Error> {
        Ok(self.file_query_with_coverage(schema, query, sample)?.0)
    }

    /// Compile the annotation clauses of `query`.
    ///
    /// Annotation is only filtered if all queried samples are annotated.
    pub fn parse_annotation_index_query(
        &self,
        schema: &SampleIndexSchema,
        query: &VariantQuery,
        all_annotated: bool,
    ) -> Result<SampleAnnotationIndexQuery, Error> {
        Ok(self
            .annotation_query_with_coverage(schema, query, all_annotated)?
            .0)
    }

    /// The summary bits that must be set for variants matching `query`.
    pub fn parse_annotation_mask(
        &self,
        schema: &SampleIndexSchema,
        query: &VariantQuery,
    ) -> Result<u8, Error> {
        Ok(annotation_clauses(schema, query)?.required)
    }

    fn plan_samples(&self, query: &VariantQuery) -> Result<SamplePlan, Error> {
        match (&query.genotype, &query.sample) {
            (Some(_), Some(_)) => Err(Error::GenotypeAndSample),
            (Some(genotypes), None) => self.plan_genotypes(genotypes),
            (None, Some(samples)) => self.plan_sample_names(samples),
            (None, None) => Err(Error::NotSupported(
                "no genotype or sample filter".to_string(),
            )),
        }
    }

    fn plan_genotypes(&self, value: &str) -> Result<SamplePlan, Error> {
        let filter = parse_genotype_filter(value)?;
        let op = filter.operation();
        let usable =
            |gts: &[String]| !gts.is_empty() && gts.iter().all(|gt| genotype::valid_genotype(gt));

        let mut plan = SamplePlan {
            op,
            exact: true,
            ..Default::default()
        };
        for (sample, gts) in &filter.samples {
            if usable(gts) {
                self.metadata.sample(sample)?;
                let codes = gts
                    .iter()
                    .map(|gt| genotype::encode(gt))
                    .unique()
                    .collect::<Vec<_>>();
                plan.exact &= !codes.iter().any(GenotypeCode::is_ambiguous);
                plan.samples.insert(sample.clone(), Some(codes));
            } else if op == QueryOperation::Or {
                return Err(Error::NotSupported(format!(
                    "sample {} has genotypes {:?} not in the index",
                    sample, gts
                )));
            }
        }
        if plan.samples.is_empty() {
            return Err(Error::NotSupported(format!(
                "no sample in {:?} has indexed genotypes",
                value
            )));
        }
        plan.version = self.common_version(&plan)?;

        // Samples with genotypes not in the index may still filter their
        // children through the family index.
        for (sample, gts) in &filter.samples {
            if plan.samples.contains_key(sample) {
                continue;
            }
            let mut folded = false;
            if let Some(parent) = parent_filter(gts) {
                for child in plan.samples.keys() {
                    if !self.metadata.family_indexed(child, plan.version) {
                        continue;
                    }
                    let meta = self.metadata.sample(child)?;
                    let entry = plan.parents.entry(child.clone()).or_default();
                    if meta.father.as_deref() == Some(sample.as_str()) {
                        entry.0 = Some(parent);
                        folded = true;
                    }
                    if meta.mother.as_deref() == Some(sample.as_str()) {
                        entry.1 = Some(parent);
                        folded = true;
                    }
                }
            }
            tracing::trace!(
                "genotypes {:?} of {} filtered through children: {}",
                gts,
                sample,
                folded
            );
            plan.exact &= folded && is_fully_covered_parent_filter(gts);
        }
        Ok(plan)
    }

    fn plan_sample_names(&self, value: &str) -> Result<SamplePlan, Error> {
        let values = common::split_values(value)?;
        let op = values.op.unwrap_or_default();
        let mut plan = SamplePlan {
            op,
            exact: true,
            ..Default::default()
        };
        for sample in &values.values {
            if common::is_negated(sample) {
                if op == QueryOperation::Or {
                    return Err(Error::NotSupported(format!(
                        "negated sample {} in OR query",
                        sample
                    )));
                }
                plan.exact = false;
            } else {
                self.metadata.sample(sample)?;
                plan.samples.insert(sample.to_string(), None);
            }
        }
        if plan.samples.is_empty() {
            return Err(Error::NotSupported(format!(
                "no sample in {:?} to query",
                value
            )));
        }
        plan.version = self.common_version(&plan)?;
        Ok(plan)
    }

    fn common_version(&self, plan: &SamplePlan) -> Result<u32, Error> {
        let names = plan.samples.keys().map(String::as_str).collect::<Vec<_>>();
        Ok(self.metadata.common_version(&names)?)
    }

    fn file_query_with_coverage(
        &self,
        schema: &SampleIndexSchema,
        query: &VariantQuery,
        sample: &str,
    ) -> Result<(SampleFileIndexQuery, FileCoverage), Error> {
        let meta = self.metadata.sample(sample)?;
        let fi = &schema.file_index;
        let mut result = SampleFileIndexQuery::new(fi.clone());
        let mut coverage = FileCoverage::default();

        if let Some(types) = &query.types {
            let types = parse_types(types)?;
            if types.op == Some(QueryOperation::And) && types.len() > 1 {
                coverage.types = false;
            } else {
                let mut classes = Vec::new();
                let mut exact = true;
                for t in &types.values {
                    let (cs, is_exact) = t.classes();
                    exact &= is_exact;
                    classes.extend_from_slice(cs);
                }
                let classes = classes
                    .into_iter()
                    .sorted_by_key(VariantClass::code)
                    .dedup()
                    .collect::<Vec<_>>();
                coverage.types = exact;
                if classes.len() < 4 {
                    result.type_classes = Some(classes);
                }
            }
        } else {
            coverage.types = true;
        }

        coverage.filter = match &query.filter {
            Some(filter) => {
                let values = common::split_values(filter)?;
                let has_pass = values.values.iter().any(|v| *v == PASS);
                match (values.values.as_slice(), values.is_or()) {
                    ([value], _) if *value == PASS => {
                        result.filter_pass = Some(true);
                        true
                    }
                    ([value], _) if common::remove_negation(value) == PASS => {
                        result.filter_pass = Some(false);
                        true
                    }
                    (_, true) if has_pass => false,
                    (values, _) => {
                        if values.iter().all(|v| !common::is_negated(v)) {
                            result.filter_pass = Some(false);
                        }
                        false
                    }
                }
            }
            None => true,
        };

        coverage.qual = match &query.qual {
            Some(qual) => {
                let (_, op, value) = parse_op_value(qual)?;
                let value = parse_number(&value)?;
                let range = qual_range(&fi.qual, op, value);
                if !range.is_match_all(fi.qual.thresholds.len()) {
                    result.qual = Some(range);
                }
                // missing QUAL shares the lowest code
                range.exact && !range.contains(0)
            }
            None => true,
        };

        coverage.sample_data = match &query.sample_data {
            Some(sample_data) => {
                let values = parse_sample_data(sample_data)?;
                let mine = values
                    .values
                    .iter()
                    .filter(|(s, _)| s == sample)
                    .map(|(_, f)| f)
                    .collect::<Vec<_>>();
                let all_mine = mine.len() == values.len();
                let dp_filters = mine
                    .iter()
                    .filter(|f| f.key == fi.dp_key)
                    .map(|f| Ok(dp_range(&fi.dp, f.op, parse_number(&f.value)?)))
                    .collect::<Result<Vec<_>, Error>>()?;
                if values.is_or() {
                    false
                } else {
                    result.dp = dp_filters.iter().flatten().next().copied();
                    match (mine.as_slice(), dp_filters.as_slice()) {
                        ([_], [Some(range)]) => all_mine && range.exact && !meta.is_multi_file(),
                        _ => false,
                    }
                }
            }
            None => true,
        };

        coverage.file = match &query.file {
            Some(file) => {
                let values = common::split_values(file)?;
                let positions = values
                    .values
                    .iter()
                    .filter_map(|f| meta.file_position(f))
                    .collect::<Vec<_>>();
                let representable = !values.values.iter().any(|f| common::is_negated(f))
                    && (values.is_or() || values.len() == 1);
                if representable
                    && meta.is_multi_file()
                    && !positions.is_empty()
                    && positions.iter().all(|p| *p < fi.max_files())
                {
                    result.file_positions = Some(positions.iter().map(|p| *p as u16).collect());
                }
                representable && meta.files.iter().all(|f| values.values.contains(&f.as_str()))
            }
            None => true,
        };

        if meta.is_multi_file() {
            coverage.filter &= query.filter.is_none();
            coverage.qual &= query.qual.is_none();
        }

        Ok((result, coverage))
    }

    fn annotation_query_with_coverage(
        &self,
        schema: &SampleIndexSchema,
        query: &VariantQuery,
        all_annotated: bool,
    ) -> Result<(SampleAnnotationIndexQuery, AnnotationCoverage), Error> {
        if !all_annotated {
            tracing::debug!("not all samples annotated, annotation filters skipped");
            return Ok((
                SampleAnnotationIndexQuery::default(),
                AnnotationCoverage::default(),
            ));
        }
        let clauses = annotation_clauses(schema, query)?;
        let mut mask = clauses.required;
        if clauses.not_intergenic {
            mask |= bits::INTERGENIC;
        }
        let coverage = AnnotationCoverage {
            consequence_type: clauses.consequence_type.is_exact(),
            biotype: clauses.biotype.is_exact(),
            population_frequency: clauses.pop_freq.is_exact(),
        };
        Ok((
            SampleAnnotationIndexQuery {
                mask,
                value: clauses.required,
                pop_freq: clauses.pop_freq,
            },
            coverage,
        ))
    }
}

/// Which annotation clauses are represented exactly.
#[derive(Debug, Clone, Copy, Default)]
struct AnnotationCoverage {
    consequence_type: bool,
    biotype: bool,
    population_frequency: bool,
}

/// The annotation clauses of a query in terms of summary bits.
#[derive(Debug)]
struct AnnotationClauses {
    consequence_type: Coverage<u8>,
    biotype: Coverage<u8>,
    pop_freq: PopulationFrequencyQuery,
    /// Union of the bits required by all clauses.
    required: u8,
    /// Whether matching variants cannot be intergenic.
    not_intergenic: bool,
}

fn annotation_clauses(
    schema: &SampleIndexSchema,
    query: &VariantQuery,
) -> Result<AnnotationClauses, Error> {
    let basic = match &query.transcript_flag {
        Some(flags) => {
            let flags = common::split_values(flags)?;
            !flags.is_or() && flags.values.contains(&BASIC_FLAG)
        }
        None => false,
    };
    let combined = query.gene.is_some() || query.transcript_flag.is_some();

    let consequence_type = match &query.consequence_type {
        Some(cts) => {
            let cts = common::split_values(cts)?;
            let coverage = consequence_type_coverage(&cts, basic);
            if combined || query.biotype.is_some() {
                coverage.widen()
            } else {
                coverage
            }
        }
        None => Coverage::MatchAll,
    };
    let biotype = match &query.biotype {
        Some(biotypes) => {
            let biotypes = common::split_values(biotypes)?;
            let coverage = single_term_coverage(&biotypes, PROTEIN_CODING_BIOTYPE, bits::PROTEIN_CODING);
            if combined || query.consequence_type.is_some() {
                coverage.widen()
            } else {
                coverage
            }
        }
        None => Coverage::MatchAll,
    };
    let protein_substitution = match &query.protein_substitution {
        Some(value) => protein_substitution_coverage(value)?,
        None => Coverage::MatchAll,
    };
    let clinical = match &query.clinical_significance {
        Some(value) if !value.trim().is_empty() => Coverage::Widened(bits::CLINICAL),
        _ => Coverage::MatchAll,
    };
    let (pop_freq, any_001) = match &query.population_frequency_alt {
        Some(value) => population_frequency_query(schema, value)?,
        None => (PopulationFrequencyQuery::MatchAll, false),
    };

    let mut required = [consequence_type, biotype, protein_substitution, clinical]
        .iter()
        .filter_map(Coverage::predicate)
        .fold(0u8, |acc, bits| acc | bits);
    if any_001 {
        required |= bits::POP_FREQ_ANY_001;
    }

    let not_intergenic = query.gene.is_some()
        || query.biotype.is_some()
        || query
            .consequence_type
            .as_deref()
            .map(|cts| !cts.contains(INTERGENIC_VARIANT))
            .unwrap_or(false);

    Ok(AnnotationClauses {
        consequence_type,
        biotype,
        pop_freq,
        required,
        not_intergenic,
    })
}

fn same_terms(values: &[&str], set: &[&str]) -> bool {
    values.iter().all(|v| set.contains(v)) && set.iter().all(|s| values.contains(s))
}

/// Summary bits of a consequence type clause.
///
/// Under OR all terms must fall into the same set, under AND every term
/// adds the bits of its set.
fn consequence_type_coverage(cts: &Values<&str>, basic: bool) -> Coverage<u8> {
    let extended_bit = if basic {
        bits::LOF_EXTENDED_BASIC
    } else {
        bits::LOF_EXTENDED
    };
    if cts.is_empty() {
        return Coverage::MatchAll;
    }
    if cts.op == Some(QueryOperation::And) && cts.len() > 1 {
        let required = cts.values.iter().fold(0u8, |acc, ct| {
            if *ct == MISSENSE_VARIANT {
                acc | bits::MISSENSE | extended_bit
            } else if LOF_SET.contains(ct) {
                acc | bits::LOF | extended_bit
            } else if LOF_EXTENDED_SET.contains(ct) {
                acc | extended_bit
            } else {
                acc
            }
        });
        return if required == 0 {
            Coverage::MatchAll
        } else {
            Coverage::Widened(required)
        };
    }

    let values = &cts.values;
    if values.iter().all(|ct| *ct == MISSENSE_VARIANT) {
        Coverage::Exact(bits::MISSENSE)
    } else if values.iter().all(|ct| LOF_SET.contains(ct)) {
        if basic {
            Coverage::Widened(bits::LOF | bits::LOF_EXTENDED_BASIC)
        } else if same_terms(values, LOF_SET) {
            Coverage::Exact(bits::LOF)
        } else {
            Coverage::Widened(bits::LOF)
        }
    } else if values.iter().all(|ct| LOF_EXTENDED_SET.contains(ct)) {
        if !basic && same_terms(values, LOF_EXTENDED_SET) {
            Coverage::Exact(extended_bit)
        } else {
            Coverage::Widened(extended_bit)
        }
    } else {
        Coverage::MatchAll
    }
}

/// Bit of a clause whose only indexed term is `term`.
fn single_term_coverage(values: &Values<&str>, term: &str, bit: u8) -> Coverage<u8> {
    if values.is_empty() {
        Coverage::MatchAll
    } else if values.values.iter().all(|v| *v == term) {
        Coverage::Exact(bit)
    } else if values.op == Some(QueryOperation::And) && values.values.contains(&term) {
        Coverage::Widened(bit)
    } else {
        Coverage::MatchAll
    }
}

/// Protein substitution scores exist for missense variants only.
fn protein_substitution_coverage(value: &str) -> Result<Coverage<u8>, Error> {
    let values = common::split_values(value)?;
    let mut including_missing = false;
    for item in &values.values {
        let (_, op, _) = parse_op_value(item)?;
        including_missing |= matches!(op, Operator::LtOrMissing | Operator::GtOrMissing);
    }
    Ok(if values.is_empty() || (including_missing && (values.is_or() || values.len() == 1)) {
        Coverage::MatchAll
    } else {
        Coverage::Widened(bits::LOF_EXTENDED)
    })
}

/// Range of QUAL codes matching `op value`.
///
/// Missing QUAL values are stored with the lowest code.
fn qual_range(field: &RangeIndexField, op: Operator, value: f64) -> RangeQuery {
    let mut range = range_query(op, value, &field.thresholds, 0.0, f64::MAX);
    if op == Operator::GtOrMissing {
        range.min_code_inclusive = 0;
        range.exact = false;
    }
    range
}

/// Range of DP codes matching `op value`, `None` if no range holds all
/// matching calls.
fn dp_range(field: &RangeIndexField, op: Operator, value: f64) -> Option<RangeQuery> {
    if matches!(op, Operator::Ne | Operator::LtOrMissing) {
        return None;
    }
    let mut range = range_query(op, value, &field.thresholds, 0.0, f64::MAX);
    match field.null_code() {
        Some(null_code) if op == Operator::GtOrMissing => {
            range.max_code_exclusive = null_code + 1;
            range.exact = false;
        }
        Some(_) => (),
        None => {
            if op == Operator::GtOrMissing {
                range.min_code_inclusive = 0;
            }
            // missing values share the lowest code
            range.exact &= !range.contains(0);
        }
    }
    Some(range)
}

/// Compile a population frequency clause.
///
/// Also returns whether the clause implies the "any population below
/// 0.1%" summary bit: only if all items are combined with AND, every
/// configured population is constrained and no threshold exceeds 0.1%.
pub fn population_frequency_query(
    schema: &SampleIndexSchema,
    value: &str,
) -> Result<(PopulationFrequencyQuery, bool), Error> {
    let values = common::split_values(value)?;
    if values.is_empty() {
        return Ok((PopulationFrequencyQuery::MatchAll, false));
    }
    let op = values.op.unwrap_or_default();
    let conf = &schema.configuration.population_frequency;

    let mut filters = Vec::new();
    let mut exact = true;
    let mut any_001 = op == QueryOperation::And;
    let mut constrained = vec![false; conf.populations.len()];
    for item in &values.values {
        let (key, operator, freq) = parse_op_value(item)?;
        let freq = parse_number(&freq)?;
        any_001 &= match operator {
            Operator::Lt | Operator::LtOrMissing => freq <= POP_FREQ_THRESHOLD_001,
            Operator::Le => freq < POP_FREQ_THRESHOLD_001,
            _ => false,
        };

        let position = conf.populations.iter().position(|p| p.key() == key);
        let Some(position) = position.filter(|_| operator != Operator::Ne) else {
            tracing::trace!("population frequency filter {} not in the index", item);
            if op == QueryOperation::Or {
                return Ok((PopulationFrequencyQuery::MatchAll, false));
            }
            exact = false;
            continue;
        };
        let mut range = range_query(operator, freq, &conf.thresholds, 0.0, 1.0);
        if operator == Operator::GtOrMissing {
            // missing frequencies are stored as 0
            range.min_code_inclusive = 0;
            range.exact = false;
        }
        exact &= range.exact;
        constrained[position] = true;
        filters.push(PopulationFrequencyFilter {
            position,
            population: conf.populations[position].clone(),
            range,
        });
    }
    any_001 &= constrained.iter().all(|c| *c);

    let query = if filters.is_empty() {
        PopulationFrequencyQuery::MatchAll
    } else {
        PopulationFrequencyQuery::Filter { op, filters, exact }
    };
    Ok((query, any_001))
}
