//! Compiled sample index queries.

use crate::common::QueryOperation;
use crate::sample_index::codec::genotype::GenotypeCode;
use crate::sample_index::conf::Population;
use crate::sample_index::family::{parent_filter_accepts, ParentFilter};
use crate::sample_index::file_index::VariantClass;
use crate::sample_index::schema::{FileIndexSchema, SampleIndexSchema};

use super::range::RangeQuery;
use super::GenomicRegion;

/// How an index predicate represents one query clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage<T> {
    /// The predicate holds exactly for the values matching the clause.
    Exact(T),
    /// The predicate holds for a superset of the matching values.
    Widened(T),
    /// The clause cannot be represented, the predicate matches everything.
    MatchAll,
}

impl<T> Coverage<T> {
    /// The predicate, if any.
    pub fn predicate(&self) -> Option<&T> {
        match self {
            Coverage::Exact(value) | Coverage::Widened(value) => Some(value),
            Coverage::MatchAll => None,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Coverage::Exact(_))
    }

    /// Mark the coverage as widened.
    pub fn widen(self) -> Self {
        match self {
            Coverage::Exact(value) => Coverage::Widened(value),
            other => other,
        }
    }
}

/// Filter on the file index of one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFileIndexQuery {
    pub schema: FileIndexSchema,
    /// Accepted variant type classes.
    pub type_classes: Option<Vec<VariantClass>>,
    /// Required value of the PASS bit.
    pub filter_pass: Option<bool>,
    pub qual: Option<RangeQuery>,
    pub dp: Option<RangeQuery>,
    /// Accepted file positions.
    pub file_positions: Option<Vec<u16>>,
}

impl SampleFileIndexQuery {
    pub fn new(schema: FileIndexSchema) -> Self {
        Self {
            schema,
            type_classes: None,
            filter_pass: None,
            qual: None,
            dp: None,
            file_positions: None,
        }
    }

    /// Whether the query accepts every file index value.
    pub fn is_empty(&self) -> bool {
        self.type_classes.is_none()
            && self.filter_pass.is_none()
            && self.qual.is_none()
            && self.dp.is_none()
            && self.file_positions.is_none()
    }

    /// Bits that must be set and bits that must be clear.
    pub fn include_exclude_masks(&self) -> (u16, u16) {
        let pass = self.schema.filter_pass.mask();
        match self.filter_pass {
            Some(true) => (pass, 0),
            Some(false) => (0, pass),
            None => (0, 0),
        }
    }

    /// Whether the file index value `index` may match.
    ///
    /// Values of variants called in several files only have their type
    /// class checked, the remaining fields describe one file only.
    pub fn test(&self, index: u16) -> bool {
        let schema = &self.schema;
        if let Some(classes) = &self.type_classes {
            let class = schema.type_class.read(index);
            if !classes.iter().any(|c| c.code() == class) {
                return false;
            }
        }
        if schema.is_multi_file(index) {
            return true;
        }
        let (include, exclude) = self.include_exclude_masks();
        if index & include != include || index & exclude != 0 {
            return false;
        }
        if let Some(qual) = &self.qual {
            if !qual.contains(schema.qual.field.read(index)) {
                return false;
            }
        }
        if let Some(dp) = &self.dp {
            if !dp.contains(schema.dp.field.read(index)) {
                return false;
            }
        }
        if let Some(positions) = &self.file_positions {
            if !positions.contains(&schema.file_position.read(index)) {
                return false;
            }
        }
        true
    }
}

/// Range of accepted frequency codes of one population.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationFrequencyFilter {
    /// Position of the population in the configuration.
    pub position: usize,
    pub population: Population,
    pub range: RangeQuery,
}

impl PopulationFrequencyFilter {
    pub fn test(&self, codes: &[u8]) -> bool {
        codes
            .get(self.position)
            .map(|code| self.range.contains(*code as u16))
            .unwrap_or(true)
    }
}

/// Filter on the population frequency index.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PopulationFrequencyQuery {
    #[default]
    MatchAll,
    Filter {
        op: QueryOperation,
        filters: Vec<PopulationFrequencyFilter>,
        /// Whether the filters represent the clause exactly.
        exact: bool,
    },
}

impl PopulationFrequencyQuery {
    /// Whether the codes of one variant may match.
    pub fn test(&self, codes: &[u8]) -> bool {
        match self {
            PopulationFrequencyQuery::MatchAll => true,
            PopulationFrequencyQuery::Filter { op, filters, .. } => match op {
                QueryOperation::And => filters.iter().all(|f| f.test(codes)),
                QueryOperation::Or => filters.iter().any(|f| f.test(codes)),
            },
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, PopulationFrequencyQuery::Filter { exact: true, .. })
    }
}

/// Filter on the annotation index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleAnnotationIndexQuery {
    /// Bits of the summary byte that are checked.
    pub mask: u8,
    /// Required values of the checked bits.
    pub value: u8,
    pub pop_freq: PopulationFrequencyQuery,
}

impl SampleAnnotationIndexQuery {
    pub fn test_summary(&self, summary: u8) -> bool {
        summary & self.mask == self.value
    }

    /// Whether the query accepts every annotation.
    pub fn is_empty(&self) -> bool {
        self.mask == 0 && self.pop_freq == PopulationFrequencyQuery::MatchAll
    }
}

/// The index query for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleSampleIndexQuery {
    pub sample: String,
    pub sample_id: u32,
    pub schema: SampleIndexSchema,
    /// Accepted genotypes, `None` for all.
    pub genotypes: Option<Vec<GenotypeCode>>,
    pub file: SampleFileIndexQuery,
    pub annotation: SampleAnnotationIndexQuery,
    pub father_filter: Option<ParentFilter>,
    pub mother_filter: Option<ParentFilter>,
}

impl SingleSampleIndexQuery {
    /// Whether variants with `genotype` are queried.
    pub fn accepts_genotype(&self, genotype: GenotypeCode) -> bool {
        self.genotypes
            .as_ref()
            .map(|gts| gts.contains(&genotype))
            .unwrap_or(true)
    }

    /// Whether the joined parents' genotypes pass the parent filters.
    pub fn test_parents(&self, father: GenotypeCode, mother: GenotypeCode) -> bool {
        self.father_filter
            .as_ref()
            .map(|f| parent_filter_accepts(f, father))
            .unwrap_or(true)
            && self
                .mother_filter
                .as_ref()
                .map(|f| parent_filter_accepts(f, mother))
                .unwrap_or(true)
    }

    pub fn has_parent_filters(&self) -> bool {
        self.father_filter.is_some() || self.mother_filter.is_some()
    }
}

/// The index query over all queried samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleIndexQuery {
    /// The index version all samples are read with.
    pub version: u32,
    pub schema: SampleIndexSchema,
    /// How the per sample results are combined.
    pub op: QueryOperation,
    pub queries: Vec<SingleSampleIndexQuery>,
    /// Regions to read, all if empty.
    pub regions: Vec<GenomicRegion>,
}
