//! Layout of the sample index: batches, column names and bit fields.

use super::conf::{self, SampleIndexConfiguration};

/// Number of genomic positions covered by one row.
pub const BATCH_SIZE: u32 = 1_000_000;

/// Exclusive upper bound for offsets within a batch.
///
/// The stored offset has 24 bits but the top nibble is shared with the allele
/// code of coded SNVs.
pub const MAX_OFFSET: u32 = 1 << 20;

/// Start of the batch containing `pos`.
pub fn batch_start(pos: u32) -> u32 {
    pos - pos % BATCH_SIZE
}

/// Column naming within one row.
///
/// Each genotype label `L` (e.g., `0/1`) owns the columns `L` (variants),
/// `_F_L` (file index), `_A_L` (annotation), `_PF_L` (population frequency),
/// `_C_L` (count) and `_P_L` (parents).
pub mod columns {
    pub const FILE_INDEX_PREFIX: &str = "_F_";
    pub const ANNOTATION_PREFIX: &str = "_A_";
    pub const POP_FREQ_PREFIX: &str = "_PF_";
    pub const COUNT_PREFIX: &str = "_C_";
    pub const PARENTS_PREFIX: &str = "_P_";

    /// The kind of data held by a column.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
    pub enum ColumnKind {
        Variants,
        FileIndex,
        Annotation,
        PopFreq,
        Count,
        Parents,
    }

    impl ColumnKind {
        fn prefix(&self) -> &'static str {
            match self {
                ColumnKind::Variants => "",
                ColumnKind::FileIndex => FILE_INDEX_PREFIX,
                ColumnKind::Annotation => ANNOTATION_PREFIX,
                ColumnKind::PopFreq => POP_FREQ_PREFIX,
                ColumnKind::Count => COUNT_PREFIX,
                ColumnKind::Parents => PARENTS_PREFIX,
            }
        }

        /// Name of the column of this kind for the given genotype label.
        pub fn column(&self, label: &str) -> String {
            format!("{}{}", self.prefix(), label)
        }
    }

    /// Split column name into kind and genotype label.
    pub fn parse(name: &str) -> (ColumnKind, &str) {
        // `_PF_` must be tried before `_P_`.
        for kind in [
            ColumnKind::PopFreq,
            ColumnKind::FileIndex,
            ColumnKind::Annotation,
            ColumnKind::Count,
            ColumnKind::Parents,
        ] {
            if let Some(label) = name.strip_prefix(kind.prefix()) {
                return (kind, label);
            }
        }
        (ColumnKind::Variants, name)
    }
}

/// Number of distinct codes of a range field with `n` thresholds.
fn num_range_codes(num_thresholds: usize, nullable: bool) -> u32 {
    num_thresholds as u32 + 1 + u32::from(nullable)
}

/// Number of bits to store `num_codes` distinct values.
fn bits_for(num_codes: u32) -> u32 {
    if num_codes <= 1 {
        0
    } else {
        u32::BITS - (num_codes - 1).leading_zeros()
    }
}

/// Range code of `value`: the number of thresholds not above it.
///
/// Monotonic in `value`.
pub fn range_code(value: f64, thresholds: &[f64]) -> u16 {
    thresholds.iter().filter(|t| **t <= value).count() as u16
}

/// A contiguous group of bits within the 16 bit file index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexField {
    /// Offset of the lowest bit.
    pub offset: u32,
    /// Number of bits.
    pub bits: u32,
}

impl IndexField {
    pub fn new(offset: u32, bits: u32) -> Self {
        Self { offset, bits }
    }

    /// The mask selecting this field's bits.
    pub fn mask(&self) -> u16 {
        if self.bits == 0 {
            0
        } else {
            (((1u32 << self.bits) - 1) << self.offset) as u16
        }
    }

    /// Read the field's value from `index`.
    pub fn read(&self, index: u16) -> u16 {
        (index & self.mask()) >> self.offset
    }

    /// Return `index` with the field set to `value`.
    ///
    /// Bits of `value` beyond the field width are dropped.
    pub fn write(&self, index: u16, value: u16) -> u16 {
        (index & !self.mask()) | ((((value as u32) << self.offset) as u16) & self.mask())
    }

    /// Offset of the first bit after this field.
    pub fn end(&self) -> u32 {
        self.offset + self.bits
    }
}

/// A field storing the range code of a numeric value.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeIndexField {
    pub field: IndexField,
    /// Ascending thresholds.
    pub thresholds: Vec<f64>,
    /// Whether missing values get their own code (one after the last range).
    pub nullable: bool,
}

impl RangeIndexField {
    fn new(offset: u32, thresholds: &[f64], nullable: bool) -> Self {
        let bits = bits_for(num_range_codes(thresholds.len(), nullable));
        Self {
            field: IndexField::new(offset, bits),
            thresholds: thresholds.to_vec(),
            nullable,
        }
    }

    /// Code for a missing value.
    pub fn null_code(&self) -> Option<u16> {
        self.nullable.then_some(self.thresholds.len() as u16 + 1)
    }

    /// Encode an optional value.
    ///
    /// Missing values map to the null code when nullable and to 0 otherwise.
    pub fn code(&self, value: Option<f64>) -> u16 {
        match value {
            Some(value) => range_code(value, &self.thresholds),
            None => self.null_code().unwrap_or(0),
        }
    }
}

/// Layout of the 16 bit file index.
#[derive(Debug, Clone, PartialEq)]
pub struct FileIndexSchema {
    /// Set if the variant was called in more than one file of the sample.
    pub multi_file: IndexField,
    /// Position of the file among the sample's files.
    pub file_position: IndexField,
    /// Variant type class.
    pub type_class: IndexField,
    /// Set iff FILTER is `PASS`.
    pub filter_pass: IndexField,
    /// QUAL range code.
    pub qual: RangeIndexField,
    /// Depth range code.
    pub dp: RangeIndexField,
    /// Name of the sample data field holding the depth.
    pub dp_key: String,
}

impl FileIndexSchema {
    /// Lay out the file index for the given configuration.
    pub fn new(conf: &conf::FileIndexConfiguration) -> Result<Self, conf::Error> {
        let schema = Self::layout(conf);
        if schema.dp.field.end() > u16::BITS {
            Err(conf::Error::FileIndexTooWide(schema.dp.field.end()))
        } else {
            Ok(schema)
        }
    }

    fn layout(conf: &conf::FileIndexConfiguration) -> Self {
        let multi_file = IndexField::new(0, 1);
        let file_position = IndexField::new(multi_file.end(), conf.file_position_bits);
        let type_class = IndexField::new(file_position.end(), 2);
        let filter_pass = IndexField::new(type_class.end(), 1);
        let qual = RangeIndexField::new(filter_pass.end(), &conf.qual_thresholds, false);
        let dp = RangeIndexField::new(qual.field.end(), &conf.dp_thresholds, true);
        Self {
            multi_file,
            file_position,
            type_class,
            filter_pass,
            qual,
            dp,
            dp_key: conf.dp_key.clone(),
        }
    }

    /// Whether the multi-file bit is set in `index`.
    pub fn is_multi_file(&self, index: u16) -> bool {
        self.multi_file.read(index) != 0
    }

    /// Number of files that can be told apart by the file position.
    pub fn max_files(&self) -> usize {
        1 << self.file_position.bits
    }
}

/// Layout of the sample index for one configuration version.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleIndexSchema {
    /// Configuration version.
    pub version: u32,
    /// The configuration the schema is derived from.
    pub configuration: SampleIndexConfiguration,
    /// File index layout.
    pub file_index: FileIndexSchema,
}

impl SampleIndexSchema {
    /// Derive the schema from a validated configuration.
    pub fn new(version: u32, configuration: SampleIndexConfiguration) -> Result<Self, conf::Error> {
        configuration.validate()?;
        let file_index = FileIndexSchema::new(&configuration.file_index)?;
        Ok(Self {
            version,
            configuration,
            file_index,
        })
    }

    /// Schema from the default configuration.
    pub fn default_schema() -> Self {
        let configuration = SampleIndexConfiguration::default();
        let file_index = FileIndexSchema::layout(&configuration.file_index);
        Self {
            version: 1,
            configuration,
            file_index,
        }
    }

    /// Number of configured populations.
    pub fn num_populations(&self) -> usize {
        self.configuration.population_frequency.populations.len()
    }

    /// Population frequency thresholds.
    pub fn pop_freq_thresholds(&self) -> &[f64] {
        &self.configuration.population_frequency.thresholds
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::columns::{self, ColumnKind};
    use super::*;

    #[rstest::rstest]
    #[case(0, 0)]
    #[case(999_999, 0)]
    #[case(1_000_000, 1_000_000)]
    #[case(1_234_567, 1_000_000)]
    fn batch_start(#[case] pos: u32, #[case] expected: u32) {
        assert_eq!(super::batch_start(pos), expected);
        assert!(pos - expected < MAX_OFFSET);
    }

    #[rstest::rstest]
    #[case("0/1", ColumnKind::Variants, "0/1")]
    #[case("_F_0/1", ColumnKind::FileIndex, "0/1")]
    #[case("_A_1|0", ColumnKind::Annotation, "1|0")]
    #[case("_PF_1/1", ColumnKind::PopFreq, "1/1")]
    #[case("_P_0/1", ColumnKind::Parents, "0/1")]
    #[case("_C_./1", ColumnKind::Count, "./1")]
    fn parse_columns(#[case] name: &str, #[case] kind: ColumnKind, #[case] label: &str) {
        assert_eq!(columns::parse(name), (kind, label));
        assert_eq!(kind.column(label), name);
    }

    #[test]
    fn index_field_read_write() {
        let field = IndexField::new(4, 3);
        assert_eq!(field.mask(), 0b111_0000);
        let index = field.write(0xffff, 0b010);
        assert_eq!(field.read(index), 0b010);
        assert_eq!(index | field.mask(), 0xffff);
        assert_eq!(IndexField::new(0, 0).mask(), 0);
    }

    #[test]
    fn range_codes_are_monotonic() {
        let thresholds = [10.0, 20.0, 30.0];
        let mut last = 0;
        for value in 0..100 {
            let code = range_code(value as f64, &thresholds);
            assert!(code >= last);
            last = code;
        }
        assert_eq!(range_code(9.9, &thresholds), 0);
        assert_eq!(range_code(10.0, &thresholds), 1);
        assert_eq!(range_code(35.0, &thresholds), 3);
    }

    #[test]
    fn default_file_index_layout() {
        let schema = SampleIndexSchema::default_schema();
        let fi = &schema.file_index;
        assert_eq!(fi.multi_file, IndexField::new(0, 1));
        assert_eq!(fi.file_position, IndexField::new(1, 3));
        assert_eq!(fi.type_class, IndexField::new(4, 2));
        assert_eq!(fi.filter_pass, IndexField::new(6, 1));
        assert_eq!(fi.qual.field, IndexField::new(7, 2));
        assert_eq!(fi.dp.field, IndexField::new(9, 3));
        assert_eq!(fi.dp.null_code(), Some(7));
        assert_eq!(fi.qual.code(None), 0);
        assert_eq!(fi.max_files(), 8);
    }

    #[test]
    fn file_index_too_wide() {
        let mut conf = SampleIndexConfiguration::default();
        conf.file_index.file_position_bits = 10;
        assert_eq!(
            SampleIndexSchema::new(2, conf),
            Err(conf::Error::FileIndexTooWide(19))
        );
    }
}
