//! Conversion of a variant call in one file into its 16 bit file index.

use indexmap::IndexMap;

use super::codec::variant::Variant;
use super::schema::FileIndexSchema;

/// Value of FILTER for passing calls.
pub const PASS: &str = "PASS";

/// Coarse variant type class stored in the file index.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u16)]
pub enum VariantClass {
    /// Single base change.
    Snv = 0,
    /// Length changing variant.
    Indel = 1,
    /// Multi base change without length change.
    Mnv = 2,
    /// Symbolic alleles and breakends.
    Symbolic = 3,
}

impl VariantClass {
    /// Classify `variant` by its alleles.
    pub fn of(variant: &Variant) -> Self {
        let (r, a) = (&variant.reference, &variant.alternative);
        if a.starts_with('<') || a.contains('[') || a.contains(']') || a == "*" {
            VariantClass::Symbolic
        } else if r.len() == a.len() {
            if r.len() == 1 {
                VariantClass::Snv
            } else {
                VariantClass::Mnv
            }
        } else {
            VariantClass::Indel
        }
    }

    /// The 2 bit code.
    pub fn code(&self) -> u16 {
        *self as u16
    }
}

/// Per file information of a variant call.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FileCall {
    /// Value of the FILTER column, `None` if missing.
    #[serde(default)]
    pub filter: Option<String>,
    /// Value of the QUAL column, `None` if missing.
    #[serde(default)]
    pub qual: Option<f64>,
    /// Sample data fields of the indexed sample, e.g., `DP`.
    #[serde(default)]
    pub sample_data: IndexMap<String, String>,
}

/// Builds file index values for one schema.
#[derive(Debug, Clone)]
pub struct FileIndexConverter<'a> {
    schema: &'a FileIndexSchema,
}

impl<'a> FileIndexConverter<'a> {
    pub fn new(schema: &'a FileIndexSchema) -> Self {
        Self { schema }
    }

    /// Compute the file index of `call` of `variant` from the file at
    /// `file_position` among the sample's files.
    pub fn create_file_index_value(
        &self,
        file_position: usize,
        variant: &Variant,
        call: &FileCall,
    ) -> u16 {
        let schema = self.schema;
        debug_assert!(
            file_position < schema.max_files(),
            "file position {} does not fit into {} bits",
            file_position,
            schema.file_position.bits
        );
        let mut index = 0u16;
        index = schema.file_position.write(index, file_position as u16);
        index = schema
            .type_class
            .write(index, VariantClass::of(variant).code());
        if call.filter.as_deref() == Some(PASS) {
            index = schema.filter_pass.write(index, 1);
        }
        index = schema.qual.field.write(index, schema.qual.code(call.qual));
        let dp = call
            .sample_data
            .get(&schema.dp_key)
            .and_then(|value| value.parse::<f64>().ok());
        index = schema.dp.field.write(index, schema.dp.code(dp));
        tracing::trace!("file index of {} is {:#06x}", variant, index);
        index
    }

    /// Mark `index` as coming from more than one file.
    pub fn set_multi_file(&self, index: u16) -> u16 {
        self.schema.multi_file.write(index, 1)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sample_index::schema::SampleIndexSchema;

    fn call(filter: &str, qual: Option<f64>, dp: Option<&str>) -> FileCall {
        FileCall {
            filter: Some(filter.to_string()),
            qual,
            sample_data: dp
                .map(|dp| [("DP".to_string(), dp.to_string())].into_iter().collect())
                .unwrap_or_default(),
        }
    }

    #[rstest::rstest]
    #[case("A", "C", VariantClass::Snv)]
    #[case("AC", "GT", VariantClass::Mnv)]
    #[case("A", "AT", VariantClass::Indel)]
    #[case("AT", "", VariantClass::Indel)]
    #[case("A", "<DEL>", VariantClass::Symbolic)]
    #[case("A", "A[1:100[", VariantClass::Symbolic)]
    #[case("A", "]1:100]A", VariantClass::Symbolic)]
    #[case("A", "*", VariantClass::Symbolic)]
    fn variant_class(#[case] reference: &str, #[case] alternative: &str, #[case] expected: VariantClass) {
        let variant = Variant::new("1", 100, reference, alternative);
        assert_eq!(VariantClass::of(&variant), expected);
    }

    #[test]
    fn file_index_fields() {
        let schema = SampleIndexSchema::default_schema();
        let fi = &schema.file_index;
        let converter = FileIndexConverter::new(fi);
        let variant = Variant::new("1", 100, "A", "AT");

        let index = converter.create_file_index_value(2, &variant, &call("PASS", Some(25.0), Some("12")));
        assert_eq!(fi.file_position.read(index), 2);
        assert_eq!(fi.type_class.read(index), VariantClass::Indel.code());
        assert_eq!(fi.filter_pass.read(index), 1);
        assert_eq!(fi.qual.field.read(index), 2);
        assert_eq!(fi.dp.field.read(index), 2);
        assert!(!fi.is_multi_file(index));
        assert!(fi.is_multi_file(converter.set_multi_file(index)));

        let index = converter.create_file_index_value(0, &variant, &call("PASS;LowQual", None, None));
        assert_eq!(fi.filter_pass.read(index), 0);
        assert_eq!(fi.qual.field.read(index), 0);
        assert_eq!(fi.dp.field.read(index), 7);

        let index = converter.create_file_index_value(0, &variant, &call("LowQual", None, Some(".")));
        assert_eq!(fi.filter_pass.read(index), 0);
        assert_eq!(fi.dp.field.read(index), 7);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn file_position_too_large() {
        let schema = SampleIndexSchema::default_schema();
        let converter = FileIndexConverter::new(&schema.file_index);
        let variant = Variant::new("1", 100, "A", "C");
        converter.create_file_index_value(schema.file_index.max_files(), &variant, &FileCall::default());
    }

    #[test]
    fn tiers_are_monotonic() {
        let schema = SampleIndexSchema::default_schema();
        let fi = &schema.file_index;
        let converter = FileIndexConverter::new(fi);
        let variant = Variant::new("1", 100, "A", "C");
        let (mut last_qual, mut last_dp) = (0, 0);
        for value in 0..80 {
            let index = converter.create_file_index_value(
                0,
                &variant,
                &call("PASS", Some(value as f64), Some(&value.to_string())),
            );
            assert!(fi.qual.field.read(index) >= last_qual);
            assert!(fi.dp.field.read(index) >= last_dp);
            last_qual = fi.qual.field.read(index);
            last_dp = fi.dp.field.read(index);
        }
        assert_eq!((last_qual, last_dp), (3, 6));
    }
}
