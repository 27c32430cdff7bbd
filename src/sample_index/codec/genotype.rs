//! Mapping of textual genotypes to the closed set of indexed genotype codes.

use crate::common::{is_negated, strip_gt_leading_slash};

/// Number of distinct genotype codes.
pub const NUM_CODES: usize = 14;

/// Genotype code as stored in the index.
///
/// The discriminant is the 4 bit code used in the family index.
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
    strum::EnumIter,
)]
#[repr(u8)]
pub enum GenotypeCode {
    /// `0/0`
    HomRefUnphased = 0,
    /// `0/1`
    HetRefUnphased = 1,
    /// `1/1`
    HomAltUnphased = 2,
    /// `0|0`
    HomRefPhased = 3,
    /// `0|1`
    HetRef01Phased = 4,
    /// `1|0`
    HetRef10Phased = 5,
    /// `1|1`
    HomAltPhased = 6,
    /// `0`
    HemiRef = 7,
    /// `1`
    HemiAlt = 8,
    /// Homozygous with another alternative allele, e.g., `2/2`.
    MultiHom = 9,
    /// Heterozygous with another alternative allele, e.g., `1/2`.
    MultiHet = 10,
    /// `./.`
    MissingHom = 11,
    /// One allele missing, e.g., `./1`.
    MissingHet = 12,
    /// Anything else.
    Unknown = 13,
}

impl GenotypeCode {
    /// All codes in code order.
    pub fn all() -> impl Iterator<Item = GenotypeCode> + Clone {
        <GenotypeCode as strum::IntoEnumIterator>::iter()
    }

    /// The label used in column names and as canonical genotype string.
    pub fn label(&self) -> &'static str {
        match self {
            GenotypeCode::HomRefUnphased => "0/0",
            GenotypeCode::HetRefUnphased => "0/1",
            GenotypeCode::HomAltUnphased => "1/1",
            GenotypeCode::HomRefPhased => "0|0",
            GenotypeCode::HetRef01Phased => "0|1",
            GenotypeCode::HetRef10Phased => "1|0",
            GenotypeCode::HomAltPhased => "1|1",
            GenotypeCode::HemiRef => "0",
            GenotypeCode::HemiAlt => "1",
            GenotypeCode::MultiHom => "2/2",
            GenotypeCode::MultiHet => "1/2",
            GenotypeCode::MissingHom => "./.",
            GenotypeCode::MissingHet => "./1",
            GenotypeCode::Unknown => "NA",
        }
    }

    /// Inverse of `label()`.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::all().find(|code| code.label() == label)
    }

    /// The 4 bit code.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Inverse of `code()`.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::all().nth(code as usize)
    }

    /// Whether the code stands for more than one genotype string.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            GenotypeCode::MultiHom
                | GenotypeCode::MultiHet
                | GenotypeCode::MissingHet
                | GenotypeCode::Unknown
        )
    }
}

impl std::fmt::Display for GenotypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One allele of a textual genotype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allele {
    Missing,
    Index(u32),
}

fn parse_allele(s: &str) -> Option<Allele> {
    if s == "." {
        Some(Allele::Missing)
    } else {
        s.parse::<u32>().ok().map(Allele::Index)
    }
}

/// Split a textual genotype into its alleles and phasing.
fn parse_alleles(gt: &str) -> Option<(Vec<Allele>, bool)> {
    let gt = strip_gt_leading_slash(gt);
    if gt.is_empty() {
        return None;
    }
    let phased = gt.contains('|');
    let alleles = gt
        .split(&['/', '|'][..])
        .map(parse_allele)
        .collect::<Option<Vec<_>>>()?;
    Some((alleles, phased))
}

/// Map a textual genotype to its code.
///
/// Total: anything not understood maps to `GenotypeCode::Unknown`.
pub fn encode(gt: &str) -> GenotypeCode {
    let Some((alleles, phased)) = parse_alleles(gt) else {
        return GenotypeCode::Unknown;
    };
    match alleles.as_slice() {
        [Allele::Missing] => GenotypeCode::MissingHom,
        [Allele::Index(0)] => GenotypeCode::HemiRef,
        [Allele::Index(1)] => GenotypeCode::HemiAlt,
        [Allele::Index(_)] => GenotypeCode::MultiHom,
        [Allele::Missing, Allele::Missing] => GenotypeCode::MissingHom,
        [Allele::Missing, _] | [_, Allele::Missing] => GenotypeCode::MissingHet,
        [Allele::Index(a), Allele::Index(b)] => encode_diploid(*a, *b, phased),
        _ => GenotypeCode::Unknown,
    }
}

fn encode_diploid(a: u32, b: u32, phased: bool) -> GenotypeCode {
    if a > 1 || b > 1 {
        return if a == b {
            GenotypeCode::MultiHom
        } else {
            GenotypeCode::MultiHet
        };
    }
    match (a, b, phased) {
        (0, 0, false) => GenotypeCode::HomRefUnphased,
        (0, 0, true) => GenotypeCode::HomRefPhased,
        (1, 1, false) => GenotypeCode::HomAltUnphased,
        (1, 1, true) => GenotypeCode::HomAltPhased,
        (0, 1, true) => GenotypeCode::HetRef01Phased,
        (1, 0, true) => GenotypeCode::HetRef10Phased,
        _ => GenotypeCode::HetRefUnphased,
    }
}

/// Whether the textual genotype can be answered from the index alone.
///
/// This requires at least one alternative allele and no negation, e.g.,
/// `0/1` and `./1` are valid but `0/0`, `./0`, `./.` and `!0/1` are not.
pub fn valid_genotype(gt: &str) -> bool {
    if is_negated(gt) {
        return false;
    }
    match parse_alleles(gt) {
        Some((alleles, _)) => alleles
            .iter()
            .any(|allele| matches!(allele, Allele::Index(i) if *i >= 1)),
        None => false,
    }
}

/// Pack the codes of father and mother into one byte.
pub fn join(father: GenotypeCode, mother: GenotypeCode) -> u8 {
    (father.code() << 4) | mother.code()
}

/// Inverse of `join()`, `None` for bytes not produced by it.
pub fn split(byte: u8) -> Option<(GenotypeCode, GenotypeCode)> {
    Some((
        GenotypeCode::from_code(byte >> 4)?,
        GenotypeCode::from_code(byte & 0x0f)?,
    ))
}
