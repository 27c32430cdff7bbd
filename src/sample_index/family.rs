//! Family index: genotypes of the parents next to each of the child's variants.

use std::collections::BTreeMap;

use super::codec::genotype::{self, GenotypeCode};
use super::schema::columns::ColumnKind;
use super::store::{Row, RowKey};

/// Accumulates the parents' genotypes per genotype of the child for one row.
#[derive(Debug, Default)]
pub struct FamilyIndexBuilder {
    genotypes: BTreeMap<GenotypeCode, Vec<u8>>,
}

impl FamilyIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the parents' genotypes for the child's next variant.
    ///
    /// Parents without a call are passed as `None` and stored as unknown.
    pub fn add(&mut self, genotype: GenotypeCode, father: Option<&str>, mother: Option<&str>) {
        self.add_joined(genotype, join_parents(father, mother));
    }

    /// Append the joined parents' genotypes, e.g., as read from a stored row.
    pub fn add_joined(&mut self, genotype: GenotypeCode, parents: u8) {
        self.genotypes.entry(genotype).or_default().push(parents);
    }

    /// Emit the parents columns and reset.
    pub fn build_and_reset(&mut self, key: RowKey) -> Row {
        let mut row = Row::new(key);
        for (genotype, parents) in std::mem::take(&mut self.genotypes) {
            row.put(ColumnKind::Parents.column(genotype.label()), parents);
        }
        row
    }
}

/// Join the parents' genotypes, `None` is stored as unknown.
pub fn join_parents(father: Option<&str>, mother: Option<&str>) -> u8 {
    let code = |gt: Option<&str>| gt.map(genotype::encode).unwrap_or(GenotypeCode::Unknown);
    genotype::join(code(father), code(mother))
}

/// Accepted genotype codes of one parent, indexed by code.
pub type ParentFilter = [bool; genotype::NUM_CODES];

/// Whether `filter` accepts `code`.
///
/// Unknown genotypes are always accepted.
pub fn parent_filter_accepts(filter: &ParentFilter, code: GenotypeCode) -> bool {
    code == GenotypeCode::Unknown || filter[code.code() as usize]
}

/// Build the parent filter accepting the given textual genotypes.
///
/// Returns `None` if any genotype is negated, such filters are not
/// represented.
pub fn parent_filter(gts: &[String]) -> Option<ParentFilter> {
    let mut filter = [false; genotype::NUM_CODES];
    for gt in gts {
        if crate::common::is_negated(gt) {
            return None;
        }
        filter[genotype::encode(gt).code() as usize] = true;
    }
    Some(filter)
}

/// Whether the filter built from `gts` is exact, i.e., contains no ambiguous
/// genotype.
pub fn is_fully_covered_parent_filter(gts: &[String]) -> bool {
    gts.iter()
        .all(|gt| !crate::common::is_negated(gt) && !genotype::encode(gt).is_ambiguous())
}
