//! Common functionality.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod io;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Strip leading slash or pipe from genotype string.
///
/// Some callers write haploid genotypes as `/1` or `|1`.
pub fn strip_gt_leading_slash(gt: &str) -> &str {
    if gt.starts_with('/') || gt.starts_with('|') {
        &gt[1..]
    } else {
        gt
    }
}

/// Prefix used for negating a value in textual filters.
pub const NOT: char = '!';

/// Returns whether the textual filter value is negated.
pub fn is_negated(value: &str) -> bool {
    value.starts_with(NOT)
}

/// Remove the negation prefix, if any.
pub fn remove_negation(value: &str) -> &str {
    value.strip_prefix(NOT).unwrap_or(value)
}

/// How multiple values of one filter are combined.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QueryOperation {
    /// All values must hold (textual separator `;`).
    #[default]
    And,
    /// Any value must hold (textual separator `,`).
    Or,
}

impl QueryOperation {
    /// The textual separator for this operation.
    pub fn separator(&self) -> char {
        match self {
            QueryOperation::And => ';',
            QueryOperation::Or => ',',
        }
    }
}

/// Supporting code for `split_values()`.
pub mod values {
    /// Error type for `split_values()`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("cannot mix AND (';') and OR (',') separators in {0:?}")]
        MixedOperators(String),
    }
}

/// A list of filter values together with the operation combining them.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Values<T> {
    /// How `values` are combined; `None` if there is at most one value.
    pub op: Option<QueryOperation>,
    /// The values.
    pub values: Vec<T>,
}

impl<T> Default for Values<T> {
    fn default() -> Self {
        Self {
            op: None,
            values: Vec::new(),
        }
    }
}

impl<T> Values<T> {
    /// Construct with explicit operation.
    pub fn new(op: Option<QueryOperation>, values: Vec<T>) -> Self {
        Self { op, values }
    }

    /// Whether the values are combined with OR.
    pub fn is_or(&self) -> bool {
        self.op == Some(QueryOperation::Or) && self.values.len() > 1
    }

    /// Whether there are no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// Split a textual filter value into its items.
///
/// Items are separated either by `;` (AND) or `,` (OR), never both.
pub fn split_values(value: &str) -> Result<Values<&str>, values::Error> {
    let has_and = value.contains(QueryOperation::And.separator());
    let has_or = value.contains(QueryOperation::Or.separator());
    let op = match (has_and, has_or) {
        (true, true) => return Err(values::Error::MixedOperators(value.to_string())),
        (true, false) => Some(QueryOperation::And),
        (false, true) => Some(QueryOperation::Or),
        (false, false) => None,
    };
    let values = value
        .split(&[';', ','][..])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    Ok(Values { op, values })
}

/// The version of `sample-index` package.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
