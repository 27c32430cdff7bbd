//! Translation of numeric comparisons into ranges of codes.

use super::Operator;

/// A half-open range `[min_code_inclusive, max_code_exclusive)` of range codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    pub min_code_inclusive: u16,
    pub max_code_exclusive: u16,
    /// Whether the codes in range hold exactly the values matching the
    /// comparison.
    pub exact: bool,
}

impl RangeQuery {
    /// Whether `code` is in range.
    pub fn contains(&self, code: u16) -> bool {
        self.min_code_inclusive <= code && code < self.max_code_exclusive
    }

    /// Whether every non-null code is in range.
    pub fn is_match_all(&self, num_thresholds: usize) -> bool {
        self.min_code_inclusive == 0 && self.max_code_exclusive as usize > num_thresholds
    }
}

/// Range of codes holding the values matching `op value`.
///
/// Code `i` holds values in `[lb_i, lb_{i+1})` where `lb_0 = min` and
/// `lb_{i+1}` is the `i`-th threshold; values are bounded by `[min, max]`.
/// Operators including missing values behave as their strict counterpart
/// here since the code of missing values depends on the field. `!=` matches
/// everything.
pub fn range_query(op: Operator, value: f64, thresholds: &[f64], min: f64, max: f64) -> RangeQuery {
    let n = thresholds.len() as u16;
    let is_threshold = thresholds.iter().any(|t| *t == value);
    let code = thresholds.iter().filter(|t| **t <= value).count() as u16;
    // lower bounds are `min` followed by the thresholds
    let bounds_below = u16::from(min < value) + thresholds.iter().filter(|t| **t < value).count() as u16;
    let bounds_not_above = u16::from(min <= value) + code;

    let (min_code_inclusive, max_code_exclusive, exact) = match op {
        Operator::Gt | Operator::GtOrMissing => (code, n + 1, false),
        Operator::Ge => (code, n + 1, is_threshold || value <= min),
        Operator::Lt | Operator::LtOrMissing => {
            (0, bounds_below.max(1), is_threshold || value >= max)
        }
        Operator::Le => (0, bounds_not_above.max(1), value >= max),
        Operator::Eq => (code, code + 1, false),
        Operator::Ne => (0, n + 1, false),
    };
    RangeQuery {
        min_code_inclusive,
        max_code_exclusive,
        exact,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    const THRESHOLDS: &[f64] = &[1.0, 2.0, 3.0];

    #[rstest::rstest]
    #[case(Operator::Gt, 2.0, 2, 4, false)]
    #[case(Operator::Gt, 1.5, 1, 4, false)]
    #[case(Operator::Ge, 2.0, 2, 4, true)]
    #[case(Operator::Ge, 1.5, 1, 4, false)]
    #[case(Operator::Ge, 0.0, 0, 4, true)]
    #[case(Operator::Lt, 2.0, 0, 2, true)]
    #[case(Operator::Lt, 1.5, 0, 2, false)]
    #[case(Operator::Lt, 0.0, 0, 1, false)]
    #[case(Operator::Lt, 100.0, 0, 4, true)]
    #[case(Operator::Le, 2.0, 0, 3, false)]
    #[case(Operator::Le, 100.0, 0, 4, true)]
    #[case(Operator::Eq, 2.5, 2, 3, false)]
    #[case(Operator::Ne, 2.5, 0, 4, false)]
    fn range_queries(
        #[case] op: Operator,
        #[case] value: f64,
        #[case] min_code_inclusive: u16,
        #[case] max_code_exclusive: u16,
        #[case] exact: bool,
    ) {
        assert_eq!(
            range_query(op, value, THRESHOLDS, 0.0, 100.0),
            RangeQuery {
                min_code_inclusive,
                max_code_exclusive,
                exact
            }
        );
    }

    #[test]
    fn pop_freq_ranges() {
        let thresholds = [0.001, 0.005, 0.01];
        let query = range_query(Operator::Lt, 0.001, &thresholds, 0.0, 1.0);
        assert_eq!(
            query,
            RangeQuery {
                min_code_inclusive: 0,
                max_code_exclusive: 1,
                exact: true
            }
        );
        assert!(query.contains(0));
        assert!(!query.contains(1));
        assert!(!query.is_match_all(thresholds.len()));
        assert!(range_query(Operator::Le, 1.0, &thresholds, 0.0, 1.0).is_match_all(3));
    }

    #[test]
    fn codes_in_range_match_values() {
        // Every value whose code is outside the range must fail the comparison.
        for op in [Operator::Lt, Operator::Le, Operator::Gt, Operator::Ge] {
            for v in 0..=40 {
                let value = v as f64 / 10.0;
                let query = range_query(op, value, THRESHOLDS, 0.0, 100.0);
                for x in 0..=40 {
                    let x = x as f64 / 10.0;
                    let holds = match op {
                        Operator::Lt => x < value,
                        Operator::Le => x <= value,
                        Operator::Gt => x > value,
                        _ => x >= value,
                    };
                    let code = crate::sample_index::schema::range_code(x, THRESHOLDS);
                    if holds {
                        assert!(query.contains(code), "{} {} {}", op, value, x);
                    }
                    if query.exact {
                        assert_eq!(query.contains(code), holds, "{} {} {}", op, value, x);
                    }
                }
            }
        }
    }
}
