use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use nursery_core::ValueObject;

/// Validity window of a price-list override. Both bounds inclusive, either may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateWindow {
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

impl ValueObject for DateWindow {}

impl DateWindow {
    pub fn new(valid_from: Option<NaiveDate>, valid_to: Option<NaiveDate>) -> Self {
        Self {
            valid_from,
            valid_to,
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        is_within_range(date, self.valid_from, self.valid_to)
    }
}

/// `true` iff `(from is None or from <= date) and (to is None or to >= date)`.
pub fn is_within_range(date: NaiveDate, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    from.is_none_or(|from| from <= date) && to.is_none_or(|to| to >= date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn both_boundaries_are_included() {
        let from = d(2026, 3, 1);
        let to = d(2026, 3, 31);
        assert!(is_within_range(from, Some(from), Some(to)));
        assert!(is_within_range(to, Some(from), Some(to)));
        assert!(!is_within_range(d(2026, 2, 28), Some(from), Some(to)));
        assert!(!is_within_range(d(2026, 4, 1), Some(from), Some(to)));
    }

    #[test]
    fn open_bounds_are_unbounded() {
        let day = d(2026, 6, 15);
        assert!(is_within_range(day, None, None));
        assert!(is_within_range(day, None, Some(day)));
        assert!(is_within_range(day, Some(day), None));
        assert!(!is_within_range(day, Some(d(2026, 6, 16)), None));
        assert!(DateWindow::unbounded().contains(day));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn day_strategy() -> impl Strategy<Value = NaiveDate> {
            (0i64..3650).prop_map(|offset| d(2020, 1, 1) + chrono::Duration::days(offset))
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 512,
                ..ProptestConfig::default()
            })]

            /// Property: containment matches the bound-by-bound definition.
            #[test]
            fn containment_matches_definition(
                date in day_strategy(),
                from in proptest::option::of(day_strategy()),
                to in proptest::option::of(day_strategy()),
            ) {
                let expected = from.map_or(true, |f| f <= date) && to.map_or(true, |t| t >= date);
                prop_assert_eq!(is_within_range(date, from, to), expected);
                prop_assert_eq!(DateWindow::new(from, to).contains(date), expected);
            }
        }
    }
}
