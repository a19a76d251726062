//! Month range expansion

use chrono::{Datelike, Duration, NaiveDate};
use tracing::debug;

use crate::error::InvalidRangeError;
use crate::models::WorkDescriptor;

/// Length of the default trailing window used when a trigger omits a bound.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Expand `[start, end]` into one descriptor per calendar month, ascending.
///
/// Both bounds are normalized to the first of their month first, so any day inside a
/// month selects the whole month.
pub fn expand_range(
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<WorkDescriptor>, InvalidRangeError> {
    let first = month_index(start);
    let last = month_index(end);

    if last < first {
        return Err(InvalidRangeError { start, end });
    }

    let descriptors: Vec<WorkDescriptor> = (first..=last)
        .map(|index| WorkDescriptor::new(index.div_euclid(12), (index.rem_euclid(12) + 1) as u32))
        .collect();

    debug!(
        start = %start,
        end = %end,
        months = descriptors.len(),
        "Expanded date range"
    );

    Ok(descriptors)
}

/// Trailing window of [`DEFAULT_WINDOW_DAYS`] ending at `today`.
pub fn default_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(DEFAULT_WINDOW_DAYS), today)
}

/// Resolve optional CLI bounds against the trailing window ending at `today`.
pub fn resolve_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let end = end.unwrap_or(today);
    let start = start.unwrap_or_else(|| default_window(end).0);
    (start, end)
}

/// Months since year 0, so consecutive months differ by exactly one.
fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn keys(items: &[WorkDescriptor]) -> Vec<&str> {
        items.iter().map(|d| d.period_key.as_str()).collect()
    }

    #[test]
    fn test_single_month() {
        let items = expand_range(date(2020, 1, 15), date(2020, 1, 31)).unwrap();
        assert_eq!(keys(&items), vec!["2020-01"]);
        assert_eq!(items[0].year, 2020);
        assert_eq!(items[0].month, 1);
    }

    #[test]
    fn test_normalizes_to_month_start() {
        // End day earlier in the month than start day still covers both months
        let items = expand_range(date(2020, 1, 31), date(2020, 2, 1)).unwrap();
        assert_eq!(keys(&items), vec!["2020-01", "2020-02"]);
    }

    #[test]
    fn test_crosses_year_boundary() {
        let items = expand_range(date(2019, 11, 5), date(2020, 2, 5)).unwrap();
        assert_eq!(keys(&items), vec!["2019-11", "2019-12", "2020-01", "2020-02"]);
    }

    #[test]
    fn test_count_matches_month_arithmetic() {
        let cases = [
            (date(2015, 3, 1), date(2015, 3, 1)),
            (date(2015, 3, 9), date(2016, 2, 1)),
            (date(2010, 12, 31), date(2021, 1, 1)),
            (date(2020, 6, 1), date(2024, 5, 30)),
        ];

        for (start, end) in cases {
            let items = expand_range(start, end).unwrap();
            let expected = (end.month() as i32 - start.month() as i32)
                + 12 * (end.year() - start.year())
                + 1;
            assert_eq!(items.len() as i32, expected, "{} -> {}", start, end);

            for pair in items.windows(2) {
                assert!(pair[0] < pair[1], "not strictly ascending: {:?}", pair);
            }
        }
    }

    #[test]
    fn test_inverted_range_fails() {
        let err = expand_range(date(2020, 3, 1), date(2020, 2, 28)).unwrap_err();
        assert_eq!(err.start, date(2020, 3, 1));
        assert_eq!(err.end, date(2020, 2, 28));

        assert!(expand_range(date(2021, 1, 1), date(2020, 12, 31)).is_err());
    }

    #[test]
    fn test_same_month_inverted_days_is_valid() {
        let items = expand_range(date(2020, 5, 20), date(2020, 5, 2)).unwrap();
        assert_eq!(keys(&items), vec!["2020-05"]);
    }

    #[test]
    fn test_default_window_spans_month_boundary() {
        let (start, end) = default_window(date(2024, 3, 10));
        assert_eq!(start, date(2024, 2, 9));
        assert_eq!(keys(&expand_range(start, end).unwrap()), vec!["2024-02", "2024-03"]);
    }

    #[test]
    fn test_resolve_window_defaults() {
        let today = date(2024, 3, 10);
        assert_eq!(resolve_window(None, None, today), (date(2024, 2, 9), today));

        let end = date(2023, 1, 15);
        assert_eq!(resolve_window(None, Some(end), today), (date(2022, 12, 16), end));

        let start = date(2020, 1, 1);
        assert_eq!(resolve_window(Some(start), None, today), (start, today));
    }
}
