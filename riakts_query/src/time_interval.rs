//! Half-open time windows and group-by-time bucketing.

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A half-open window of time, `[start, end)`.
///
/// Used both for group-by-time buckets and for the validity window of a series. Intervals
/// order by `start`, then by `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Makes a new `TimeInterval` from two nanosecond UNIX timestamps.
    pub fn from_timestamp_nanos(start: i64, end: i64) -> Self {
        Self::new(Utc.timestamp_nanos(start), Utc.timestamp_nanos(end))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// An interval is well formed when it does not end before it starts. Empty intervals
    /// (`start == end`) are well formed.
    pub fn is_well_formed(&self) -> bool {
        self.start <= self.end
    }

    /// True if the two half-open intervals share at least one instant.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Restrict this interval to `outer`, moving the start forward and the end backward as
    /// needed. This is how a rounded group-by-time bucket becomes the bounds of a query.
    pub fn clamp_to(&self, outer: &Self) -> Self {
        Self {
            start: self.start.max(outer.start),
            end: self.end.min(outer.end),
        }
    }

    pub fn start_nanos(&self) -> Result<i64> {
        timestamp_nanos(self.start)
    }

    pub fn end_nanos(&self) -> Result<i64> {
        timestamp_nanos(self.end)
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.end.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

pub(crate) fn timestamp_nanos(t: DateTime<Utc>) -> Result<i64> {
    t.timestamp_nanos_opt()
        .ok_or_else(|| Error::TimestampOutOfRange(t.to_rfc3339()))
}

/// Render a signed duration in `humantime` form, e.g. `1h 30m` or `-5m`.
pub(crate) fn format_duration(d: Duration) -> String {
    match (d.abs().to_std(), d < Duration::zero()) {
        (Ok(abs), false) => humantime::format_duration(abs).to_string(),
        (Ok(abs), true) => format!("-{}", humantime::format_duration(abs)),
        (Err(_), _) => d.to_string(),
    }
}

/// Parse a `humantime` duration such as `1h` or `90s`, with an optional leading `-`.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (negative, magnitude) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let d = humantime::parse_duration(magnitude)
        .map_err(|e| format!("invalid duration {s:?}: {e}"))
        .and_then(|d| Duration::from_std(d).map_err(|e| format!("invalid duration {s:?}: {e}")))?;
    Ok(if negative { -d } else { d })
}

/// Upper bound on the number of group-by-time buckets a single range may be split into.
pub const MAX_BUCKETS: usize = 1_000_000;

/// Truncate `t` down to the nearest multiple of `window` counted from the UNIX epoch.
fn truncate_by_nanos(t: i64, window: i64) -> Result<i64> {
    t.checked_sub(t.rem_euclid(window))
        .ok_or_else(|| Error::TimestampOutOfRange(format!("{t}ns truncated to {window}ns")))
}

/// Split `[start, end)` into consecutive group-by-time buckets of width `group_by`.
///
/// Bucket boundaries are multiples of `group_by` since the UNIX epoch, matching the rounded
/// group-by-time boundaries of InfluxQL, so the first bucket may start before `start` and the
/// last one may end after `end`. The buckets are returned unclamped and in order. A zero
/// `group_by` yields the single bucket `[start, end)`.
///
/// Buckets are produced whether or not any data will fall into them. Ranges that would need
/// more than [`MAX_BUCKETS`] buckets are rejected.
pub fn bucket_time_intervals(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    group_by: Duration,
) -> Result<Vec<TimeInterval>> {
    if end < start {
        return Err(Error::InvalidTimeRange { start, end });
    }
    if group_by < Duration::zero() {
        return Err(Error::InvalidGroupByDuration(group_by));
    }
    if group_by.is_zero() {
        return Ok(vec![TimeInterval::new(start, end)]);
    }

    let window = group_by
        .num_nanoseconds()
        .ok_or(Error::InvalidGroupByDuration(group_by))?;
    let end = timestamp_nanos(end)?;
    let mut bucket_start = truncate_by_nanos(timestamp_nanos(start)?, window)?;

    let count = (i128::from(end) - i128::from(bucket_start) + i128::from(window) - 1)
        / i128::from(window);
    if count > MAX_BUCKETS as i128 {
        return Err(Error::TooManyBuckets {
            group_by,
            count,
            max: MAX_BUCKETS,
        });
    }

    let mut buckets = Vec::with_capacity(count as usize);
    while bucket_start < end {
        let bucket_end = bucket_start.checked_add(window).ok_or_else(|| {
            Error::TimestampOutOfRange(format!("bucket starting at {bucket_start}ns"))
        })?;
        buckets.push(TimeInterval::from_timestamp_nanos(bucket_start, bucket_end));
        bucket_start = bucket_end;
    }

    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    const HOUR: i64 = 3_600_000_000_000;

    fn t(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn zero_duration_is_a_single_bucket() {
        let start = t("2016-01-01T00:10:00Z");
        let end = t("2016-01-01T03:20:00Z");

        let buckets = bucket_time_intervals(start, end, Duration::zero()).unwrap();

        assert_eq!(vec![TimeInterval::new(start, end)], buckets);
    }

    #[test]
    fn aligned_range() {
        let buckets = bucket_time_intervals(
            t("2016-01-01T00:00:00Z"),
            t("2016-01-01T02:00:00Z"),
            Duration::hours(1),
        )
        .unwrap();

        assert_eq!(
            vec![
                TimeInterval::new(t("2016-01-01T00:00:00Z"), t("2016-01-01T01:00:00Z")),
                TimeInterval::new(t("2016-01-01T01:00:00Z"), t("2016-01-01T02:00:00Z")),
            ],
            buckets
        );
    }

    #[test]
    fn unaligned_range_rounds_outward() {
        let buckets = bucket_time_intervals(
            t("2016-01-01T00:30:00Z"),
            t("2016-01-01T02:15:00Z"),
            Duration::hours(1),
        )
        .unwrap();

        assert_eq!(
            vec![
                TimeInterval::new(t("2016-01-01T00:00:00Z"), t("2016-01-01T01:00:00Z")),
                TimeInterval::new(t("2016-01-01T01:00:00Z"), t("2016-01-01T02:00:00Z")),
                TimeInterval::new(t("2016-01-01T02:00:00Z"), t("2016-01-01T03:00:00Z")),
            ],
            buckets
        );
    }

    #[test]
    fn alignment_before_epoch() {
        let buckets = bucket_time_intervals(
            Utc.timestamp_nanos(-HOUR / 2),
            Utc.timestamp_nanos(HOUR / 2),
            Duration::hours(1),
        )
        .unwrap();

        assert_eq!(
            vec![
                TimeInterval::from_timestamp_nanos(-HOUR, 0),
                TimeInterval::from_timestamp_nanos(0, HOUR),
            ],
            buckets
        );
    }

    #[test]
    fn empty_range() {
        let start = t("2016-01-01T00:30:00Z");

        assert!(
            bucket_time_intervals(start, start, Duration::hours(1))
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            vec![TimeInterval::new(start, start)],
            bucket_time_intervals(start, start, Duration::zero()).unwrap()
        );
    }

    #[test]
    fn rejects_reversed_range() {
        let err = bucket_time_intervals(
            t("2016-01-01T02:00:00Z"),
            t("2016-01-01T01:00:00Z"),
            Duration::hours(1),
        )
        .unwrap_err();

        assert!(matches!(err, Error::InvalidTimeRange { .. }), "{err}");
    }

    #[test]
    fn rejects_negative_group_by() {
        let err = bucket_time_intervals(
            t("2016-01-01T00:00:00Z"),
            t("2016-01-01T01:00:00Z"),
            Duration::minutes(-5),
        )
        .unwrap_err();

        assert!(matches!(err, Error::InvalidGroupByDuration(_)), "{err}");
    }

    #[test]
    fn rejects_too_many_buckets() {
        let start = t("2016-01-01T00:00:00Z");
        let end = t("2016-01-02T00:00:00Z");

        let err = bucket_time_intervals(start, end, Duration::nanoseconds(1)).unwrap_err();
        assert!(
            matches!(
                err,
                Error::TooManyBuckets {
                    count: 86_400_000_000_000,
                    max: MAX_BUCKETS,
                    ..
                }
            ),
            "{err}"
        );

        let buckets = bucket_time_intervals(start, end, Duration::milliseconds(100)).unwrap();
        assert_eq!(864_000, buckets.len());
    }

    #[test]
    fn overlap_is_half_open() {
        let a = TimeInterval::from_timestamp_nanos(0, 10);
        let b = TimeInterval::from_timestamp_nanos(10, 20);
        let c = TimeInterval::from_timestamp_nanos(9, 11);

        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn clamp_only_shrinks() {
        let outer = TimeInterval::from_timestamp_nanos(5, 15);

        assert_eq!(
            TimeInterval::from_timestamp_nanos(5, 10),
            TimeInterval::from_timestamp_nanos(0, 10).clamp_to(&outer)
        );
        assert_eq!(
            TimeInterval::from_timestamp_nanos(10, 15),
            TimeInterval::from_timestamp_nanos(10, 20).clamp_to(&outer)
        );
        assert_eq!(
            TimeInterval::from_timestamp_nanos(6, 7),
            TimeInterval::from_timestamp_nanos(6, 7).clamp_to(&outer)
        );
    }

    #[test]
    fn display() {
        let interval = TimeInterval::new(t("2016-01-01T00:00:00Z"), t("2016-01-01T01:00:00Z"));

        assert_eq!(
            "[2016-01-01T00:00:00Z, 2016-01-01T01:00:00Z)",
            interval.to_string()
        );
    }

    proptest! {
        #[test]
        fn buckets_cover_range_without_gaps(
            start in -1_000_000_000_000i64..1_000_000_000_000,
            window in 1i64..1_000_000_000,
            windows in 1i64..1_000,
            extra in 0i64..1_000_000_000,
        ) {
            let end = start + window * (windows - 1) + 1 + extra % window;
            let range = TimeInterval::from_timestamp_nanos(start, end);
            let buckets = bucket_time_intervals(
                range.start(),
                range.end(),
                Duration::nanoseconds(window),
            )
            .unwrap();

            prop_assert!(!buckets.is_empty());
            for bucket in &buckets {
                prop_assert_eq!(window, bucket.duration().num_nanoseconds().unwrap());
                prop_assert_eq!(0, bucket.start_nanos().unwrap().rem_euclid(window));
                prop_assert!(bucket.overlaps(&range));
            }
            for pair in buckets.windows(2) {
                prop_assert_eq!(pair[0].end(), pair[1].start());
            }

            let first = buckets[0].clamp_to(&range);
            let last = buckets[buckets.len() - 1].clamp_to(&range);
            prop_assert_eq!(range.start(), first.start());
            prop_assert_eq!(range.end(), last.end());
        }

        #[test]
        fn zero_window_returns_range(
            start in -1_000_000_000_000i64..1_000_000_000_000,
            len in 0i64..10_000_000_000,
        ) {
            let range = TimeInterval::from_timestamp_nanos(start, start + len);
            let buckets = bucket_time_intervals(range.start(), range.end(), Duration::zero())
                .unwrap();

            prop_assert_eq!(vec![range], buckets);
        }
    }
}
