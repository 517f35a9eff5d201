//! High level queries and the two planners that turn them into backend queries.

use std::{collections::BTreeMap, fmt, slice, sync::Arc};

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    Error, Result,
    backend_query::BackendQuery,
    catalog::{SeriesCatalog, SeriesPredicates},
    plan::{
        PlanStrategy, QueryPlan, QueryPlanWithServerAggregation,
        QueryPlanWithoutServerAggregation,
    },
    tag::TagSets,
    time_interval::{TimeInterval, bucket_time_intervals, format_duration},
};

/// A high level query, as produced by a bulk query generator.
///
/// An `HlQuery` says nothing about how the data is laid out in the backend. Combine it with a
/// [`SeriesCatalog`] to build a plan of concrete [`BackendQuery`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HlQuery {
    pub id: i64,
    #[serde(default)]
    pub human_label: String,
    #[serde(default)]
    pub human_description: String,

    /// e.g. `cpu`
    pub measurement_name: String,
    /// e.g. `usage_user`
    pub field_name: String,
    /// e.g. `avg` or `max`. Passed verbatim to the backend; empty means raw values.
    #[serde(default)]
    pub aggregation_type: String,
    pub time_start: DateTime<FixedOffset>,
    pub time_end: DateTime<FixedOffset>,
    /// Width of the group-by-time buckets. Zero treats the whole range as one bucket.
    #[serde(default = "zero_duration", with = "group_by_serde")]
    pub group_by_duration: Duration,
    #[serde(default)]
    pub tag_sets: TagSets,
}

fn zero_duration() -> Duration {
    Duration::zero()
}

/// Reads durations either as `humantime` strings (`"1h"`, `"-5m"`) or as integer nanoseconds.
mod group_by_serde {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    use crate::time_interval::{format_duration, parse_duration};

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Nanos(i64),
        Human(String),
    }

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Nanos(n) => Ok(Duration::nanoseconds(n)),
            Repr::Human(s) => parse_duration(&s).map_err(D::Error::custom),
        }
    }
}

impl HlQuery {
    /// Reject queries whose time range ends before it starts, whose timestamps do not fit in
    /// nanoseconds since the epoch, or whose group-by duration is negative.
    pub fn validate(&self) -> Result<()> {
        if self.time_end < self.time_start {
            return Err(Error::InvalidTimeRange {
                start: self.time_start.with_timezone(&Utc),
                end: self.time_end.with_timezone(&Utc),
            });
        }
        let range = self.time_range();
        range.start_nanos()?;
        range.end_nanos()?;
        if self.group_by_duration < Duration::zero() {
            return Err(Error::InvalidGroupByDuration(self.group_by_duration));
        }
        Ok(())
    }

    /// The `[time_start, time_end)` range of the query.
    pub fn time_range(&self) -> TimeInterval {
        TimeInterval::new(
            self.time_start.with_timezone(&Utc),
            self.time_end.with_timezone(&Utc),
        )
    }

    /// Rewrite the timestamps in UTC. The instants are unchanged; only the rendering differs.
    pub fn force_utc(&mut self) {
        self.time_start = self.time_start.with_timezone(&Utc).fixed_offset();
        self.time_end = self.time_end.with_timezone(&Utc).fixed_offset();
    }

    /// Plan this query with the given strategy.
    pub fn to_query_plan<C>(&self, catalog: &C, strategy: PlanStrategy) -> Result<QueryPlan>
    where
        C: SeriesCatalog + ?Sized,
    {
        match strategy {
            PlanStrategy::ServerAggregation => self
                .to_query_plan_with_server_aggregation(catalog)
                .map(QueryPlan::WithServerAggregation),
            PlanStrategy::ClientAggregation => self
                .to_query_plan_without_server_aggregation(catalog)
                .map(QueryPlan::WithoutServerAggregation),
        }
    }

    /// Build a plan that asks the backend for one aggregated value per series and
    /// group-by-time bucket.
    ///
    /// Every bucket appears in the plan, even if no series has data for it. The bucket keys
    /// keep their rounded boundaries; only the bounds of the backend queries are clamped to the
    /// query's time range.
    pub fn to_query_plan_with_server_aggregation<C>(
        &self,
        catalog: &C,
    ) -> Result<QueryPlanWithServerAggregation>
    where
        C: SeriesCatalog + ?Sized,
    {
        self.validate()?;
        let range = self.time_range();
        let buckets = bucket_time_intervals(range.start(), range.end(), self.group_by_duration)?;

        let mut bucketed: BTreeMap<TimeInterval, Vec<BackendQuery>> =
            buckets.iter().map(|b| (*b, vec![])).collect();

        for (series, hits) in self.resolve_matching_series(catalog, &buckets) {
            for bucket in hits.into_iter().map(|i| buckets[i]) {
                let bounds = bucket.clamp_to(&range);
                let query = BackendQuery::new(
                    &self.aggregation_type,
                    series.table(),
                    series.row_key(),
                    bounds.start_nanos()?,
                    bounds.end_nanos()?,
                );
                bucketed.entry(bucket).or_default().push(query);
            }
        }

        let plan = QueryPlanWithServerAggregation::new(&self.aggregation_type, bucketed)?;
        debug!(
            query_id = self.id,
            buckets = plan.buckets().len(),
            queries = plan.num_queries(),
            "planned query with server aggregation"
        );
        Ok(plan)
    }

    /// Build a plan that fetches raw points once per matching series over the whole time
    /// range. The group-by-time buckets are computed for the caller but do not affect the
    /// backend queries.
    pub fn to_query_plan_without_server_aggregation<C>(
        &self,
        catalog: &C,
    ) -> Result<QueryPlanWithoutServerAggregation>
    where
        C: SeriesCatalog + ?Sized,
    {
        self.validate()?;
        let range = self.time_range();
        let buckets = bucket_time_intervals(range.start(), range.end(), self.group_by_duration)?;
        let (start, end) = (range.start_nanos()?, range.end_nanos()?);

        let queries: Vec<_> = self
            .resolve_matching_series(catalog, slice::from_ref(&range))
            .into_iter()
            .map(|(series, _)| BackendQuery::new("", series.table(), series.row_key(), start, end))
            .collect();

        let plan = QueryPlanWithoutServerAggregation::new(
            &self.aggregation_type,
            self.group_by_duration,
            buckets,
            queries,
        )?;
        debug!(
            query_id = self.id,
            buckets = plan.time_buckets().len(),
            queries = plan.queries().len(),
            "planned query without server aggregation"
        );
        Ok(plan)
    }

    /// Find the series of the catalog matching this query's measurement, field and tag sets,
    /// along with the indexes of the `intervals` each one overlaps. Series overlapping none of
    /// the intervals are dropped.
    ///
    /// The result is ordered by physical address and holds each address once, so plans do not
    /// depend on the order the catalog hands out candidates in. Catalog entries sharing an
    /// address have their interval hits merged.
    fn resolve_matching_series<C>(
        &self,
        catalog: &C,
        intervals: &[TimeInterval],
    ) -> Vec<(Arc<C::Series>, Vec<usize>)>
    where
        C: SeriesCatalog + ?Sized,
    {
        let candidates =
            catalog.series_for_measurement_and_field(&self.measurement_name, &self.field_name);
        let num_candidates = candidates.len();

        let mut matched: Vec<_> = candidates
            .into_iter()
            .filter(|s| {
                s.matches_measurement_name(&self.measurement_name)
                    && s.matches_field_name(&self.field_name)
                    && s.matches_tag_sets(&self.tag_sets)
            })
            .filter_map(|s| {
                let hits: Vec<usize> = intervals
                    .iter()
                    .enumerate()
                    .filter(|(_, interval)| s.matches_time_interval(interval))
                    .map(|(i, _)| i)
                    .collect();
                (!hits.is_empty()).then_some((s, hits))
            })
            .collect();

        matched.sort_by(|(a, _), (b, _)| (a.table(), a.row_key()).cmp(&(b.table(), b.row_key())));
        // Entries sharing a physical address collapse into one, keeping every interval hit.
        matched.dedup_by(|(dup, dup_hits), (kept, kept_hits)| {
            if dup.table() != kept.table() || dup.row_key() != kept.row_key() {
                return false;
            }
            kept_hits.append(dup_hits);
            kept_hits.sort_unstable();
            kept_hits.dedup();
            true
        });

        debug!(
            query_id = self.id,
            candidates = num_candidates,
            matched = matched.len(),
            intervals = intervals.len(),
            "resolved series"
        );
        matched
    }
}

impl fmt::Display for HlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID: {}, HumanLabel: {}, HumanDescription: {}, MeasurementName: {}, FieldName: {}, \
             AggregationType: {}, TimeStart: {}, TimeEnd: {}, GroupByDuration: {}, TagSets: {}",
            self.id,
            self.human_label,
            self.human_description,
            self.measurement_name,
            self.field_name,
            self.aggregation_type,
            self.time_start,
            self.time_end,
            format_duration(self.group_by_duration),
            self.tag_sets,
        )
    }
}
