//! The plans handed to the execution layer.
//!
//! Plans are immutable once built. Their constructors check the bucket data they are given so
//! that a plan never describes a malformed or overlapping set of buckets.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    backend_query::BackendQuery,
    time_interval::{TimeInterval, format_duration},
};

/// Which side of the wire performs the aggregation of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanStrategy {
    /// One aggregated backend query per (series, bucket) pair.
    #[default]
    #[serde(rename = "server")]
    ServerAggregation,
    /// One raw backend query per series; the caller buckets and aggregates.
    #[serde(rename = "client")]
    ClientAggregation,
}

impl FromStr for PlanStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(Self::ServerAggregation),
            "client" => Ok(Self::ClientAggregation),
            _ => Err(Error::UnknownPlanStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for PlanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerAggregation => f.write_str("server"),
            Self::ClientAggregation => f.write_str("client"),
        }
    }
}

/// A plan that has the backend aggregate each group-by-time bucket.
///
/// Every bucket of the query is present, including those no series covers: an empty query
/// list means the bucket has no data, which is different from the bucket being absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlanWithServerAggregation {
    aggregation: String,
    buckets: BTreeMap<TimeInterval, Vec<BackendQuery>>,
}

impl QueryPlanWithServerAggregation {
    pub fn new(
        aggregation: impl Into<String>,
        buckets: BTreeMap<TimeInterval, Vec<BackendQuery>>,
    ) -> Result<Self> {
        check_buckets(buckets.keys())?;
        Ok(Self {
            aggregation: aggregation.into(),
            buckets,
        })
    }

    pub fn aggregation(&self) -> &str {
        &self.aggregation
    }

    /// The queries of each bucket, keyed and ordered by the unclamped bucket interval.
    pub fn buckets(&self) -> &BTreeMap<TimeInterval, Vec<BackendQuery>> {
        &self.buckets
    }

    pub fn queries_for(&self, bucket: &TimeInterval) -> Option<&[BackendQuery]> {
        self.buckets.get(bucket).map(Vec::as_slice)
    }

    /// Total number of backend queries across all buckets.
    pub fn num_queries(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}

impl fmt::Display for QueryPlanWithServerAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "server aggregation: {}, buckets: {}, queries: {}",
            self.aggregation,
            self.buckets.len(),
            self.num_queries()
        )?;
        for (bucket, queries) in &self.buckets {
            writeln!(f, "  {bucket}")?;
            for q in queries {
                writeln!(f, "    {q}")?;
            }
        }
        Ok(())
    }
}

/// A plan that fetches raw points once per series over the whole query range.
///
/// The group-by-time buckets are computed up front for the caller to aggregate the returned
/// points into; they do not shape the backend queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlanWithoutServerAggregation {
    aggregation: String,
    group_by_duration: Duration,
    time_buckets: Vec<TimeInterval>,
    queries: Vec<BackendQuery>,
}

impl QueryPlanWithoutServerAggregation {
    pub fn new(
        aggregation: impl Into<String>,
        group_by_duration: Duration,
        time_buckets: Vec<TimeInterval>,
        queries: Vec<BackendQuery>,
    ) -> Result<Self> {
        if group_by_duration < Duration::zero() {
            return Err(Error::InvalidGroupByDuration(group_by_duration));
        }
        check_buckets(&time_buckets)?;

        Ok(Self {
            aggregation: aggregation.into(),
            group_by_duration,
            time_buckets,
            queries,
        })
    }

    pub fn aggregation(&self) -> &str {
        &self.aggregation
    }

    pub fn group_by_duration(&self) -> Duration {
        self.group_by_duration
    }

    pub fn time_buckets(&self) -> &[TimeInterval] {
        &self.time_buckets
    }

    pub fn queries(&self) -> &[BackendQuery] {
        &self.queries
    }
}

impl fmt::Display for QueryPlanWithoutServerAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "client aggregation: {}, group by: {}, buckets: {}, queries: {}",
            self.aggregation,
            format_duration(self.group_by_duration),
            self.time_buckets.len(),
            self.queries.len()
        )?;
        for q in &self.queries {
            writeln!(f, "    {q}")?;
        }
        Ok(())
    }
}

/// Either kind of plan, as chosen by a [`PlanStrategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    WithServerAggregation(QueryPlanWithServerAggregation),
    WithoutServerAggregation(QueryPlanWithoutServerAggregation),
}

impl QueryPlan {
    pub fn strategy(&self) -> PlanStrategy {
        match self {
            Self::WithServerAggregation(_) => PlanStrategy::ServerAggregation,
            Self::WithoutServerAggregation(_) => PlanStrategy::ClientAggregation,
        }
    }

    pub fn aggregation(&self) -> &str {
        match self {
            Self::WithServerAggregation(p) => p.aggregation(),
            Self::WithoutServerAggregation(p) => p.aggregation(),
        }
    }

    /// The group-by-time buckets of the query, in order.
    pub fn time_buckets(&self) -> Vec<TimeInterval> {
        match self {
            Self::WithServerAggregation(p) => p.buckets().keys().copied().collect(),
            Self::WithoutServerAggregation(p) => p.time_buckets().to_vec(),
        }
    }

    /// Every backend query of the plan, bucket by bucket for server aggregation.
    pub fn backend_queries(&self) -> Box<dyn Iterator<Item = &BackendQuery> + '_> {
        match self {
            Self::WithServerAggregation(p) => Box::new(p.buckets().values().flatten()),
            Self::WithoutServerAggregation(p) => Box::new(p.queries().iter()),
        }
    }

    pub fn num_backend_queries(&self) -> usize {
        match self {
            Self::WithServerAggregation(p) => p.num_queries(),
            Self::WithoutServerAggregation(p) => p.queries().len(),
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithServerAggregation(p) => fmt::Display::fmt(p, f),
            Self::WithoutServerAggregation(p) => fmt::Display::fmt(p, f),
        }
    }
}

/// Buckets must each be well formed, and in order without overlapping one another.
fn check_buckets<'a>(buckets: impl IntoIterator<Item = &'a TimeInterval>) -> Result<()> {
    let mut previous: Option<&TimeInterval> = None;
    for bucket in buckets {
        if !bucket.is_well_formed() {
            return Err(Error::MalformedBucket {
                start: bucket.start(),
                end: bucket.end(),
            });
        }
        if let Some(prev) = previous.filter(|prev| prev.end() > bucket.start()) {
            return Err(Error::UnsortedBuckets {
                previous: *prev,
                next: *bucket,
            });
        }
        previous = Some(bucket);
    }
    Ok(())
}
