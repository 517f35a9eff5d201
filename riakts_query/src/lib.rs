//! Query planning for a RiakTS-style column time series store.
//!
//! An [`HlQuery`] describes *what* is being asked for: a measurement, a field, an aggregation,
//! a time range, a group-by-time interval and a tag filter. Combined with a [`SeriesCatalog`]
//! that knows which physical series exist, it produces one of two plans:
//!
//! * [`QueryPlanWithServerAggregation`]: one aggregated [`BackendQuery`] per (series, bucket)
//!   pair, so the backend computes a value for every group-by-time bucket.
//! * [`QueryPlanWithoutServerAggregation`]: one raw [`BackendQuery`] per series spanning the
//!   whole range, leaving bucketing and aggregation to the caller.
//!
//! Planning is pure and synchronous. Catalogs are only ever read, so one catalog can be
//! shared by any number of concurrent planners.

use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;

pub mod backend_query;
pub mod catalog;
pub mod plan;
pub mod query;
pub mod tag;
pub mod time_interval;

pub use backend_query::BackendQuery;
pub use catalog::{ClientSideIndex, Series, SeriesCatalog, SeriesPredicates};
pub use plan::{
    PlanStrategy, QueryPlan, QueryPlanWithServerAggregation, QueryPlanWithoutServerAggregation,
};
pub use query::HlQuery;
pub use tag::{TagConstraint, TagSet, TagSets};
pub use time_interval::{TimeInterval, bucket_time_intervals};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid time range: end {end} is before start {start}")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error(
        "invalid group by duration {0}: must be non-negative and fit in 64-bit nanoseconds"
    )]
    InvalidGroupByDuration(Duration),

    #[error("timestamp out of range for nanosecond precision: {0}")]
    TimestampOutOfRange(String),

    #[error("invalid tag constraint {0:?}, expected key=value")]
    InvalidTagConstraint(String),

    #[error("group by duration {group_by} splits the range into {count} buckets, more than {max}")]
    TooManyBuckets {
        group_by: Duration,
        count: i128,
        max: usize,
    },

    #[error("malformed bucket: end {end} is before start {start}")]
    MalformedBucket {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("buckets must be sorted and disjoint, found {previous} followed by {next}")]
    UnsortedBuckets {
        previous: TimeInterval,
        next: TimeInterval,
    },

    #[error("unknown plan strategy {0:?}, expected one of: server, client")]
    UnknownPlanStrategy(String),

    #[error("failed to read catalog file {path:?}: {source}")]
    CatalogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode catalog file {path:?}: {source}")]
    CatalogFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
