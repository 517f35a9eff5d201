//! The catalog of physical series a query can be planned against.
//!
//! Planning only needs two capabilities: a coarse lookup of candidate series by measurement
//! and field ([`SeriesCatalog`]), and fine-grained match tests on each candidate
//! ([`SeriesPredicates`]). [`ClientSideIndex`] provides both for an in-memory set of
//! [`Series`].

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result, tag::TagSets, time_interval::TimeInterval};

/// The table every series lives in unless the catalog says otherwise.
pub const DEFAULT_TABLE: &str = "usertable";

/// Match tests and physical address of one series known to a catalog.
pub trait SeriesPredicates: fmt::Debug + Send + Sync {
    /// The backend table holding this series.
    fn table(&self) -> &str;

    /// The key identifying this series' rows within [`Self::table`].
    fn row_key(&self) -> &str;

    fn matches_measurement_name(&self, measurement: &str) -> bool;

    fn matches_field_name(&self, field: &str) -> bool;

    /// True if the series satisfies at least one of the tag sets.
    fn matches_tag_sets(&self, tag_sets: &TagSets) -> bool;

    /// True if the series holds data that may fall within `interval`.
    fn matches_time_interval(&self, interval: &TimeInterval) -> bool;
}

/// Read-only lookup of series by measurement and field.
pub trait SeriesCatalog: fmt::Debug + Send + Sync {
    type Series: SeriesPredicates;

    /// All series that may hold `field` of `measurement`, in no particular order.
    ///
    /// This is a coarse index lookup; callers are expected to check each returned series
    /// with its [`SeriesPredicates`].
    fn series_for_measurement_and_field(
        &self,
        measurement: &str,
        field: &str,
    ) -> Vec<Arc<Self::Series>>;
}

/// One physical series: the rows under `id` in `table` hold the values of one
/// measurement/field/tag combination over the `interval` they are valid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    #[serde(default = "default_table")]
    pub table: String,
    pub id: String,
    pub measurement: String,
    pub field: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub interval: TimeInterval,
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

impl SeriesPredicates for Series {
    fn table(&self) -> &str {
        &self.table
    }

    fn row_key(&self) -> &str {
        &self.id
    }

    fn matches_measurement_name(&self, measurement: &str) -> bool {
        self.measurement == measurement
    }

    fn matches_field_name(&self, field: &str) -> bool {
        self.field == field
    }

    fn matches_tag_sets(&self, tag_sets: &TagSets) -> bool {
        tag_sets.is_satisfied_by(&self.tags)
    }

    fn matches_time_interval(&self, interval: &TimeInterval) -> bool {
        self.interval.overlaps(interval)
    }
}

/// The on-disk form of a catalog.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    series: Vec<Series>,
}

/// An in-memory [`SeriesCatalog`], indexed by measurement and then field.
#[derive(Debug, Default)]
pub struct ClientSideIndex {
    by_measurement: HashMap<String, HashMap<String, Vec<Arc<Series>>>>,
    series_count: usize,
}

impl ClientSideIndex {
    pub fn new(series: impl IntoIterator<Item = Series>) -> Self {
        let mut index = Self::default();
        for s in series {
            index.insert(s);
        }
        index
    }

    /// Load a catalog from a JSON file of the form
    /// `{"series": [{"id": ..., "measurement": ..., "field": ..., "tags": {...}, "start": ..., "end": ...}]}`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::CatalogFile {
            path: path.to_path_buf(),
            source,
        })?;
        let file: CatalogFile =
            serde_json::from_str(&contents).map_err(|source| Error::CatalogFormat {
                path: path.to_path_buf(),
                source,
            })?;

        let index = Self::new(file.series);
        debug!(
            path = %path.display(),
            series = index.len(),
            measurements = index.by_measurement.len(),
            "loaded series catalog"
        );
        Ok(index)
    }

    fn insert(&mut self, series: Series) {
        self.by_measurement
            .entry(series.measurement.clone())
            .or_default()
            .entry(series.field.clone())
            .or_default()
            .push(Arc::new(series));
        self.series_count += 1;
    }

    /// Total number of series in the catalog.
    pub fn len(&self) -> usize {
        self.series_count
    }

    pub fn is_empty(&self) -> bool {
        self.series_count == 0
    }
}

impl SeriesCatalog for ClientSideIndex {
    type Series = Series;

    fn series_for_measurement_and_field(&self, measurement: &str, field: &str) -> Vec<Arc<Series>> {
        self.by_measurement
            .get(measurement)
            .and_then(|fields| fields.get(field))
            .map(|series| series.iter().map(Arc::clone).collect())
            .unwrap_or_default()
    }
}
