//! Rendering of the RiakTS SQL text sent to the backend.

use std::fmt;

/// A single query to be sent to the RiakTS backend.
///
/// Built once from a physical series address and a half-open nanosecond time range, and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendQuery {
    query_string: String,
}

impl BackendQuery {
    /// Build the query for the series stored under `row_key` in `table`, covering
    /// `[start_nanos, end_nanos)`.
    ///
    /// An empty `aggregation` selects the raw `time, value` pairs. Otherwise `aggregation` is
    /// applied to `value` on the backend; it is inserted verbatim and must be a function the
    /// backend understands, such as `avg` or `max`.
    pub fn new(
        aggregation: &str,
        table: &str,
        row_key: &str,
        start_nanos: i64,
        end_nanos: i64,
    ) -> Self {
        let query_string = if aggregation.is_empty() {
            format!(
                "SELECT time, value FROM {table} WHERE series = '{row_key}' AND time >= {start_nanos} AND time < {end_nanos}"
            )
        } else {
            format!(
                "SELECT {aggregation}(value) FROM {table} WHERE series = '{row_key}' AND time >= {start_nanos} AND time < {end_nanos}"
            )
        };
        Self { query_string }
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }
}

impl fmt::Display for BackendQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_string)
    }
}
