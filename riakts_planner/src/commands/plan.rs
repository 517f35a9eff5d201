use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
};

use anyhow::Context;
use riakts_query::{ClientSideIndex, HlQuery, PlanStrategy, SeriesCatalog};
use tracing::{debug, info};

#[derive(Debug, clap::Parser)]
#[clap(visible_alias = "p")]
pub(crate) struct Config {
    /// The JSON catalog of series to plan against
    #[clap(short = 'c', long = "catalog", env = "RIAKTS_PLANNER_CATALOG")]
    catalog_path: PathBuf,

    /// A file of queries, one JSON object per line. Queries are read from stdin if not
    /// specified.
    #[clap(short = 'i', long = "input", env = "RIAKTS_PLANNER_INPUT")]
    input_path: Option<PathBuf>,

    /// Where aggregation happens: `server` has the backend aggregate every group-by-time
    /// bucket, `client` fetches raw points once per series.
    #[clap(
        short = 's',
        long = "strategy",
        env = "RIAKTS_PLANNER_STRATEGY",
        default_value = "server"
    )]
    strategy: PlanStrategy,

    /// Render query timestamps in UTC
    #[clap(long = "force-utc", default_value_t = false)]
    force_utc: bool,

    /// Print each query before its plan
    #[clap(long = "print-queries", default_value_t = false)]
    print_queries: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Summary {
    queries: usize,
    backend_queries: usize,
}

pub(crate) fn command(config: Config) -> Result<(), anyhow::Error> {
    let catalog = ClientSideIndex::from_path(&config.catalog_path)?;
    info!(
        path = %config.catalog_path.display(),
        series = catalog.len(),
        "loaded catalog"
    );

    let input: Box<dyn BufRead> = match &config.input_path {
        Some(path) => Box::new(BufReader::new(File::open(path).with_context(|| {
            format!("failed to open query file '{}'", path.display())
        })?)),
        None => Box::new(io::stdin().lock()),
    };

    let summary = plan_queries(&catalog, input, io::stdout().lock(), &config)?;
    info!(
        queries = summary.queries,
        backend_queries = summary.backend_queries,
        strategy = %config.strategy,
        "planning complete"
    );

    Ok(())
}

fn plan_queries<C, R, W>(
    catalog: &C,
    input: R,
    mut out: W,
    config: &Config,
) -> Result<Summary, anyhow::Error>
where
    C: SeriesCatalog + ?Sized,
    R: BufRead,
    W: Write,
{
    let mut summary = Summary::default();

    for (n, line) in input.lines().enumerate() {
        let line = line.context("failed to read query input")?;
        if line.trim().is_empty() {
            continue;
        }
        let mut query: HlQuery = serde_json::from_str(&line)
            .with_context(|| format!("invalid query on line {}", n + 1))?;
        if config.force_utc {
            query.force_utc();
        }
        debug!(query = %query, "planning query");

        let plan = query
            .to_query_plan(catalog, config.strategy)
            .with_context(|| format!("failed to plan query {}", query.id))?;

        if config.print_queries {
            writeln!(out, "{query}")?;
        }
        write!(out, "query {}: {}\n{plan}", query.id, query.human_label)?;

        summary.queries += 1;
        summary.backend_queries += plan.num_backend_queries();
    }

    out.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use riakts_query::{Series, TimeInterval};

    use super::*;

    const QUERIES: &str = r#"
{"id": 1, "human_label": "max cpu", "measurement_name": "cpu", "field_name": "usage_user", "aggregation_type": "max", "time_start": "2016-01-01T01:00:00+01:00", "time_end": "2016-01-01T02:00:00+01:00", "group_by_duration": "30m", "tag_sets": [["host=a"]]}

{"id": 2, "human_label": "all cpu", "measurement_name": "cpu", "field_name": "usage_user", "aggregation_type": "avg", "time_start": "2016-01-01T00:00:00Z", "time_end": "2016-01-01T01:00:00Z"}
"#;

    fn catalog() -> ClientSideIndex {
        ClientSideIndex::new(["a", "b"].into_iter().map(|host| Series {
            table: "usertable".to_string(),
            id: format!("cpu-{host}"),
            measurement: "cpu".to_string(),
            field: "usage_user".to_string(),
            tags: [("host".to_string(), host.to_string())].into(),
            interval: TimeInterval::from_timestamp_nanos(0, i64::MAX),
        }))
    }

    fn config(args: &[&str]) -> Config {
        Config::try_parse_from(["plan", "--catalog", "unused.json"].iter().chain(args)).unwrap()
    }

    fn run(args: &[&str]) -> (Summary, String) {
        let mut out = Vec::new();
        let summary =
            plan_queries(&catalog(), QUERIES.as_bytes(), &mut out, &config(args)).unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    #[test]
    fn server_strategy() {
        let (summary, out) = run(&[]);

        assert_eq!(
            Summary {
                queries: 2,
                backend_queries: 4,
            },
            summary
        );
        assert_eq!(
            "query 1: max cpu\n\
             server aggregation: max, buckets: 2, queries: 2\n  \
             [2016-01-01T00:00:00Z, 2016-01-01T00:30:00Z)\n    \
             SELECT max(value) FROM usertable WHERE series = 'cpu-a' AND time >= 1451606400000000000 AND time < 1451608200000000000\n  \
             [2016-01-01T00:30:00Z, 2016-01-01T01:00:00Z)\n    \
             SELECT max(value) FROM usertable WHERE series = 'cpu-a' AND time >= 1451608200000000000 AND time < 1451610000000000000\n\
             query 2: all cpu\n\
             server aggregation: avg, buckets: 1, queries: 2\n  \
             [2016-01-01T00:00:00Z, 2016-01-01T01:00:00Z)\n    \
             SELECT avg(value) FROM usertable WHERE series = 'cpu-a' AND time >= 1451606400000000000 AND time < 1451610000000000000\n    \
             SELECT avg(value) FROM usertable WHERE series = 'cpu-b' AND time >= 1451606400000000000 AND time < 1451610000000000000\n",
            out
        );
    }

    #[test]
    fn client_strategy() {
        let (summary, out) = run(&["--strategy", "client"]);

        assert_eq!(
            Summary {
                queries: 2,
                backend_queries: 3,
            },
            summary
        );
        assert!(out.contains("client aggregation: max, group by: 30m, buckets: 2, queries: 1\n"));
        assert!(out.contains("client aggregation: avg, group by: 0s, buckets: 1, queries: 2\n"));
    }

    #[test]
    fn print_queries_with_force_utc() {
        let (_, out) = run(&["--print-queries", "--force-utc"]);

        assert!(
            out.starts_with(
                "ID: 1, HumanLabel: max cpu, HumanDescription: , MeasurementName: cpu, \
                 FieldName: usage_user, AggregationType: max, \
                 TimeStart: 2016-01-01 00:00:00 +00:00, TimeEnd: 2016-01-01 01:00:00 +00:00, \
                 GroupByDuration: 30m, TagSets: [[host=a]]\n"
            ),
            "{out}"
        );
    }

    #[test]
    fn reports_bad_input() {
        let mut out = Vec::new();
        let err = plan_queries(&catalog(), "{\"id\": 3}\n".as_bytes(), &mut out, &config(&[]))
            .unwrap_err();
        assert_eq!("invalid query on line 1", err.to_string());

        let reversed = r#"{"id": 4, "measurement_name": "cpu", "field_name": "usage_user", "time_start": "2016-01-01T01:00:00Z", "time_end": "2016-01-01T00:00:00Z"}"#;
        let err = plan_queries(&catalog(), reversed.as_bytes(), &mut out, &config(&[]))
            .unwrap_err();
        assert_eq!("failed to plan query 4", err.to_string());
    }
}
