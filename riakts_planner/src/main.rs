//! Entrypoint of the riakts_planner binary
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use dotenvy::dotenv;
use logging::LoggingConfig;

mod commands {
    pub(crate) mod plan;
}
mod logging;

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "riakts_planner",
    version,
    about = "Plans RiakTS backend queries for high level time series queries",
    long_about = r#"Plans RiakTS backend queries for high level time series queries

Examples:
    # Plan every query in queries.jsonl against a catalog, aggregating on the server
    riakts_planner plan --catalog catalog.json --input queries.jsonl

    # Plan queries read from stdin, fetching raw points and aggregating client side
    cat queries.jsonl | riakts_planner plan --catalog catalog.json --strategy client

    # Print each query in UTC next to its plan, with debug logging
    riakts_planner -vv plan --catalog catalog.json --input queries.jsonl --print-queries --force-utc

    # Configure the logging with LOG_FILTER
    LOG_FILTER=riakts_query=debug riakts_planner plan --catalog catalog.json --input queries.jsonl
"#
)]
struct Config {
    #[clap(flatten)]
    logging_config: LoggingConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Plan a file of high level queries against a series catalog
    Plan(commands::plan::Config),
}

fn main() {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    if let Err(e) = config.logging_config.install_global_subscriber() {
        eprintln!("Initializing logs failed: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }

    match config.command {
        None => println!("command required, -h/--help for help"),
        Some(Command::Plan(config)) => {
            if let Err(e) = commands::plan::command(config) {
                eprintln!("Plan command failed: {e:#}");
                std::process::exit(ReturnCode::Failure as _)
            }
        }
    }
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // a missing env file is not an error
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}
