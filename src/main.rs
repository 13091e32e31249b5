use anyhow::Result;
use clap::Parser;
use std::{fs, path::PathBuf, str::FromStr};
use tabload::{
    pipeline::{self, PipelineConfig},
    query::DefaultQuery,
    sink::{ConflictPolicy, DbConfig},
    source::SourceSpec,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Ingest a tabular dataset (bundled default, local file or remote url) into
/// a PostgreSQL table, then run a query against it and print the result.
#[derive(Parser, Debug)]
#[command(name = "tabload")]
struct Args {
    /// Database user
    #[arg(long, env = "user", default_value = "root")]
    user: String,

    /// Database password
    #[arg(long, env = "password", default_value = "root")]
    password: String,

    /// Database host
    #[arg(long, env = "host", default_value = "localhost")]
    host: String,

    /// Database port
    #[arg(long, env = "port", default_value_t = 5432)]
    port: u16,

    /// Database to store the table in (created when missing)
    #[arg(long, env = "name_db", default_value = "my_db")]
    name_db: String,

    /// Destination table name
    #[arg(long, env = "name_table", default_value = "ny_taxi")]
    name_table: String,

    /// What to do when the table already exists
    #[arg(long, env = "if_exists", default_value = "replace", value_parser = parse_policy)]
    if_exists: ConflictPolicy,

    /// Source url or local path; repeat (or comma-separate) for a sequence.
    /// Absent means the bundled default dataset.
    #[arg(long, env = "url", value_delimiter = ',')]
    url: Vec<String>,

    /// Query to run after storing; defaults to a row count of the table
    #[arg(long, env = "sql_query")]
    sql_query: Option<String>,

    /// Local working directory for the bundled dataset and downloads
    #[arg(long, env = "data_dir", default_value = "data")]
    data_dir: PathBuf,

    /// Abort the run when a store fails instead of logging and continuing
    #[arg(long, env = "halt_on_store_failure")]
    halt_on_store_failure: bool,
}

fn parse_policy(s: &str) -> std::result::Result<ConflictPolicy, String> {
    ConflictPolicy::from_str(s)
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();
    info!("startup");

    let args = Args::parse();
    fs::create_dir_all(&args.data_dir)?;

    let config = PipelineConfig {
        db: DbConfig {
            user: args.user,
            password: args.password,
            host: args.host,
            port: args.port,
            database: args.name_db,
        },
        table: args.name_table,
        policy: args.if_exists,
        source: SourceSpec::from_urls(args.url),
        query: args.sql_query,
        default_query: DefaultQuery::Count,
        halt_on_store_failure: args.halt_on_store_failure,
        data_dir: args.data_dir,
    };

    let outcomes = pipeline::run(&config).await?;
    for outcome in &outcomes {
        info!(report = %serde_json::to_string(&outcome.report)?, "iteration finished");
        println!("{}", outcome.query_result.pretty()?);
    }

    info!("all done");
    Ok(())
}
