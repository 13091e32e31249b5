//! Orchestrated pipeline variant: ingest → query → transform → stage the
//! sample on GCS → load it into the BigQuery warehouse. Each stage runs under
//! an explicit policy (retry budget, optional memoization) instead of ad-hoc
//! control flow.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use reqwest::Client;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use tabload::{
    cloud::{
        warehouse::{LoadFormat, Warehouse},
        ObjectStore,
    },
    flow::{input_hash, FlowRunner, StagePolicy},
    query::{self, DefaultQuery},
    sink::{self, ConflictPolicy, DbConfig},
    source::{self, SourceSpec},
    transform,
};

const SAMPLE_LIMIT: i64 = 100;
const ANNOTATION_COLUMN: &str = "transformation";
const ANNOTATION_TEXT: &str = "sampled and annotated before the warehouse export";

const COLLECT: StagePolicy = StagePolicy::new("collect_data")
    .with_retries(3)
    .with_cache_ttl(Duration::from_secs(24 * 60 * 60));
const STORE: StagePolicy = StagePolicy::new("store_in_db").with_retries(3);
const QUERY: StagePolicy = StagePolicy::new("query_table");
const TRANSFORM: StagePolicy = StagePolicy::new("transform_sample").with_retries(3);
const WRITE_LOCAL: StagePolicy = StagePolicy::new("write_local_csv").with_retries(3);
const UPLOAD: StagePolicy = StagePolicy::new("upload_to_gcs").with_retries(3);
const LOAD: StagePolicy = StagePolicy::new("load_into_warehouse").with_retries(3);

/// The whole flow, in execution order.
const STAGES: [StagePolicy; 7] = [COLLECT, STORE, QUERY, TRANSFORM, WRITE_LOCAL, UPLOAD, LOAD];

#[derive(Parser, Debug)]
#[command(name = "cloud_flow")]
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

    /// Source url or local path; repeat (or comma-separate) for a sequence
    #[arg(long, env = "url", value_delimiter = ',')]
    url: Vec<String>,

    /// Query to run after storing; defaults to a bounded sample of the table
    #[arg(long, env = "sql_query")]
    sql_query: Option<String>,

    /// Local working directory for the bundled dataset and downloads
    #[arg(long, env = "data_dir", default_value = "data")]
    data_dir: PathBuf,

    /// GCS bucket the sample is staged in
    #[arg(long, env = "bucket")]
    bucket: String,

    /// Optional object prefix inside the bucket
    #[arg(long, env = "prefix")]
    prefix: Option<String>,

    /// BigQuery dataset the staged sample is loaded into
    #[arg(long, env = "bq_dataset")]
    bq_dataset: String,
}

fn parse_policy(s: &str) -> std::result::Result<ConflictPolicy, String> {
    ConflictPolicy::from_str(s)
}

/// `<url stem>_100.csv`, falling back to the table name for the bundled
/// default dataset.
fn sample_file_name(item: Option<&str>, table: &str) -> String {
    let stem = item
        .and_then(|url| Path::new(url).file_stem())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| table.to_string());
    format!("{}_{}.csv", stem, SAMPLE_LIMIT)
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.data_dir)?;

    let plan: Vec<&str> = STAGES.iter().map(|s| s.name).collect();
    info!(?plan, "startup");

    let db = DbConfig {
        user: args.user,
        password: args.password,
        host: args.host,
        port: args.port,
        database: args.name_db,
    };
    let sources = SourceSpec::from_urls(args.url);
    let client = Client::new();
    let runner = FlowRunner::new();

    let store = ObjectStore::connect(&args.bucket).await?;
    let warehouse = Warehouse::connect().await?;

    for item in sources.items() {
        let label = item.unwrap_or("<bundled default>");
        info!(source = %label, "flow iteration");

        let dataset = runner
            .run(&COLLECT, Some(input_hash(&item)), || {
                source::resolve(&client, item, &args.data_dir)
            })
            .await?;

        // Best-effort store: a failure is reported and the flow moves on, so
        // the remaining stages run against whatever the table already holds.
        let stored = runner
            .run(&STORE, None, || async {
                sink::ensure_database(&db).await?;
                sink::write(&db, &dataset, &args.name_table, args.if_exists).await
            })
            .await;
        match stored {
            Ok(report) => info!(rows = report.rows, "data stored"),
            Err(err) => warn!(error = %err, "data was not stored"),
        }

        let queried = runner
            .run(&QUERY, None, || {
                query::run(
                    &db,
                    &args.name_table,
                    args.sql_query.as_deref(),
                    DefaultQuery::Sample {
                        limit: SAMPLE_LIMIT,
                    },
                )
            })
            .await?;

        let transformed = runner
            .run(&TRANSFORM, None, || async {
                transform::annotate(&queried, ANNOTATION_COLUMN, ANNOTATION_TEXT)
            })
            .await?;

        let file_name = sample_file_name(item, &args.name_table);
        let local_path = args.data_dir.join(&file_name);
        let csv = runner
            .run(&WRITE_LOCAL, None, || async {
                let bytes = transformed.to_csv_bytes()?;
                tokio::fs::write(&local_path, &bytes).await?;
                Ok(bytes)
            })
            .await?;
        info!(path = %local_path.display(), "sample written locally");

        let object = match &args.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), file_name),
            None => file_name.clone(),
        };
        let uri = runner
            .run(&UPLOAD, None, || store.upload(&object, csv.clone()))
            .await?;

        let bq_table = file_name.trim_end_matches(".csv").to_string();
        runner
            .run(&LOAD, None, || {
                warehouse.load_from_gcs(&args.bq_dataset, &bq_table, &uri, LoadFormat::Csv)
            })
            .await?;
        info!(table = %bq_table, "warehouse load finished");
    }

    info!("all done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_file_name_uses_the_url_stem() {
        assert_eq!(
            sample_file_name(Some("https://example.com/data/trips.csv"), "ny_taxi"),
            "trips_100.csv"
        );
        assert_eq!(sample_file_name(None, "ny_taxi"), "ny_taxi_100.csv");
    }
}
