//! Second leg of the cloud flow: pull a staged parquet object out of GCS,
//! annotate it, restage it, and load it into the BigQuery warehouse.

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tabload::{
    cloud::{
        warehouse::{LoadFormat, Warehouse},
        ObjectStore,
    },
    Dataset,
};

const ANNOTATION_COLUMN: &str = "warehouse_export";
const ANNOTATION_TEXT: &str = "restaged from object storage for the warehouse";

#[derive(Parser, Debug)]
#[command(name = "gcs_to_warehouse")]
struct Args {
    /// GCS bucket holding the staged sample
    #[arg(long, env = "bucket")]
    bucket: String,

    /// Object to pull from the bucket
    #[arg(long, env = "object", default_value = "transformed_data.parquet.gz")]
    object: String,

    /// Object name the annotated copy is restaged under
    #[arg(long, env = "staged_object", default_value = "data_to_bq.parquet.gz")]
    staged_object: String,

    /// BigQuery dataset to load into
    #[arg(long, env = "bq_dataset")]
    bq_dataset: String,

    /// BigQuery table to load into (replaced on every run)
    #[arg(long, env = "bq_table")]
    bq_table: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();
    info!("startup");

    let args = Args::parse();

    let store = ObjectStore::connect(&args.bucket).await?;
    let data = store.download(&args.object).await?;
    let dataset = Dataset::from_parquet_bytes(Bytes::from(data), &args.object)?;
    info!(rows = dataset.row_count(), "staged object decoded");

    let annotated = dataset.with_constant_column(ANNOTATION_COLUMN, ANNOTATION_TEXT)?;
    let parquet = annotated.to_parquet_bytes(true)?;
    let uri = store.upload(&args.staged_object, parquet).await?;

    let warehouse = Warehouse::connect().await?;
    warehouse
        .load_from_gcs(&args.bq_dataset, &args.bq_table, &uri, LoadFormat::Parquet)
        .await?;

    info!(table = %args.bq_table, "warehouse load finished");
    Ok(())
}
