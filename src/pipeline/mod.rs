//! Pipeline orchestration: resolve → store → query, once per source item.
//!
//! Source-resolution and query errors abort the run. Store failures are
//! captured as an explicit outcome in the run report; whether they halt the
//! sequence is configurable, and by default later iterations proceed.

use std::path::PathBuf;

use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::error::Result;
use crate::query::{self, DefaultQuery};
use crate::sink::{self, ConflictPolicy, DbConfig};
use crate::source::{self, SourceSpec};

pub struct PipelineConfig {
    pub db: DbConfig,
    pub table: String,
    pub policy: ConflictPolicy,
    pub source: SourceSpec,
    pub query: Option<String>,
    pub default_query: DefaultQuery,
    /// When true, a failed store aborts the run instead of being recorded and
    /// skipped over.
    pub halt_on_store_failure: bool,
    /// Local working area: bundled dataset location and download target.
    pub data_dir: PathBuf,
}

/// What happened to one source item's store stage.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StoreOutcome {
    Written { rows: u64 },
    Failed { reason: String },
}

/// Per-item summary of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source: String,
    pub resolved_rows: usize,
    pub store: StoreOutcome,
    pub query_rows: usize,
}

/// A report plus the materialized query result for downstream stages.
pub struct RunOutcome {
    pub report: RunReport,
    pub query_result: Dataset,
}

/// Run the pipeline over every source item in order.
pub async fn run(config: &PipelineConfig) -> Result<Vec<RunOutcome>> {
    let client = Client::new();
    let mut outcomes = Vec::new();

    for item in config.source.items() {
        let label = item.unwrap_or("<bundled default>").to_string();
        info!(source = %label, table = %config.table, db = %config.db.display(), "pipeline iteration");

        let dataset = source::resolve(&client, item, &config.data_dir).await?;

        sink::ensure_database(&config.db).await?;
        let store = match sink::write(&config.db, &dataset, &config.table, config.policy).await {
            Ok(report) => StoreOutcome::Written { rows: report.rows },
            Err(err) if !config.halt_on_store_failure => {
                warn!(error = %err, "data was not stored");
                StoreOutcome::Failed {
                    reason: err.to_string(),
                }
            }
            Err(err) => return Err(err),
        };

        let query_result = query::run(
            &config.db,
            &config.table,
            config.query.as_deref(),
            config.default_query,
        )
        .await?;

        outcomes.push(RunOutcome {
            report: RunReport {
                source: label,
                resolved_rows: dataset.row_count(),
                store,
                query_rows: query_result.row_count(),
            },
            query_result,
        });
    }

    Ok(outcomes)
}
