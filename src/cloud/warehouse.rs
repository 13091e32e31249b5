//! BigQuery loader: pull a staged object from GCS into a warehouse table.
//! Replace semantics only; the table is rewritten on every load.

use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::job::query::QueryRequest;
use google_cloud_bigquery::query::row::Row;
use tracing::info;

use crate::error::{LoadError, Result};

/// File format of the staged object.
#[derive(Debug, Clone, Copy)]
pub enum LoadFormat {
    Csv,
    Parquet,
}

pub struct Warehouse {
    client: Client,
    project: String,
}

impl Warehouse {
    /// Authenticate with application-default credentials; the project comes
    /// from them.
    pub async fn connect() -> Result<Self> {
        let (config, project) = ClientConfig::new_with_auth()
            .await
            .map_err(|e| LoadError::Warehouse(format!("authenticating to BigQuery: {}", e)))?;
        let project = project
            .ok_or_else(|| LoadError::Warehouse("no project_id from credentials".to_string()))?;
        let client = Client::new(config)
            .await
            .map_err(|e| LoadError::Warehouse(format!("creating BigQuery client: {}", e)))?;
        Ok(Self { client, project })
    }

    /// Load `uri` into `dataset.table`, replacing any previous content.
    pub async fn load_from_gcs(
        &self,
        dataset: &str,
        table: &str,
        uri: &str,
        format: LoadFormat,
    ) -> Result<()> {
        let options = match format {
            // Our CSV exports carry a header row.
            LoadFormat::Csv => "format = 'CSV', skip_leading_rows = 1",
            LoadFormat::Parquet => "format = 'PARQUET'",
        };
        let statement = format!(
            "LOAD DATA OVERWRITE `{}.{}.{}` FROM FILES ({}, uris = ['{}'])",
            self.project, dataset, table, options, uri
        );
        info!(dataset, table, uri, "loading into warehouse");

        let request = QueryRequest {
            query: statement,
            use_legacy_sql: false,
            ..Default::default()
        };
        let mut rows = self
            .client
            .query::<Row>(&self.project, request)
            .await
            .map_err(|e| LoadError::Warehouse(format!("load job for {}.{}: {}", dataset, table, e)))?;
        // LOAD DATA returns no rows; drain to surface job errors.
        while rows
            .next()
            .await
            .map_err(|e| LoadError::Warehouse(format!("load job for {}.{}: {}", dataset, table, e)))?
            .is_some()
        {}
        Ok(())
    }
}
